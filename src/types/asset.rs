//! Addresses, assets, and fixed-point amount utilities.
//!
//! ## Addresses
//!
//! Every participant, pool, token contract, and adapter is identified by a
//! 32-byte address. The zero address is reserved: as a settlement asset it
//! denotes the native asset, and as a collection it denotes "pool-bound"
//! (the v1 order form where the collection is implicit).
//!
//! ## Why Fixed-Point?
//!
//! All strike/premium/fee arithmetic uses `u64` amounts in the asset's
//! smallest denomination. Floating point is never used in settlement math;
//! `rust_decimal` appears only at the human boundary for parsing and
//! display, exactly once per value.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// 32-byte account/contract identifier.
pub type Address = [u8; 32];

/// The reserved zero address: native asset / pool-bound collection.
pub const ZERO_ADDRESS: Address = [0u8; 32];

/// Build a test-friendly address from a numeric tag.
///
/// The tag is written little-endian into the first 8 bytes; the rest stay
/// zero. Tag 0 is rejected by debug builds since it collides with
/// [`ZERO_ADDRESS`].
pub fn address_from_tag(tag: u64) -> Address {
    debug_assert!(tag != 0, "tag 0 collides with the zero address");
    let mut addr = [0u8; 32];
    addr[..8].copy_from_slice(&tag.to_le_bytes());
    addr
}

/// Short hex form of an address for logs and display.
pub fn short_hex(addr: &Address) -> String {
    let full = hex::encode(addr);
    format!("{}..{}", &full[..8], &full[56..])
}

// ============================================================================
// Nft
// ============================================================================

/// A specific non-fungible token: (collection, token id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Nft {
    /// Collection (token contract) address.
    pub collection: Address,
    /// Token id within the collection.
    pub token_id: u64,
}

impl Nft {
    /// Create an NFT reference.
    pub fn new(collection: Address, token_id: u64) -> Self {
        Self { collection, token_id }
    }
}

// ============================================================================
// Amount arithmetic
// ============================================================================

/// Multiply an amount by a fraction, truncating.
///
/// This is the single place fee fractions are applied. The intermediate
/// product is widened to `u128` so `amount * numerator` cannot overflow,
/// and the division truncates toward zero — never rounding up.
///
/// # Example
///
/// ```
/// use optionforge::types::mul_frac;
///
/// // 3.3% of 100 truncates to 3, not 4.
/// assert_eq!(mul_frac(100, 33, 1000), 3);
/// ```
pub fn mul_frac(amount: u64, numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let wide = (amount as u128) * (numerator as u128) / (denominator as u128);
    // The quotient of a u64 amount by a fraction <= 1 always fits; larger
    // fractions saturate rather than wrap.
    wide.min(u64::MAX as u128) as u64
}

/// Parse a human decimal string into smallest-denomination units.
///
/// # Arguments
///
/// * `s` - Decimal string (e.g. "1.5")
/// * `decimals` - The asset's decimal places
///
/// # Returns
///
/// * `Some(u64)` - The amount in smallest units
/// * `None` - If parsing fails, the value is negative, or out of range
///
/// # Example
///
/// ```
/// use optionforge::types::parse_units;
///
/// assert_eq!(parse_units("1.5", 8), Some(150_000_000));
/// assert_eq!(parse_units("0.00000001", 8), Some(1));
/// assert_eq!(parse_units("-1", 8), None);
/// ```
pub fn parse_units(s: &str, decimals: u32) -> Option<u64> {
    let value = Decimal::from_str(s).ok()?;
    if value.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from(10u64.checked_pow(decimals)?);
    let scaled = value.checked_mul(scale)?;
    scaled.round_dp(0).to_u64()
}

/// Format smallest-denomination units as a human decimal string.
///
/// # Example
///
/// ```
/// use optionforge::types::format_units;
///
/// assert_eq!(format_units(150_000_000, 8), "1.50000000");
/// ```
pub fn format_units(amount: u64, decimals: u32) -> String {
    let mut value = Decimal::from(amount);
    value.set_scale(decimals).unwrap_or_default();
    format!("{:.*}", decimals as usize, value)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_tag() {
        let addr = address_from_tag(0x0102);
        assert_eq!(addr[0], 0x02);
        assert_eq!(addr[1], 0x01);
        assert_eq!(&addr[8..], &[0u8; 24]);
    }

    #[test]
    fn test_short_hex() {
        let s = short_hex(&[0xAB; 32]);
        assert!(s.starts_with("abababab"));
        assert!(s.contains(".."));
    }

    #[test]
    fn test_nft_ordering_is_by_collection_then_id() {
        let a = Nft::new(address_from_tag(1), 5);
        let b = Nft::new(address_from_tag(1), 6);
        let c = Nft::new(address_from_tag(2), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_mul_frac_truncates() {
        // The canonical fee case: 3.3% of 100 is 3, never 4.
        assert_eq!(mul_frac(100, 33, 1000), 3);
        assert_eq!(mul_frac(100, 0, 1000), 0);
        assert_eq!(mul_frac(0, 33, 1000), 0);
        assert_eq!(mul_frac(999, 1, 1000), 0);
        assert_eq!(mul_frac(1000, 1, 1000), 1);
    }

    #[test]
    fn test_mul_frac_truncates_across_denominations() {
        // Same fraction, different asset denominations: always truncation.
        for scale in [1u64, 1_000, 1_000_000, 100_000_000] {
            let amount = 100 * scale;
            assert_eq!(mul_frac(amount, 33, 1000), 3 * scale + 3 * scale / 10);
        }
    }

    #[test]
    fn test_mul_frac_wide_intermediate() {
        // amount * numerator overflows u64 but not u128.
        assert_eq!(mul_frac(u64::MAX, 1, 2), u64::MAX / 2);
    }

    #[test]
    fn test_mul_frac_zero_denominator() {
        assert_eq!(mul_frac(100, 1, 0), 0);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.0", 8), Some(100_000_000));
        assert_eq!(parse_units("0.00000001", 8), Some(1));
        assert_eq!(parse_units("10", 0), Some(10));
        assert_eq!(parse_units("not a number", 8), None);
        assert_eq!(parse_units("-0.5", 8), None);
    }

    #[test]
    fn test_format_units_roundtrip() {
        let raw = parse_units("20.00000001", 8).unwrap();
        assert_eq!(format_units(raw, 8), "20.00000001");
    }
}
