//! Option contract types.
//!
//! ## SSZ Serialization
//!
//! [`OptionContract`] derives `SimpleSerialize` so every persisted record
//! has one canonical byte form, used by the protocol state root. Enum-like
//! fields are stored as raw `u8` with typed accessors, keeping the struct a
//! fixed-size SSZ container.
//!
//! ## Collateral Invariant
//!
//! For the entire lifetime of an option its collateral stays reserved in
//! the issuing pool: the underlying NFT for a CALL, the strike amount for
//! a PUT. Reservation is derived from the pool's open-option set, never
//! from a cached flag on this struct.

use ssz_rs::prelude::*;

use crate::types::asset::{Address, Nft};

// ============================================================================
// OptionType enum
// ============================================================================

/// The right an option conveys: buy (CALL) or sell (PUT) the underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptionType {
    /// Right to buy the underlying NFT at the strike.
    #[default]
    Call,
    /// Right to sell an NFT of the collection to the pool at the strike.
    Put,
}

impl OptionType {
    /// Convert to u8 for serialization
    pub fn to_u8(self) -> u8 {
        match self {
            OptionType::Call => 0,
            OptionType::Put => 1,
        }
    }

    /// Convert from u8 for deserialization
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OptionType::Call),
            1 => Some(OptionType::Put),
            _ => None,
        }
    }
}

// ============================================================================
// OptionContract struct
// ============================================================================

/// An outstanding option right, tracked by the registry.
///
/// ## Fields
///
/// A `token_id` of zero means "PUT not yet matched to a specific asset":
/// the holder may deliver any NFT of the collection on exercise. CALL
/// options always reference a concrete token id.
///
/// ## Lifecycle
///
/// Minted on issuance; burned on execution or cancellation-by-return;
/// deactivated (but deliberately NOT burned) when an expired option is
/// cleared, leaving an inert claim with no backing.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct OptionContract {
    /// Registry-assigned option id
    pub id: u64,

    /// Issuing pool address
    pub pool: [u8; 32],

    /// Option type as u8 (0=Call, 1=Put)
    pub option_type_raw: u8,

    /// Underlying collection address
    pub collection: [u8; 32],

    /// Underlying token id (0 = unmatched PUT)
    pub token_id: u64,

    /// Strike amount in the pool asset's smallest units
    pub strike: u64,

    /// Premium paid on issuance, in the pool asset's smallest units
    pub premium: u64,

    /// Expiry timestamp (inclusive: valid while now <= expiry)
    pub expiry: u64,

    /// Active flag as u8 (1 = backed by reserved collateral)
    pub active_raw: u8,
}

impl OptionContract {
    /// Create a newly issued (active) option.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        pool: Address,
        option_type: OptionType,
        collection: Address,
        token_id: u64,
        strike: u64,
        premium: u64,
        expiry: u64,
    ) -> Self {
        Self {
            id,
            pool,
            option_type_raw: option_type.to_u8(),
            collection,
            token_id,
            strike,
            premium,
            expiry,
            active_raw: 1,
        }
    }

    /// Get the option type
    pub fn option_type(&self) -> OptionType {
        OptionType::from_u8(self.option_type_raw).unwrap_or(OptionType::Call)
    }

    /// The concrete underlying NFT, if one is bound.
    ///
    /// Returns `None` for a PUT that has not been matched to a specific
    /// token id.
    pub fn underlying(&self) -> Option<Nft> {
        if self.token_id == 0 {
            None
        } else {
            Some(Nft::new(self.collection, self.token_id))
        }
    }

    /// Whether the option still backs reserved collateral.
    pub fn is_active(&self) -> bool {
        self.active_raw == 1
    }

    /// Deactivate the option (expired-clear path; the token survives).
    pub fn deactivate(&mut self) {
        self.active_raw = 0;
    }

    /// Whether the option is past expiry at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
