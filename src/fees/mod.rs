//! Protocol fee computation.
//!
//! The fee manager is stateless per call: given a settlement amount and
//! the caller, it returns the fee recipient and the fee owed. The base
//! fraction is `amount * numerator / denominator`, truncating — the
//! protocol never rounds a fee up. Callers holding discount passes (a
//! designated fungible balance) receive a linear discount per pass,
//! capped at a maximum tier.

use crate::escrow::AssetBook;
use crate::types::{mul_frac, Address, ZERO_ADDRESS};

/// Fee fraction, recipient, and discount-pass schedule.
#[derive(Debug, Clone)]
pub struct FeeManager {
    /// Where fees are forwarded.
    pub recipient: Address,
    /// Fee fraction numerator.
    pub fee_numerator: u64,
    /// Fee fraction denominator.
    pub fee_denominator: u64,
    /// Discount-pass token address (zero = no discount program).
    pub pass_token: Address,
    /// Discount per held pass, in denominator units of the fee itself.
    pub discount_per_pass: u64,
    /// Discount cap, in denominator units of the fee itself.
    pub max_discount: u64,
}

impl FeeManager {
    /// Fee manager with the given fraction and no discount program.
    pub fn new(recipient: Address, fee_numerator: u64, fee_denominator: u64) -> Self {
        Self {
            recipient,
            fee_numerator,
            fee_denominator,
            pass_token: ZERO_ADDRESS,
            discount_per_pass: 0,
            max_discount: 0,
        }
    }

    /// A zero-fee manager.
    pub fn disabled() -> Self {
        Self::new(ZERO_ADDRESS, 0, 1)
    }

    /// Attach a discount-pass schedule.
    pub fn with_discount(
        mut self,
        pass_token: Address,
        discount_per_pass: u64,
        max_discount: u64,
    ) -> Self {
        self.pass_token = pass_token;
        self.discount_per_pass = discount_per_pass;
        self.max_discount = max_discount;
        self
    }

    /// Whether any fee is ever charged.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.fee_numerator > 0
    }

    /// Fee for `amount` given a holder with `passes` discount passes.
    ///
    /// Both the base fee and the discount truncate.
    pub fn fee_for(&self, amount: u64, passes: u64) -> u64 {
        let base = mul_frac(amount, self.fee_numerator, self.fee_denominator);
        if base == 0 || self.discount_per_pass == 0 {
            return base;
        }
        let discount = (passes.saturating_mul(self.discount_per_pass)).min(self.max_discount);
        let kept = self.fee_denominator.saturating_sub(discount);
        mul_frac(base, kept, self.fee_denominator)
    }

    /// Fee data for a settlement: `(recipient, fee)`.
    ///
    /// The caller's discount-pass balance is read from the asset book at
    /// call time; nothing is cached.
    pub fn fee_data_for(&self, amount: u64, caller: &Address, book: &AssetBook) -> (Address, u64) {
        let passes = if self.pass_token == ZERO_ADDRESS {
            0
        } else {
            book.balance_of(caller, &self.pass_token)
        };
        (self.recipient, self.fee_for(amount, passes))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
