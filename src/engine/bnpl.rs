//! Buy-now-pay-later loan-options.
//!
//! ## Model
//!
//! A BNPL purchase finances an NFT acquisition through an external
//! lending venue: the NFT itself becomes the loan collateral, and the
//! borrower receives a *loan-option* — the right, until maturity, to pay
//! the fixed repayment amount and take the NFT. Economically this is a
//! CALL option whose strike is the loan repayment.
//!
//! Lending venues plug in behind the [`LendingAdapter`] trait. An
//! adapter escrows the collateral under its own address in the asset
//! book and quotes its repayment terms in the [`BorrowReceipt`] it
//! returns; the engine never assumes a rate.
//!
//! [`LoanBook`] mirrors the option registry: slab storage, monotonic
//! never-reused ids starting at 1.

use std::collections::HashMap;

use slab::Slab;

use crate::errors::ProtocolError;
use crate::escrow::Protocol;
use crate::types::{Address, Nft};

// ============================================================================
// Borrow terms
// ============================================================================

/// Borrower-chosen terms for opening a loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequest {
    /// Lending venue to borrow from.
    pub adapter: Address,

    /// Principal requested, in smallest units of the pool's settlement
    /// asset.
    pub principal: u64,

    /// Timestamp after which the loan-option can no longer be exercised.
    pub maturity: u64,
}

/// An adapter's confirmation of an opened position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowReceipt {
    /// The venue holding the collateral.
    pub adapter: Address,

    /// The escrowed collateral.
    pub collateral: Nft,

    /// Asset the principal and repayment settle in.
    pub asset: Address,

    /// Principal actually advanced.
    pub principal: u64,

    /// Fixed amount that settles the position.
    pub repayment: u64,
}

/// A venue that advances principal against NFT collateral.
///
/// `borrow` must move the collateral from `borrower` into the adapter's
/// own escrow and credit the principal to `borrower` in `asset`; `repay`
/// must do the reverse for the receipt's fixed repayment in the
/// receipt's asset. Both settle entirely inside the protocol's asset
/// book so a snapshot rollback undoes them.
pub trait LendingAdapter {
    /// The address this venue escrows under.
    fn address(&self) -> Address;

    /// Open a position: take `collateral`, advance the principal in
    /// `asset`.
    fn borrow(
        &self,
        protocol: &mut Protocol,
        borrower: &Address,
        collateral: Nft,
        asset: &Address,
        principal: u64,
    ) -> Result<BorrowReceipt, ProtocolError>;

    /// Settle a position: take the repayment from `payer`, release the
    /// collateral to `payer`.
    fn repay(
        &self,
        protocol: &mut Protocol,
        payer: &Address,
        receipt: &BorrowReceipt,
    ) -> Result<(), ProtocolError>;
}

/// Registry of lending venues keyed by adapter address.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Address, Box<dyn LendingAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a venue.
    pub fn register(&mut self, adapter: Box<dyn LendingAdapter>) {
        self.adapters.insert(adapter.address(), adapter);
    }

    /// Look up a venue, failing fast if unregistered.
    pub fn get(&self, address: &Address) -> Result<&dyn LendingAdapter, ProtocolError> {
        self.adapters
            .get(address)
            .map(|a| a.as_ref())
            .ok_or(ProtocolError::UnknownAdapter(*address))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Loan / LoanBook
// ============================================================================

/// One open loan-option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    /// Loan id (assigned by the book, never reused).
    pub id: u64,

    /// Holder of the loan-option right.
    pub borrower: Address,

    /// The venue escrowing the collateral.
    pub adapter: Address,

    /// The collateral the borrower can claim.
    pub collateral: Nft,

    /// Asset the principal and repayment settle in.
    pub asset: Address,

    /// Principal advanced at open.
    pub principal: u64,

    /// Fixed repayment that claims the collateral.
    pub repayment: u64,

    /// Exercise deadline (inclusive).
    pub maturity: u64,
}

impl Loan {
    /// Whether the loan-option can no longer be exercised.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.maturity
    }
}

/// Mints and settles loan-option tokens.
#[derive(Debug, Clone)]
pub struct LoanBook {
    loans: Slab<Loan>,
    index: HashMap<u64, usize>,
    next_id: u64,
}

impl Default for LoanBook {
    fn default() -> Self {
        Self::new()
    }
}

impl LoanBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self {
            loans: Slab::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of open loans.
    #[inline]
    pub fn len(&self) -> usize {
        self.loans.len()
    }

    /// Whether no loans are open.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    /// Whether a loan is open.
    #[inline]
    pub fn contains(&self, loan_id: u64) -> bool {
        self.index.contains_key(&loan_id)
    }

    /// Open a loan, returning its id.
    pub fn open(
        &mut self,
        borrower: Address,
        receipt: &BorrowReceipt,
        maturity: u64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let loan = Loan {
            id,
            borrower,
            adapter: receipt.adapter,
            collateral: receipt.collateral,
            asset: receipt.asset,
            principal: receipt.principal,
            repayment: receipt.repayment,
            maturity,
        };
        let key = self.loans.insert(loan);
        self.index.insert(id, key);
        id
    }

    /// Get a loan by id.
    pub fn get(&self, loan_id: u64) -> Result<&Loan, ProtocolError> {
        self.index
            .get(&loan_id)
            .and_then(|key| self.loans.get(*key))
            .ok_or(ProtocolError::UnknownLoan(loan_id))
    }

    /// Close a loan, returning it.
    pub fn settle(&mut self, loan_id: u64) -> Result<Loan, ProtocolError> {
        let key = self
            .index
            .remove(&loan_id)
            .ok_or(ProtocolError::UnknownLoan(loan_id))?;
        Ok(self.loans.remove(key))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
