//! Signed order types.
//!
//! ## SSZ Serialization
//!
//! Every order struct derives `SimpleSerialize`; its SSZ bytes are the
//! canonical pre-image hashed by the order verifier. Two different field
//! layouts can therefore never collide under one digest, and the same
//! order always hashes identically.
//!
//! ## Replay Protection
//!
//! Orders carry an issuer-chosen `id`, not a monotonic nonce: ids may be
//! consumed out of order across batches. The protocol tracks consumed
//! (issuer, id) pairs in a sparse set; a consumed pair can never authorize
//! another transition.
//!
//! ## Versioning
//!
//! `PoolAsk` covers both order versions: a zero `collection` is the
//! pool-bound v1 form (the pool's primary collection is implied), a
//! nonzero `collection` is the explicit v2 form for multi-collection
//! pools.

use ssz_rs::prelude::*;

// ============================================================================
// PoolAsk
// ============================================================================

/// A pool's signed offer to write a new option.
///
/// Signed by the pool owner or admin; settled by any counterparty that
/// pays the premium before `order_expiry`.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct PoolAsk {
    /// Issuer-chosen order id (consumed at most once per pool)
    pub id: u64,

    /// Issuing pool address
    pub pool: [u8; 32],

    /// Option type as u8 (0=Call, 1=Put)
    pub option_type_raw: u8,

    /// Strike amount in the pool asset's smallest units
    pub strike: u64,

    /// Premium the counterparty must pay, in smallest units
    pub premium: u64,

    /// Expiry of the written option (the right)
    pub expiry: u64,

    /// Underlying collection (zero = pool-bound v1 form)
    pub collection: [u8; 32],

    /// Underlying token id (CALL); ignored for an unmatched PUT
    pub token_id: u64,

    /// Expiry of this order itself
    pub order_expiry: u64,
}

// ============================================================================
// PoolBid
// ============================================================================

/// A pool's signed offer to buy back one of its open options.
///
/// Signed by the pool owner or admin; accepted by the option holder, who
/// is paid from the pool's available liquidity.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct PoolBid {
    /// Issuer-chosen order id (consumed at most once per pool)
    pub id: u64,

    /// Buy-back price in smallest units
    pub price: u64,

    /// Settlement asset (zero = native)
    pub asset: [u8; 32],

    /// Expiry of this order itself
    pub order_expiry: u64,

    /// The open option being bought back
    pub option_id: u64,
}

// ============================================================================
// Ask
// ============================================================================

/// A holder's signed listing of an existing option for sale.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Ask {
    /// Issuer-chosen order id (consumed at most once per seller)
    pub id: u64,

    /// The option being sold
    pub option_id: u64,

    /// Expiry of this order itself
    pub order_expiry: u64,

    /// Sale price in smallest units
    pub price: u64,

    /// Claimed issuer; must equal the recovered signer
    pub seller: [u8; 32],

    /// Settlement asset (zero = native)
    pub asset: [u8; 32],
}

// ============================================================================
// Bid
// ============================================================================

/// A buyer's signed standing offer for an option with given terms.
///
/// Settled either by a pool writing a fresh option to the buyer, or by a
/// holder selling an existing option whose terms match within
/// `expiry_allowance`.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Bid {
    /// Issuer-chosen order id (consumed at most once per buyer)
    pub id: u64,

    /// Price the buyer pays, in smallest units
    pub price: u64,

    /// Settlement asset (zero = native)
    pub asset: [u8; 32],

    /// Required underlying collection
    pub collection: [u8; 32],

    /// Expiry of this order itself
    pub order_expiry: u64,

    /// Claimed issuer; must equal the recovered signer
    pub buyer: [u8; 32],

    /// Required option type as u8 (0=Call, 1=Put)
    pub option_type_raw: u8,

    /// Required strike amount
    pub strike: u64,

    /// Desired option expiry
    pub expiry: u64,

    /// Permitted deviation of the option's expiry from `expiry`
    pub expiry_allowance: u64,

    /// Reserved registry binding. Carried in the signed digest for wire
    /// compatibility but not consulted by settlement: all options live
    /// in the single in-protocol registry.
    pub option_token: [u8; 32],
}

// ============================================================================
// MarketCall
// ============================================================================

/// One externally routed call inside a flashloan envelope.
///
/// Not an SSZ container: the payload is variable-length, so the call
/// digest hashes `(target, value, sha256(payload))` instead. Each call
/// must carry a relayer signature over exactly that digest before it is
/// dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarketCall {
    /// Target handler address (marketplace, lender, ...)
    pub target: [u8; 32],

    /// Native value forwarded with the call
    pub value: u64,

    /// Opaque payload, interpreted by the target's handler
    pub payload: Vec<u8>,
}

impl MarketCall {
    /// Create a routed call.
    pub fn new(target: [u8; 32], value: u64, payload: Vec<u8>) -> Self {
        Self { target, value, payload }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
