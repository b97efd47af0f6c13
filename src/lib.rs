//! # OptionForge
//!
//! Deterministic settlement engine for peer-to-peer NFT options with
//! escrowed collateral.
//!
//! ## Architecture
//!
//! - **Types**: addresses, assets, orders, option contracts, events
//! - **Verifier**: canonical order digests and signer recovery
//! - **Escrow**: asset book, option registry, pools, and the protocol
//!   state machine
//! - **Conduit**: taker-facing settlement router with fees and batching
//! - **Fees**: truncating fee fractions with discount passes
//! - **Engine**: flashloan-atomic arbitrage and BNPL envelopes
//!
//! ## Design Principles
//!
//! 1. **Determinism**: all state lives in ordered collections; identical
//!    transition histories produce identical state roots
//! 2. **No floating point**: all amounts are integer smallest units
//! 3. **Check-then-mutate**: every entry point validates completely
//!    before its first write, so a typed error never leaves partial
//!    state
//! 4. **Derived accounting**: available liquidity and locked collateral
//!    are recomputed from the open-option set, never cached

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: addresses, assets, orders, options, events
pub mod types;

/// Error taxonomy shared by every state transition
pub mod errors;

/// Order canonicalization and signer recovery
pub mod verifier;

/// Escrowed collateral and the protocol state machine
pub mod escrow;

/// Taker-facing settlement router
pub mod conduit;

/// Fee fractions and discount passes
pub mod fees;

/// Flashloan-atomic execution engine
pub mod engine;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use conduit::Conduit;
pub use engine::{AdapterRegistry, CallRouter, FlashEngine, LendingAdapter, LoanBook};
pub use errors::ProtocolError;
pub use escrow::{AssetBook, OptionRegistry, Pool, Protocol};
pub use fees::FeeManager;
pub use types::{
    Address, Ask, Bid, MarketCall, Nft, OptionContract, OptionType, PoolAsk, PoolBid,
    ProtocolEvent, ZERO_ADDRESS,
};
pub use verifier::{DomainSeparator, Keyring, OrderVerifier, TypedOrder};
