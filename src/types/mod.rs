//! Core data types for the options protocol.
//!
//! Signed orders and persisted records implement SSZ serialization for
//! deterministic encoding; all amounts are `u64` in the settlement asset's
//! smallest denomination.
//!
//! ## Types
//!
//! - [`Address`] / [`Nft`]: participant, pool, and underlying identifiers
//! - [`OptionType`] / [`OptionContract`]: the option right itself
//! - [`PoolAsk`], [`PoolBid`], [`Ask`], [`Bid`]: signed order layouts
//! - [`MarketCall`]: one relayer-signed external call in a flash envelope
//! - [`ProtocolEvent`]: append-only settlement log entries
//!
//! ## Fixed-Point Arithmetic
//!
//! Settlement math never leaves integer space; [`mul_frac`] is the single
//! fee-fraction primitive and always truncates.

mod asset;
mod event;
mod option;
mod order;

// Re-export all types at module level
pub use asset::{
    address_from_tag, format_units, mul_frac, parse_units, short_hex, Address, Nft,
    ZERO_ADDRESS,
};
pub use event::ProtocolEvent;
pub use option::{OptionContract, OptionType};
pub use order::{Ask, Bid, MarketCall, PoolAsk, PoolBid};
