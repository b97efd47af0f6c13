//! Escrowed collateral: asset ledger, option registry, pools, and the
//! protocol state machine that ties them together.
//!
//! ## Components
//!
//! - [`AssetBook`]: fungible balances and NFT ownership
//! - [`OptionRegistry`]: mint/burn/transfer of option tokens
//! - [`Pool`]: per-provider escrow with derived accounting
//! - [`Protocol`]: the atomic check-then-mutate entry points

pub mod book;
pub mod pool;
pub mod protocol;
pub mod registry;

pub use book::AssetBook;
pub use pool::Pool;
pub use protocol::Protocol;
pub use registry::OptionRegistry;
