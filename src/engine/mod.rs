//! Flashloan-atomic execution engine.
//!
//! ## Design Principles
//!
//! The engine is designed for:
//!
//! 1. **Atomicity**: every envelope settles completely or rolls back to
//!    a pre-envelope snapshot
//! 2. **Determinism**: same protocol state and inputs always produce the
//!    same settlement
//! 3. **Signed routing**: no external call runs without a relayer
//!    signature over its exact target, value, and payload
//! 4. **Zero float**: the engine account starts and ends every envelope
//!    empty
//!
//! ## Components
//!
//! - [`FlashEngine`]: arbitrage and BNPL envelopes over flash liquidity
//! - [`CallRouter`] / [`CallHandler`]: signed external-venue dispatch
//! - [`AdapterRegistry`] / [`LendingAdapter`]: pluggable lending venues
//! - [`LoanBook`]: open loan-option positions

pub mod bnpl;
pub mod calls;
pub mod flashloan;

pub use bnpl::{AdapterRegistry, BorrowReceipt, BorrowRequest, LendingAdapter, Loan, LoanBook};
pub use calls::{call_digest, sign_call, verify_call_batch, CallHandler, CallRouter};
pub use flashloan::FlashEngine;
