//! Protocol error taxonomy.
//!
//! Every entry point surfaces failure by aborting the whole transition and
//! returning exactly one of these variants; there are no partial commits and
//! no silent `false` returns. The categories mirror the preconditions a
//! transition checks:
//!
//! - **Authorization**: wrong signer, caller not owner/admin/holder
//! - **Staleness**: order, option, or loan past its deadline
//! - **Replay**: order id already consumed or cancelled
//! - **Liquidity**: insufficient balance, strike, or premium
//! - **Integrity**: malformed input, missing or locked collateral
//! - **External**: unregistered adapter or failing routed call

use thiserror::Error;

use crate::types::Address;

/// Unified error type for every protocol state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------
    /// The signature does not authenticate under any registered signer.
    #[error("signature does not recover a registered signer")]
    InvalidSignature,

    /// The signature bytes have the wrong shape (not a 32-byte MAC).
    #[error("malformed signature: expected 32 bytes, got {0}")]
    MalformedSignature(usize),

    /// The recovered signer differs from the order's claimed issuer.
    #[error("recovered signer does not match claimed issuer")]
    SignerMismatch,

    /// The caller is not authorized for this entry point.
    #[error("caller is not the pool owner or admin")]
    Unauthorized,

    /// The caller does not hold the option token it is exercising.
    #[error("caller does not own option {0}")]
    NotOptionOwner(u64),

    /// The caller does not own the asset it is delivering.
    #[error("caller does not own the delivered asset")]
    NotAssetOwner,

    // ------------------------------------------------------------------
    // Staleness
    // ------------------------------------------------------------------
    /// The order's validity window has passed.
    #[error("order has expired")]
    HasExpired,

    /// The referenced option is past its expiry.
    #[error("option {0} has expired")]
    OptionExpired(u64),

    /// The BNPL loan is past its maturity.
    #[error("loan {0} has expired")]
    LoanHasExpired(u64),

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------
    /// The (issuer, id) pair was already consumed or cancelled.
    #[error("order {1} from issuer {} was already filled or cancelled", hex::encode(.0))]
    OrderFilledOrCancelled(Address, u64),

    // ------------------------------------------------------------------
    // Liquidity
    // ------------------------------------------------------------------
    /// The strike is zero or exceeds the pool's available liquidity.
    #[error("invalid strike: zero or beyond available liquidity")]
    InvalidStrike,

    /// The premium supplied does not equal the order's premium.
    #[error("premium supplied does not match the order")]
    InsufficientPremium,

    /// The strike payment is missing or does not match the option.
    #[error("strike payment required")]
    StrikeRequired,

    /// A holder lacks the fungible balance for a transfer.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// The pool's available (unlocked) liquidity cannot cover the payout.
    #[error("insufficient available liquidity")]
    InsufficientLiquidity,

    /// Flashloan proceeds cannot cover repayment plus fee.
    #[error("proceeds do not cover flashloan repayment")]
    InsufficientProceeds,

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------
    /// The requested NFT is reserved by an open option.
    #[error("requested NFT is locked by an open option")]
    RequestNftIsLocked,

    /// The pool does not hold the referenced NFT.
    #[error("NFT is not held by the pool")]
    NftNotHeld,

    /// The pool does not support the order's collection.
    #[error("collection is not supported by the pool")]
    CollectionNotSupported,

    /// The order's settlement asset differs from the pool's.
    #[error("settlement asset does not match the pool")]
    AssetMismatch,

    /// The option does not satisfy the order's required terms.
    #[error("option terms do not match the order")]
    OptionMismatch,

    /// Call and signature lists differ in length.
    #[error("call list length {calls} does not match signature list length {signatures}")]
    LengthMismatch { calls: usize, signatures: usize },

    /// The signed call sequence is empty.
    #[error("signed call sequence is empty")]
    EmptyCallSequence,

    /// A batch exceeds the conduit's configured maximum.
    #[error("batch of {0} exceeds the conduit maximum of {1}")]
    BatchTooLarge(usize, usize),

    /// No pool is registered at this address.
    #[error("unknown pool {}", hex::encode(.0))]
    UnknownPool(Address),

    /// A pool is already registered at this address.
    #[error("pool already exists at {}", hex::encode(.0))]
    PoolExists(Address),

    /// No option token exists with this id.
    #[error("unknown option {0}")]
    UnknownOption(u64),

    /// No loan token exists with this id.
    #[error("unknown loan {0}")]
    UnknownLoan(u64),

    /// A guarded entry point was re-entered mid-transition.
    #[error("re-entrant call into a guarded entry point")]
    Reentrancy,

    /// Canonical encoding of an order failed.
    #[error("canonical encoding failed: {0}")]
    Serialization(String),

    // ------------------------------------------------------------------
    // External
    // ------------------------------------------------------------------
    /// No adapter is registered for this lending protocol.
    #[error("no lending adapter registered for {}", hex::encode(.0))]
    UnknownAdapter(Address),

    /// A routed external call failed or targeted an unregistered handler.
    #[error("external call to {} failed", hex::encode(.0))]
    ExternalCallFailed(Address),
}

// ============================================================================
// Unit Tests
// ============================================================================
