//! Per-liquidity-provider escrow pool.
//!
//! ## Accounting Rule
//!
//! A pool never caches derived balances. Available liquidity and the
//! locked-NFT set are recomputed from first principles on every query:
//!
//! ```text
//! available = total balance - sum(strike of every open PUT)
//! locked NFTs = { underlying of every open CALL }
//! ```
//!
//! A bug in one transition therefore cannot silently corrupt a value
//! relied on by another; the open-option set is the single source of
//! truth for what is reserved.

use std::collections::BTreeSet;

use crate::escrow::{AssetBook, OptionRegistry};
use crate::types::{Address, Nft, OptionType};

/// One escrow pool: a liquidity asset plus held NFTs, owned by a single
/// provider with an optional secondary (admin) signer.
#[derive(Debug, Clone)]
pub struct Pool {
    /// The pool's ledger identity; balances live in the asset book under
    /// this address.
    pub address: Address,

    /// The provider; sole withdrawer.
    pub owner: Address,

    /// Optional secondary signer for orders (owner XOR admin per check).
    pub admin: Option<Address>,

    /// Liquidity asset (zero = native).
    pub asset: Address,

    /// Collections this pool writes options against. The first entry is
    /// the primary collection implied by v1 (zero-collection) orders.
    collections: BTreeSet<Address>,

    /// NFTs currently escrowed in the pool.
    held_nfts: BTreeSet<Nft>,

    /// Ids of options this pool has issued and not yet settled/cleared.
    open_options: BTreeSet<u64>,
}

impl Pool {
    /// Create an empty pool.
    pub fn new(
        address: Address,
        owner: Address,
        asset: Address,
        collections: BTreeSet<Address>,
    ) -> Self {
        Self {
            address,
            owner,
            admin: None,
            asset,
            collections,
            held_nfts: BTreeSet::new(),
            open_options: BTreeSet::new(),
        }
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Whether `signer` may authorize orders for this pool.
    #[inline]
    pub fn is_authorized_signer(&self, signer: &Address) -> bool {
        *signer == self.owner || self.admin.as_ref() == Some(signer)
    }

    /// The owner/admin allow-list for signature checks.
    pub fn signers(&self) -> Vec<Address> {
        match self.admin {
            Some(admin) => vec![self.owner, admin],
            None => vec![self.owner],
        }
    }

    // ========================================================================
    // Collections and held NFTs
    // ========================================================================

    /// The v1 (pool-bound) collection, if any is configured.
    #[inline]
    pub fn primary_collection(&self) -> Option<Address> {
        self.collections.iter().next().copied()
    }

    /// Whether the pool writes options against `collection`.
    #[inline]
    pub fn supports_collection(&self, collection: &Address) -> bool {
        self.collections.contains(collection)
    }

    /// Whether the pool escrows `nft`.
    #[inline]
    pub fn holds_nft(&self, nft: &Nft) -> bool {
        self.held_nfts.contains(nft)
    }

    /// NFTs currently escrowed, in deterministic order.
    pub fn held_nfts(&self) -> impl Iterator<Item = &Nft> {
        self.held_nfts.iter()
    }

    /// Record an NFT entering escrow.
    pub(crate) fn note_nft_in(&mut self, nft: Nft) {
        self.held_nfts.insert(nft);
    }

    /// Record an NFT leaving escrow.
    pub(crate) fn note_nft_out(&mut self, nft: &Nft) {
        self.held_nfts.remove(nft);
    }

    // ========================================================================
    // Open options and derived accounting
    // ========================================================================

    /// Ids of open options, in deterministic order.
    pub fn open_options(&self) -> impl Iterator<Item = u64> + '_ {
        self.open_options.iter().copied()
    }

    /// Whether `option_id` is still open against this pool.
    #[inline]
    pub fn is_open(&self, option_id: u64) -> bool {
        self.open_options.contains(&option_id)
    }

    pub(crate) fn open_insert(&mut self, option_id: u64) {
        self.open_options.insert(option_id);
    }

    pub(crate) fn open_remove(&mut self, option_id: u64) -> bool {
        self.open_options.remove(&option_id)
    }

    /// Total strike amount reserved by open PUT options, recomputed from
    /// the open set.
    pub fn locked_strike_total(&self, registry: &OptionRegistry) -> u64 {
        self.open_options
            .iter()
            .filter_map(|id| registry.get(*id).ok())
            .filter(|option| option.option_type() == OptionType::Put)
            .map(|option| option.strike)
            .sum()
    }

    /// NFTs reserved by open CALL options, recomputed from the open set.
    pub fn locked_nfts(&self, registry: &OptionRegistry) -> BTreeSet<Nft> {
        self.open_options
            .iter()
            .filter_map(|id| registry.get(*id).ok())
            .filter(|option| option.option_type() == OptionType::Call)
            .filter_map(|option| option.underlying())
            .collect()
    }

    /// Whether `nft` backs an open CALL.
    pub fn is_nft_locked(&self, nft: &Nft, registry: &OptionRegistry) -> bool {
        self.locked_nfts(registry).contains(nft)
    }

    /// Total pool balance in its liquidity asset.
    #[inline]
    pub fn total_balance(&self, book: &AssetBook) -> u64 {
        book.balance_of(&self.address, &self.asset)
    }

    /// Liquidity not reserved by open PUT strikes.
    ///
    /// Recomputed from `total - locked` on every call; the subtraction
    /// saturates, but solvency checks assert it never actually would.
    pub fn available_balance(&self, book: &AssetBook, registry: &OptionRegistry) -> u64 {
        self.total_balance(book)
            .saturating_sub(self.locked_strike_total(registry))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
