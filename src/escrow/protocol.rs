//! Protocol state container and the pool state machine.
//!
//! ## Architecture
//!
//! `Protocol` owns every piece of persistent state — the asset book, the
//! pool arena, the option registry, the loan book, the consumed-order
//! set, the verifier, and the event log — and exposes each §-level entry
//! point as one atomic check-then-mutate transition:
//!
//! - **Idle → Option-Open**: [`Protocol::write_option`], [`Protocol::accept_bid`]
//! - **Option-Open → Executed**: [`Protocol::execute_option`],
//!   [`Protocol::execute_option_with_sell`]
//! - **Option-Open → Cleared**: [`Protocol::clear_expired_options`]
//! - **Buy-backs / secondary**: [`Protocol::accept_ask`],
//!   [`Protocol::accept_pool_bid`], [`Protocol::transfer_option`]
//! - **Withdrawals**: [`Protocol::withdraw_balance`], [`Protocol::withdraw_nft`]
//!
//! Every transition validates completely before its first mutation, so a
//! typed error always leaves state untouched. The whole container is
//! `Clone`: the flashloan engine snapshots it before running external
//! calls and restores the snapshot on any failure.
//!
//! ## Determinism
//!
//! All collections iterate in a fixed order (`BTreeMap`/`BTreeSet` plus
//! monotonic slab insertion), so [`Protocol::compute_state_root`] is a
//! pure function of transition history.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use slab::Slab;

use crate::engine::LoanBook;
use crate::errors::ProtocolError;
use crate::escrow::{AssetBook, OptionRegistry, Pool};
use crate::fees::FeeManager;
use crate::types::{
    Address, Bid, Nft, OptionType, PoolAsk, PoolBid, ProtocolEvent, Ask,
};
use crate::verifier::OrderVerifier;

/// The protocol's entire persistent state.
#[derive(Debug, Clone)]
pub struct Protocol {
    /// Fungible balances and NFT ownership.
    book: AssetBook,

    /// Pool arena.
    pools: Slab<Pool>,

    /// Pool address to slab key (sorted for deterministic iteration).
    pool_index: BTreeMap<Address, usize>,

    /// Option token registry.
    registry: OptionRegistry,

    /// BNPL loan-option tokens.
    loans: LoanBook,

    /// Order canonicalization and signer recovery.
    verifier: OrderVerifier,

    /// Protocol fee schedule.
    fees: FeeManager,

    /// Consumed (issuer, order id) pairs; sparse, never a counter.
    consumed: BTreeSet<(Address, u64)>,

    /// Append-only settlement log.
    events: Vec<ProtocolEvent>,

    /// Re-entrancy guard held across flash envelopes.
    entered: bool,
}

impl Protocol {
    /// Create a protocol instance.
    pub fn new(verifier: OrderVerifier, fees: FeeManager) -> Self {
        Self {
            book: AssetBook::new(),
            pools: Slab::new(),
            pool_index: BTreeMap::new(),
            registry: OptionRegistry::new(),
            loans: LoanBook::new(),
            verifier,
            fees,
            consumed: BTreeSet::new(),
            events: Vec::new(),
            entered: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The asset book.
    #[inline]
    pub fn book(&self) -> &AssetBook {
        &self.book
    }

    /// The option registry.
    #[inline]
    pub fn registry(&self) -> &OptionRegistry {
        &self.registry
    }

    /// The order verifier.
    #[inline]
    pub fn verifier(&self) -> &OrderVerifier {
        &self.verifier
    }

    /// The fee schedule.
    #[inline]
    pub fn fees(&self) -> &FeeManager {
        &self.fees
    }

    /// The settlement log.
    #[inline]
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// A pool by address.
    pub fn pool(&self, address: &Address) -> Result<&Pool, ProtocolError> {
        self.pool_index
            .get(address)
            .and_then(|key| self.pools.get(*key))
            .ok_or(ProtocolError::UnknownPool(*address))
    }

    /// Whether (issuer, id) has been consumed.
    #[inline]
    pub fn is_consumed(&self, issuer: &Address, id: u64) -> bool {
        self.consumed.contains(&(*issuer, id))
    }

    /// (total, locked, available) accounting triple for a pool.
    pub fn pool_accounting(&self, address: &Address) -> Result<(u64, u64, u64), ProtocolError> {
        let pool = self.pool(address)?;
        let total = pool.total_balance(&self.book);
        let locked = pool.locked_strike_total(&self.registry);
        Ok((total, locked, total.saturating_sub(locked)))
    }

    /// Mutable book access for venue handlers and lending adapters,
    /// which settle their legs directly against the ledger.
    pub fn book_mut(&mut self) -> &mut AssetBook {
        &mut self.book
    }

    /// The BNPL loan book.
    #[inline]
    pub fn loans(&self) -> &LoanBook {
        &self.loans
    }

    pub(crate) fn loans_mut(&mut self) -> &mut LoanBook {
        &mut self.loans
    }

    pub(crate) fn registry_mut(&mut self) -> &mut OptionRegistry {
        &mut self.registry
    }

    pub(crate) fn push_event(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    fn pool_key(&self, address: &Address) -> Result<usize, ProtocolError> {
        self.pool_index
            .get(address)
            .copied()
            .ok_or(ProtocolError::UnknownPool(*address))
    }

    fn pool_mut(&mut self, key: usize) -> &mut Pool {
        &mut self.pools[key]
    }

    // ========================================================================
    // Boundary operations (genesis / bridge-in)
    // ========================================================================

    /// Register an account's signing key.
    pub fn register_signer(&mut self, address: Address, secret: [u8; 32]) {
        self.verifier.keyring_mut().register(address, secret);
    }

    /// Credit an external deposit to an account.
    pub fn credit_account(&mut self, holder: &Address, asset: &Address, amount: u64) {
        self.book.credit(holder, asset, amount);
    }

    /// Bring an externally bridged NFT into existence.
    pub fn mint_nft(&mut self, owner: &Address, nft: Nft) {
        self.book.mint_nft(owner, nft);
    }

    // ========================================================================
    // Pool lifecycle
    // ========================================================================

    /// Register a new pool.
    pub fn create_pool(
        &mut self,
        address: Address,
        owner: Address,
        asset: Address,
        collections: BTreeSet<Address>,
    ) -> Result<(), ProtocolError> {
        if self.pool_index.contains_key(&address) {
            return Err(ProtocolError::PoolExists(address));
        }
        let key = self.pools.insert(Pool::new(address, owner, asset, collections));
        self.pool_index.insert(address, key);
        self.events.push(ProtocolEvent::PoolCreated { pool: address, owner, asset });
        Ok(())
    }

    /// Set or clear a pool's secondary signer. Owner only.
    pub fn set_admin(
        &mut self,
        caller: &Address,
        pool: &Address,
        admin: Option<Address>,
    ) -> Result<(), ProtocolError> {
        let key = self.pool_key(pool)?;
        if self.pools[key].owner != *caller {
            return Err(ProtocolError::Unauthorized);
        }
        self.pool_mut(key).admin = admin;
        self.events.push(ProtocolEvent::AdminChanged { pool: *pool, admin });
        Ok(())
    }

    /// Deposit liquidity from `caller` into a pool's escrow.
    pub fn deposit(
        &mut self,
        caller: &Address,
        pool: &Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        let key = self.pool_key(pool)?;
        let asset = self.pools[key].asset;
        self.book.transfer(caller, pool, &asset, amount)?;
        self.events.push(ProtocolEvent::Deposited { pool: *pool, from: *caller, amount });
        Ok(())
    }

    /// Deposit an NFT from `caller` into a pool's escrow.
    pub fn deposit_nft(
        &mut self,
        caller: &Address,
        pool: &Address,
        nft: Nft,
    ) -> Result<(), ProtocolError> {
        let key = self.pool_key(pool)?;
        if !self.pools[key].supports_collection(&nft.collection) {
            return Err(ProtocolError::CollectionNotSupported);
        }
        self.book.transfer_nft(caller, pool, &nft)?;
        self.pool_mut(key).note_nft_in(nft);
        self.events.push(ProtocolEvent::NftDeposited { pool: *pool, nft });
        Ok(())
    }

    // ========================================================================
    // Order consumption
    // ========================================================================

    pub(crate) fn ensure_not_consumed(&self, issuer: &Address, id: u64) -> Result<(), ProtocolError> {
        if self.is_consumed(issuer, id) {
            return Err(ProtocolError::OrderFilledOrCancelled(*issuer, id));
        }
        Ok(())
    }

    pub(crate) fn consume(&mut self, issuer: &Address, id: u64) {
        self.consumed.insert((*issuer, id));
    }

    /// Cancel an order id without a counterparty.
    ///
    /// The (caller, id) pair becomes permanently unusable.
    pub fn cancel_order(&mut self, caller: &Address, id: u64) -> Result<(), ProtocolError> {
        self.ensure_not_consumed(caller, id)?;
        self.consume(caller, id);
        self.events.push(ProtocolEvent::OrderCancelled { issuer: *caller, order_id: id });
        Ok(())
    }

    // ========================================================================
    // Re-entrancy guard
    // ========================================================================

    pub(crate) fn ensure_not_entered(&self) -> Result<(), ProtocolError> {
        if self.entered {
            return Err(ProtocolError::Reentrancy);
        }
        Ok(())
    }

    pub(crate) fn begin_transaction(&mut self) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        self.entered = true;
        Ok(())
    }

    pub(crate) fn end_transaction(&mut self) {
        self.entered = false;
    }

    // ========================================================================
    // Idle -> Option-Open
    // ========================================================================

    /// Write a new option against a pool-signed ask.
    ///
    /// The caller pays exactly the ask's premium and receives the minted
    /// option token.
    pub fn write_option(
        &mut self,
        caller: &Address,
        ask: &PoolAsk,
        signature: &[u8],
        premium_paid: u64,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        self.ensure_not_entered()?;
        if premium_paid != ask.premium {
            return Err(ProtocolError::InsufficientPremium);
        }
        self.issue_option(caller, ask, signature, now, ask.premium, 0)
    }

    /// Shared issuance core for the direct and conduit paths.
    ///
    /// `premium_to_pool + fee` is what the caller pays; the split is the
    /// caller's (conduit's) responsibility and must equal the ask premium.
    pub(crate) fn issue_option(
        &mut self,
        caller: &Address,
        ask: &PoolAsk,
        signature: &[u8],
        now: u64,
        premium_to_pool: u64,
        fee: u64,
    ) -> Result<u64, ProtocolError> {
        let key = self.pool_key(&ask.pool)?;

        // Authorization: the ask must be signed by the pool owner or admin.
        let signers = self.pools[key].signers();
        self.verifier.verify_any(ask, signature, &signers)?;

        // Staleness: the order itself, and the right it would create.
        if now > ask.order_expiry || now > ask.expiry {
            return Err(ProtocolError::HasExpired);
        }

        // Replay.
        self.ensure_not_consumed(&ask.pool, ask.id)?;

        let option_type =
            OptionType::from_u8(ask.option_type_raw).ok_or(ProtocolError::OptionMismatch)?;

        // Collection: zero means the pool-bound v1 form.
        let pool = &self.pools[key];
        let collection = if ask.collection == [0u8; 32] {
            pool.primary_collection().ok_or(ProtocolError::CollectionNotSupported)?
        } else if pool.supports_collection(&ask.collection) {
            ask.collection
        } else {
            return Err(ProtocolError::CollectionNotSupported);
        };

        // Collateral.
        match option_type {
            OptionType::Call => {
                if ask.token_id == 0 {
                    return Err(ProtocolError::NftNotHeld);
                }
                let nft = Nft::new(collection, ask.token_id);
                if !pool.holds_nft(&nft) {
                    return Err(ProtocolError::NftNotHeld);
                }
                if pool.is_nft_locked(&nft, &self.registry) {
                    return Err(ProtocolError::RequestNftIsLocked);
                }
            }
            OptionType::Put => {
                if ask.strike == 0
                    || ask.strike > pool.available_balance(&self.book, &self.registry)
                {
                    return Err(ProtocolError::InvalidStrike);
                }
            }
        }

        // Premium: caller must actually hold the full payment.
        let asset = self.pools[key].asset;
        let fee_recipient = self.fees.recipient;
        if self.book.balance_of(caller, &asset) < premium_to_pool + fee {
            return Err(ProtocolError::InsufficientBalance);
        }

        // ---- Mutations ----
        self.consume(&ask.pool, ask.id);
        self.book.transfer(caller, &ask.pool, &asset, premium_to_pool)?;
        if fee > 0 {
            self.book.transfer(caller, &fee_recipient, &asset, fee)?;
            self.events.push(ProtocolEvent::FeePaid { recipient: fee_recipient, amount: fee });
        }

        let option_id = self.registry.mint(
            ask.pool,
            option_type,
            collection,
            ask.token_id,
            ask.strike,
            premium_to_pool + fee,
            ask.expiry,
            *caller,
        );
        self.pool_mut(key).open_insert(option_id);
        self.events.push(ProtocolEvent::OptionIssued {
            option_id,
            pool: ask.pool,
            holder: *caller,
            premium: premium_to_pool + fee,
            strike: ask.strike,
            expiry: ask.expiry,
        });
        Ok(option_id)
    }

    /// Write a new option against a buyer-signed bid. Pool owner/admin
    /// only; the buyer pays the bid price as premium and receives the
    /// token.
    pub fn accept_bid(
        &mut self,
        caller: &Address,
        pool: &Address,
        bid: &Bid,
        signature: &[u8],
        token_id: u64,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        self.ensure_not_entered()?;
        let key = self.pool_key(pool)?;
        if !self.pools[key].is_authorized_signer(caller) {
            return Err(ProtocolError::Unauthorized);
        }

        self.verifier.verify(bid, signature, bid.buyer)?;
        if now > bid.order_expiry || now > bid.expiry {
            return Err(ProtocolError::HasExpired);
        }
        self.ensure_not_consumed(&bid.buyer, bid.id)?;

        let option_type =
            OptionType::from_u8(bid.option_type_raw).ok_or(ProtocolError::OptionMismatch)?;

        let pool_ref = &self.pools[key];
        if bid.asset != pool_ref.asset {
            return Err(ProtocolError::AssetMismatch);
        }
        let collection = if bid.collection == [0u8; 32] {
            pool_ref.primary_collection().ok_or(ProtocolError::CollectionNotSupported)?
        } else if pool_ref.supports_collection(&bid.collection) {
            bid.collection
        } else {
            return Err(ProtocolError::CollectionNotSupported);
        };

        match option_type {
            OptionType::Call => {
                if token_id == 0 {
                    return Err(ProtocolError::NftNotHeld);
                }
                let nft = Nft::new(collection, token_id);
                if !pool_ref.holds_nft(&nft) {
                    return Err(ProtocolError::NftNotHeld);
                }
                if pool_ref.is_nft_locked(&nft, &self.registry) {
                    return Err(ProtocolError::RequestNftIsLocked);
                }
            }
            OptionType::Put => {
                if bid.strike == 0
                    || bid.strike > pool_ref.available_balance(&self.book, &self.registry)
                {
                    return Err(ProtocolError::InvalidStrike);
                }
            }
        }

        let asset = self.pools[key].asset;
        let buyer = bid.buyer;

        // ---- Mutations ----
        self.consume(&buyer, bid.id);
        self.book.transfer(&buyer, pool, &asset, bid.price)?;

        let option_id = self.registry.mint(
            *pool,
            option_type,
            collection,
            token_id,
            bid.strike,
            bid.price,
            bid.expiry,
            buyer,
        );
        self.pool_mut(key).open_insert(option_id);
        self.events.push(ProtocolEvent::OptionIssued {
            option_id,
            pool: *pool,
            holder: buyer,
            premium: bid.price,
            strike: bid.strike,
            expiry: bid.expiry,
        });
        Ok(option_id)
    }

    // ========================================================================
    // Option-Open -> Executed
    // ========================================================================

    /// Exercise a CALL: the holder pays the strike and takes the NFT.
    pub fn execute_option(
        &mut self,
        caller: &Address,
        option_id: u64,
        strike_paid: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let strike = self.registry.get(option_id)?.strike;
        if strike_paid == 0 || strike_paid != strike {
            return Err(ProtocolError::StrikeRequired);
        }
        self.exercise_call_as(option_id, caller, caller, caller, now)?;
        Ok(())
    }

    /// Exercise a PUT: the holder delivers an NFT and takes the locked
    /// strike.
    pub fn execute_option_with_sell(
        &mut self,
        caller: &Address,
        option_id: u64,
        nft: Nft,
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        self.exercise_put_as(option_id, caller, caller, caller, nft, now)?;
        Ok(())
    }

    /// CALL exercise with split roles: `holder` authorizes, `payer`
    /// funds the strike, `nft_recipient` takes delivery. The flash engine
    /// exercises on the holder's behalf with its own escrow account as
    /// payer and recipient.
    ///
    /// Returns the strike settled.
    pub(crate) fn exercise_call_as(
        &mut self,
        option_id: u64,
        holder: &Address,
        payer: &Address,
        nft_recipient: &Address,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let option = self.registry.get(option_id)?.clone();
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(option_id));
        }
        if self.registry.owner_of(option_id)? != *holder {
            return Err(ProtocolError::NotOptionOwner(option_id));
        }
        if option.is_expired(now) {
            return Err(ProtocolError::OptionExpired(option_id));
        }
        if option.option_type() != OptionType::Call {
            return Err(ProtocolError::OptionMismatch);
        }
        let nft = option.underlying().ok_or(ProtocolError::OptionMismatch)?;

        let key = self.pool_key(&option.pool)?;
        let asset = self.pools[key].asset;
        let (fee_recipient, fee) = self.fees.fee_data_for(option.strike, payer, &self.book);
        if self.book.balance_of(payer, &asset) < option.strike {
            return Err(ProtocolError::InsufficientBalance);
        }

        // ---- Mutations ----
        self.book.transfer(payer, &option.pool, &asset, option.strike - fee)?;
        if fee > 0 {
            self.book.transfer(payer, &fee_recipient, &asset, fee)?;
            self.events.push(ProtocolEvent::FeePaid { recipient: fee_recipient, amount: fee });
        }
        self.book.transfer_nft(&option.pool, nft_recipient, &nft)?;

        let pool = self.pool_mut(key);
        pool.note_nft_out(&nft);
        pool.open_remove(option_id);
        self.registry.burn(option_id)?;
        self.events.push(ProtocolEvent::OptionExecuted {
            option_id,
            pool: option.pool,
            amount: option.strike,
        });
        Ok(option.strike)
    }

    /// PUT exercise with split roles: `holder` authorizes,
    /// `nft_supplier` delivers the underlying, `payee` receives the
    /// strike.
    ///
    /// Returns the strike settled.
    pub(crate) fn exercise_put_as(
        &mut self,
        option_id: u64,
        holder: &Address,
        nft_supplier: &Address,
        payee: &Address,
        nft: Nft,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let option = self.registry.get(option_id)?.clone();
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(option_id));
        }
        if self.registry.owner_of(option_id)? != *holder {
            return Err(ProtocolError::NotOptionOwner(option_id));
        }
        if option.is_expired(now) {
            return Err(ProtocolError::OptionExpired(option_id));
        }
        if option.option_type() != OptionType::Put {
            return Err(ProtocolError::OptionMismatch);
        }
        if nft.collection != option.collection {
            return Err(ProtocolError::OptionMismatch);
        }
        if option.token_id != 0 && nft.token_id != option.token_id {
            return Err(ProtocolError::OptionMismatch);
        }
        if self.book.owner_of(&nft) != Some(*nft_supplier) {
            return Err(ProtocolError::NotAssetOwner);
        }

        let key = self.pool_key(&option.pool)?;
        let asset = self.pools[key].asset;
        let (fee_recipient, fee) = self.fees.fee_data_for(option.strike, payee, &self.book);

        // ---- Mutations ----
        // The strike was reserved at issuance; solvency guarantees the
        // pool balance covers it.
        self.book.transfer(&option.pool, payee, &asset, option.strike - fee)?;
        if fee > 0 {
            self.book.transfer(&option.pool, &fee_recipient, &asset, fee)?;
            self.events.push(ProtocolEvent::FeePaid { recipient: fee_recipient, amount: fee });
        }
        self.book.transfer_nft(nft_supplier, &option.pool, &nft)?;

        let pool = self.pool_mut(key);
        pool.note_nft_in(nft);
        pool.open_remove(option_id);
        self.registry.burn(option_id)?;
        self.events.push(ProtocolEvent::OptionExecuted {
            option_id,
            pool: option.pool,
            amount: option.strike,
        });
        Ok(option.strike)
    }

    // ========================================================================
    // Option-Open -> Cleared
    // ========================================================================

    /// Release collateral reserved by expired options.
    ///
    /// An empty `ids` slice sweeps every open option past expiry. Ids
    /// that are not open or not yet expired are skipped, so clearing the
    /// same id twice is a no-op, never a double-credit. The option token
    /// is deliberately NOT burned: it survives as an inert claim.
    ///
    /// Returns the ids actually cleared. Callable by anyone.
    pub fn clear_expired_options(
        &mut self,
        pool: &Address,
        ids: &[u64],
        now: u64,
    ) -> Result<Vec<u64>, ProtocolError> {
        self.ensure_not_entered()?;
        let key = self.pool_key(pool)?;

        let candidates: Vec<u64> = if ids.is_empty() {
            self.pools[key].open_options().collect()
        } else {
            ids.to_vec()
        };

        let mut cleared = Vec::new();
        for id in candidates {
            if !self.pools[key].is_open(id) {
                continue;
            }
            let Ok(option) = self.registry.get(id) else {
                continue;
            };
            if !option.is_expired(now) {
                continue;
            }
            self.pool_mut(key).open_remove(id);
            self.registry.get_mut(id)?.deactivate();
            self.events.push(ProtocolEvent::ExpiredOptionCleared { option_id: id, pool: *pool });
            cleared.push(id);
        }
        Ok(cleared)
    }

    // ========================================================================
    // Secondary markets on the pool
    // ========================================================================

    /// Pool buys a listed option at a seller-signed ask, paid from
    /// available liquidity. Owner/admin only. Buying back the pool's own
    /// option is a cancellation-by-return.
    pub fn accept_ask(
        &mut self,
        caller: &Address,
        pool: &Address,
        ask: &Ask,
        signature: &[u8],
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let key = self.pool_key(pool)?;
        if !self.pools[key].is_authorized_signer(caller) {
            return Err(ProtocolError::Unauthorized);
        }

        self.verifier.verify(ask, signature, ask.seller)?;

        let option = self.registry.get(ask.option_id)?.clone();
        // The listing is stale past its own expiry or the option's.
        if now > ask.order_expiry || now > option.expiry {
            return Err(ProtocolError::HasExpired);
        }
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(ask.option_id));
        }
        self.ensure_not_consumed(&ask.seller, ask.id)?;

        if ask.asset != self.pools[key].asset {
            return Err(ProtocolError::AssetMismatch);
        }
        if self.registry.owner_of(ask.option_id)? != ask.seller {
            return Err(ProtocolError::NotOptionOwner(ask.option_id));
        }
        if ask.price > self.pools[key].available_balance(&self.book, &self.registry) {
            return Err(ProtocolError::InsufficientLiquidity);
        }

        // ---- Mutations ----
        let asset = self.pools[key].asset;
        self.consume(&ask.seller, ask.id);
        self.book.transfer(pool, &ask.seller, &asset, ask.price)?;

        if option.pool == *pool {
            // Cancellation-by-return: burn and release the reservation.
            self.pool_mut(key).open_remove(ask.option_id);
            self.registry.burn(ask.option_id)?;
            self.events.push(ProtocolEvent::OptionBoughtBack {
                option_id: ask.option_id,
                pool: *pool,
                price: ask.price,
            });
        } else {
            self.registry.transfer(ask.option_id, &ask.seller, pool)?;
            self.events.push(ProtocolEvent::OptionSold {
                option_id: ask.option_id,
                seller: ask.seller,
                buyer: *pool,
                price: ask.price,
            });
        }
        Ok(())
    }

    /// Option holder sells the option back to its issuing pool at a
    /// pool-signed bid price, drawn from available liquidity.
    pub fn accept_pool_bid(
        &mut self,
        caller: &Address,
        pool_bid: &PoolBid,
        signature: &[u8],
        now: u64,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let option = self.registry.get(pool_bid.option_id)?.clone();
        let key = self.pool_key(&option.pool)?;

        let signers = self.pools[key].signers();
        self.verifier.verify_any(pool_bid, signature, &signers)?;

        if now > pool_bid.order_expiry || now > option.expiry {
            return Err(ProtocolError::HasExpired);
        }
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(pool_bid.option_id));
        }
        self.ensure_not_consumed(&option.pool, pool_bid.id)?;

        if pool_bid.asset != self.pools[key].asset {
            return Err(ProtocolError::AssetMismatch);
        }
        if self.registry.owner_of(pool_bid.option_id)? != *caller {
            return Err(ProtocolError::NotOptionOwner(pool_bid.option_id));
        }
        if pool_bid.price > self.pools[key].available_balance(&self.book, &self.registry) {
            return Err(ProtocolError::InsufficientLiquidity);
        }

        // ---- Mutations ----
        let asset = self.pools[key].asset;
        let pool_address = option.pool;
        self.consume(&pool_address, pool_bid.id);
        self.book.transfer(&pool_address, caller, &asset, pool_bid.price)?;
        self.pool_mut(key).open_remove(pool_bid.option_id);
        self.registry.burn(pool_bid.option_id)?;
        self.events.push(ProtocolEvent::OptionBoughtBack {
            option_id: pool_bid.option_id,
            pool: pool_address,
            price: pool_bid.price,
        });
        Ok(())
    }

    /// Transfer an option token. Transferring it back to its issuing
    /// pool is a cancellation-by-return: the token burns and its
    /// reservation is released without payment.
    pub fn transfer_option(
        &mut self,
        caller: &Address,
        option_id: u64,
        to: &Address,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let option = self.registry.get(option_id)?.clone();
        if option.pool == *to {
            let key = self.pool_key(&option.pool)?;
            if self.registry.owner_of(option_id)? != *caller {
                return Err(ProtocolError::NotOptionOwner(option_id));
            }
            self.pool_mut(key).open_remove(option_id);
            self.registry.burn(option_id)?;
            self.events.push(ProtocolEvent::OptionBoughtBack {
                option_id,
                pool: option.pool,
                price: 0,
            });
            return Ok(());
        }
        self.registry.transfer(option_id, caller, to)?;
        self.events.push(ProtocolEvent::OptionSold {
            option_id,
            seller: *caller,
            buyer: *to,
            price: 0,
        });
        Ok(())
    }

    // ========================================================================
    // Withdrawals
    // ========================================================================

    /// Owner-only withdrawal, limited to available balance.
    pub fn withdraw_balance(
        &mut self,
        caller: &Address,
        pool: &Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let key = self.pool_key(pool)?;
        if self.pools[key].owner != *caller {
            return Err(ProtocolError::Unauthorized);
        }
        if amount > self.pools[key].available_balance(&self.book, &self.registry) {
            return Err(ProtocolError::InsufficientLiquidity);
        }
        let asset = self.pools[key].asset;
        self.book.transfer(pool, caller, &asset, amount)?;
        self.events.push(ProtocolEvent::BalanceWithdrawn { pool: *pool, amount });
        Ok(())
    }

    /// Owner-only NFT withdrawal, limited to unlocked NFTs.
    pub fn withdraw_nft(
        &mut self,
        caller: &Address,
        pool: &Address,
        nft: Nft,
    ) -> Result<(), ProtocolError> {
        self.ensure_not_entered()?;
        let key = self.pool_key(pool)?;
        if self.pools[key].owner != *caller {
            return Err(ProtocolError::Unauthorized);
        }
        if !self.pools[key].holds_nft(&nft) {
            return Err(ProtocolError::NftNotHeld);
        }
        if self.pools[key].is_nft_locked(&nft, &self.registry) {
            return Err(ProtocolError::RequestNftIsLocked);
        }
        self.book.transfer_nft(pool, caller, &nft)?;
        self.pool_mut(key).note_nft_out(&nft);
        self.events.push(ProtocolEvent::NftWithdrawn { pool: *pool, nft });
        Ok(())
    }

    // ========================================================================
    // Solvency and state root
    // ========================================================================

    /// Check the accounting identities for every pool:
    /// `total >= locked`, and every locked NFT is actually escrowed.
    pub fn verify_solvency(&self) -> bool {
        for (_, pool) in self.pools.iter() {
            if pool.total_balance(&self.book) < pool.locked_strike_total(&self.registry) {
                return false;
            }
            for nft in pool.locked_nfts(&self.registry) {
                if !pool.holds_nft(&nft) {
                    return false;
                }
                if self.book.owner_of(&nft) != Some(pool.address) {
                    return false;
                }
            }
        }
        true
    }

    /// SHA-256 root over the protocol's deterministic state summary.
    pub fn compute_state_root(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();

        hasher.update(b"balances");
        for ((holder, asset), amount) in self.book.balances() {
            hasher.update(holder);
            hasher.update(asset);
            hasher.update(amount.to_le_bytes());
        }

        hasher.update(b"nfts");
        for (nft, owner) in self.book.nfts() {
            hasher.update(nft.collection);
            hasher.update(nft.token_id.to_le_bytes());
            hasher.update(owner);
        }

        hasher.update(b"consumed");
        for (issuer, id) in &self.consumed {
            hasher.update(issuer);
            hasher.update(id.to_le_bytes());
        }

        hasher.update(b"pools");
        for (address, key) in &self.pool_index {
            hasher.update(address);
            for id in self.pools[*key].open_options() {
                hasher.update(id.to_le_bytes());
            }
        }

        let mut root = [0u8; 32];
        root.copy_from_slice(&hasher.finalize());
        root
    }

    /// The state root as a hex string.
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.compute_state_root())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
