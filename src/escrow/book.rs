//! Fungible and non-fungible asset ledger.
//!
//! ## Architecture
//!
//! The asset book is the single source of truth for who holds what:
//!
//! - **Balances**: `(holder, asset)` pairs mapped to `u64` amounts, where
//!   the zero asset address denotes the native asset
//! - **NFT ownership**: each `(collection, token_id)` mapped to its owner
//!
//! Both maps are `BTreeMap` so iteration order is deterministic — the
//! protocol state root hashes the book's contents directly.
//!
//! Transfers fail fast: a debit beyond the holder's balance or a transfer
//! of an NFT the sender does not own leaves the book untouched and
//! returns a typed error.

use std::collections::BTreeMap;

use crate::errors::ProtocolError;
use crate::types::{Address, Nft};

/// Ledger of fungible balances and NFT ownership.
#[derive(Debug, Clone, Default)]
pub struct AssetBook {
    /// (holder, asset) -> balance in smallest units
    balances: BTreeMap<(Address, Address), u64>,

    /// NFT -> current owner
    nft_owner: BTreeMap<Nft, Address>,
}

impl AssetBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Fungible balances
    // ========================================================================

    /// Balance of `holder` in `asset` (zero asset = native).
    #[inline]
    pub fn balance_of(&self, holder: &Address, asset: &Address) -> u64 {
        self.balances.get(&(*holder, *asset)).copied().unwrap_or(0)
    }

    /// Credit `holder` with `amount` of `asset` (deposit boundary).
    pub fn credit(&mut self, holder: &Address, asset: &Address, amount: u64) {
        if amount == 0 {
            return;
        }
        *self.balances.entry((*holder, *asset)).or_insert(0) += amount;
    }

    /// Debit `holder` by `amount` of `asset`, failing fast if short.
    pub fn debit(
        &mut self,
        holder: &Address,
        asset: &Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        if amount == 0 {
            return Ok(());
        }
        let entry = self
            .balances
            .get_mut(&(*holder, *asset))
            .filter(|balance| **balance >= amount)
            .ok_or(ProtocolError::InsufficientBalance)?;
        *entry -= amount;
        if *entry == 0 {
            self.balances.remove(&(*holder, *asset));
        }
        Ok(())
    }

    /// Move `amount` of `asset` from one holder to another.
    ///
    /// Either both legs apply or neither does.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        self.debit(from, asset, amount)?;
        self.credit(to, asset, amount);
        Ok(())
    }

    // ========================================================================
    // NFTs
    // ========================================================================

    /// Current owner of an NFT, if it exists.
    #[inline]
    pub fn owner_of(&self, nft: &Nft) -> Option<Address> {
        self.nft_owner.get(nft).copied()
    }

    /// Bring an NFT into existence under `owner` (mint boundary).
    pub fn mint_nft(&mut self, owner: &Address, nft: Nft) {
        self.nft_owner.insert(nft, *owner);
    }

    /// Transfer an NFT, failing fast unless `from` owns it.
    pub fn transfer_nft(
        &mut self,
        from: &Address,
        to: &Address,
        nft: &Nft,
    ) -> Result<(), ProtocolError> {
        match self.nft_owner.get_mut(nft) {
            Some(owner) if owner == from => {
                *owner = *to;
                Ok(())
            }
            _ => Err(ProtocolError::NotAssetOwner),
        }
    }

    // ========================================================================
    // Deterministic iteration (state root)
    // ========================================================================

    /// All nonzero balances, in deterministic order.
    pub fn balances(&self) -> impl Iterator<Item = (&(Address, Address), &u64)> {
        self.balances.iter()
    }

    /// All NFTs and their owners, in deterministic order.
    pub fn nfts(&self) -> impl Iterator<Item = (&Nft, &Address)> {
        self.nft_owner.iter()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
