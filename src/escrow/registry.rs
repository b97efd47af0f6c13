//! Option token registry.
//!
//! ## Architecture
//!
//! The registry mints and burns the transferable token representing each
//! outstanding option right, mirroring the book's storage layout:
//!
//! - **Slab**: pre-allocated storage for O(1) mint/burn/lookup
//! - **HashMap**: option id to slab key, and option id to current owner
//!
//! Ids are assigned monotonically from 1 and never reused, so a burned
//! option's id can never be confused with a live one.

use std::collections::HashMap;

use slab::Slab;

use crate::errors::ProtocolError;
use crate::types::{Address, OptionContract, OptionType};

/// Mints, burns, and tracks ownership of option tokens.
#[derive(Debug, Clone)]
pub struct OptionRegistry {
    /// Pre-allocated contract storage
    options: Slab<OptionContract>,

    /// Option id to slab key
    index: HashMap<u64, usize>,

    /// Option id to current holder
    owners: HashMap<u64, Address>,

    /// Next option id (ids start at 1; 0 is never issued)
    next_id: u64,
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            options: Slab::new(),
            index: HashMap::new(),
            owners: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create a registry with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            options: Slab::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            owners: HashMap::with_capacity(capacity),
            next_id: 1,
        }
    }

    /// Number of outstanding option tokens.
    #[inline]
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether no option tokens are outstanding.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Whether an option token exists.
    #[inline]
    pub fn contains(&self, option_id: u64) -> bool {
        self.index.contains_key(&option_id)
    }

    /// Mint a new option token to `holder`, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub fn mint(
        &mut self,
        pool: Address,
        option_type: OptionType,
        collection: Address,
        token_id: u64,
        strike: u64,
        premium: u64,
        expiry: u64,
        holder: Address,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let contract = OptionContract::new(
            id, pool, option_type, collection, token_id, strike, premium, expiry,
        );
        let key = self.options.insert(contract);
        self.index.insert(id, key);
        self.owners.insert(id, holder);
        id
    }

    /// Burn an option token, returning its contract.
    pub fn burn(&mut self, option_id: u64) -> Result<OptionContract, ProtocolError> {
        let key = self
            .index
            .remove(&option_id)
            .ok_or(ProtocolError::UnknownOption(option_id))?;
        self.owners.remove(&option_id);
        Ok(self.options.remove(key))
    }

    /// Get an option contract by id.
    pub fn get(&self, option_id: u64) -> Result<&OptionContract, ProtocolError> {
        self.index
            .get(&option_id)
            .and_then(|key| self.options.get(*key))
            .ok_or(ProtocolError::UnknownOption(option_id))
    }

    /// Get a mutable option contract by id.
    pub fn get_mut(&mut self, option_id: u64) -> Result<&mut OptionContract, ProtocolError> {
        let key = self
            .index
            .get(&option_id)
            .copied()
            .ok_or(ProtocolError::UnknownOption(option_id))?;
        self.options
            .get_mut(key)
            .ok_or(ProtocolError::UnknownOption(option_id))
    }

    /// Current holder of an option token.
    pub fn owner_of(&self, option_id: u64) -> Result<Address, ProtocolError> {
        self.owners
            .get(&option_id)
            .copied()
            .ok_or(ProtocolError::UnknownOption(option_id))
    }

    /// Transfer an option token, failing fast unless `from` holds it.
    pub fn transfer(
        &mut self,
        option_id: u64,
        from: &Address,
        to: &Address,
    ) -> Result<(), ProtocolError> {
        let owner = self
            .owners
            .get_mut(&option_id)
            .ok_or(ProtocolError::UnknownOption(option_id))?;
        if owner != from {
            return Err(ProtocolError::NotOptionOwner(option_id));
        }
        *owner = *to;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
