//! Order conduit: the taker-facing settlement router.
//!
//! ## Role
//!
//! The conduit is the path retail flow takes into the protocol. It
//! settles the same signed orders the pool entry points do, but adds the
//! outer-surface concerns:
//!
//! - **Fees**: the protocol fee (with pass-holder discounts) is carved
//!   out of the premium or sale price routed through the conduit; the
//!   direct pool entry points stay fee-free
//! - **Batching**: [`Conduit::buy_options`] settles several asks
//!   all-or-nothing under a configured batch cap
//! - **Secondary market**: holder-to-buyer sales against signed [`Ask`]
//!   listings and standing [`Bid`] offers, including term matching
//!   within a bid's expiry allowance
//!
//! The conduit holds no state of its own beyond configuration; every
//! settlement is delegated to the protocol's transactional core.

use crate::errors::ProtocolError;
use crate::escrow::Protocol;
use crate::types::{Address, Ask, Bid, PoolAsk, ProtocolEvent};

/// Default cap on batched settlements.
pub const DEFAULT_MAX_BATCH: usize = 16;

/// Taker-facing settlement router.
#[derive(Debug, Clone)]
pub struct Conduit {
    max_batch: usize,
}

impl Default for Conduit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH)
    }
}

impl Conduit {
    /// Create a conduit with the given batch cap.
    pub fn new(max_batch: usize) -> Self {
        Self { max_batch }
    }

    /// The configured batch cap.
    #[inline]
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    // ========================================================================
    // Primary market
    // ========================================================================

    /// Settle one pool ask: the caller pays the premium, the protocol
    /// fee is carved out of it, and the option is minted to the caller.
    pub fn buy_option(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        ask: &PoolAsk,
        signature: &[u8],
        now: u64,
    ) -> Result<u64, ProtocolError> {
        protocol.ensure_not_entered()?;
        let (_, fee) = protocol.fees().fee_data_for(ask.premium, caller, protocol.book());
        protocol.issue_option(caller, ask, signature, now, ask.premium - fee, fee)
    }

    /// Settle several pool asks all-or-nothing.
    ///
    /// Any failure rolls the whole batch back; a batch beyond the cap is
    /// rejected before any work.
    pub fn buy_options(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        asks: &[(PoolAsk, Vec<u8>)],
        now: u64,
    ) -> Result<Vec<u64>, ProtocolError> {
        if asks.len() > self.max_batch {
            return Err(ProtocolError::BatchTooLarge(asks.len(), self.max_batch));
        }
        let snapshot = protocol.clone();
        let mut minted = Vec::with_capacity(asks.len());
        for (ask, signature) in asks {
            match self.buy_option(protocol, caller, ask, signature, now) {
                Ok(option_id) => minted.push(option_id),
                Err(err) => {
                    *protocol = snapshot;
                    return Err(err);
                }
            }
        }
        Ok(minted)
    }

    // ========================================================================
    // Secondary market
    // ========================================================================

    /// Buy a listed option from its holder at a seller-signed ask.
    ///
    /// The caller pays the full price; the seller receives it net of the
    /// protocol fee.
    pub fn accept_ask(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        ask: &Ask,
        signature: &[u8],
        now: u64,
    ) -> Result<(), ProtocolError> {
        protocol.ensure_not_entered()?;
        protocol.verifier().verify(ask, signature, ask.seller)?;

        let option = protocol.registry().get(ask.option_id)?.clone();
        if now > ask.order_expiry || now > option.expiry {
            return Err(ProtocolError::HasExpired);
        }
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(ask.option_id));
        }
        protocol.ensure_not_consumed(&ask.seller, ask.id)?;
        if protocol.registry().owner_of(ask.option_id)? != ask.seller {
            return Err(ProtocolError::NotOptionOwner(ask.option_id));
        }

        let (fee_recipient, fee) = protocol.fees().fee_data_for(ask.price, caller, protocol.book());
        if protocol.book().balance_of(caller, &ask.asset) < ask.price {
            return Err(ProtocolError::InsufficientBalance);
        }

        // ---- Mutations ----
        protocol.consume(&ask.seller, ask.id);
        protocol.book_mut().transfer(caller, &ask.seller, &ask.asset, ask.price - fee)?;
        if fee > 0 {
            protocol.book_mut().transfer(caller, &fee_recipient, &ask.asset, fee)?;
            protocol.push_event(ProtocolEvent::FeePaid { recipient: fee_recipient, amount: fee });
        }
        protocol.registry_mut().transfer(ask.option_id, &ask.seller, caller)?;
        protocol.push_event(ProtocolEvent::OptionSold {
            option_id: ask.option_id,
            seller: ask.seller,
            buyer: *caller,
            price: ask.price,
        });
        Ok(())
    }

    /// Sell an option the caller holds into a standing buyer-signed bid.
    ///
    /// The option's terms must match the bid exactly, except expiry,
    /// which may deviate from the bid's desired expiry by at most its
    /// allowance.
    pub fn accept_bid(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        bid: &Bid,
        signature: &[u8],
        option_id: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        protocol.ensure_not_entered()?;
        protocol.verifier().verify(bid, signature, bid.buyer)?;

        let option = protocol.registry().get(option_id)?.clone();
        if now > bid.order_expiry || now > option.expiry {
            return Err(ProtocolError::HasExpired);
        }
        if !option.is_active() {
            return Err(ProtocolError::OptionExpired(option_id));
        }
        protocol.ensure_not_consumed(&bid.buyer, bid.id)?;
        if protocol.registry().owner_of(option_id)? != *caller {
            return Err(ProtocolError::NotOptionOwner(option_id));
        }

        // Term matching: type, collection, and strike exactly; expiry
        // within the bid's allowance.
        if option.option_type_raw != bid.option_type_raw
            || option.collection != bid.collection
            || option.strike != bid.strike
            || option.expiry.abs_diff(bid.expiry) > bid.expiry_allowance
        {
            return Err(ProtocolError::OptionMismatch);
        }

        let (fee_recipient, fee) = protocol.fees().fee_data_for(bid.price, caller, protocol.book());
        if protocol.book().balance_of(&bid.buyer, &bid.asset) < bid.price {
            return Err(ProtocolError::InsufficientBalance);
        }

        // ---- Mutations ----
        protocol.consume(&bid.buyer, bid.id);
        protocol.book_mut().transfer(&bid.buyer, caller, &bid.asset, bid.price - fee)?;
        if fee > 0 {
            protocol.book_mut().transfer(&bid.buyer, &fee_recipient, &bid.asset, fee)?;
            protocol.push_event(ProtocolEvent::FeePaid { recipient: fee_recipient, amount: fee });
        }
        protocol.registry_mut().transfer(option_id, caller, &bid.buyer)?;
        protocol.push_event(ProtocolEvent::OptionSold {
            option_id,
            seller: *caller,
            buyer: bid.buyer,
            price: bid.price,
        });
        Ok(())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a listing the caller issued.
    pub fn cancel_ask(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        ask: &Ask,
    ) -> Result<(), ProtocolError> {
        if *caller != ask.seller {
            return Err(ProtocolError::Unauthorized);
        }
        protocol.cancel_order(caller, ask.id)
    }

    /// Cancel a standing bid the caller issued.
    pub fn cancel_bid(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        bid: &Bid,
    ) -> Result<(), ProtocolError> {
        if *caller != bid.buyer {
            return Err(ProtocolError::Unauthorized);
        }
        protocol.cancel_order(caller, bid.id)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeeManager;
    use crate::types::{address_from_tag, OptionType, ZERO_ADDRESS};
    use crate::verifier::{DomainSeparator, Keyring, OrderVerifier};
    use std::collections::BTreeSet;

    const NOW: u64 = 1_000;

    struct Harness {
        protocol: Protocol,
        conduit: Conduit,
        owner: Address,
        buyer: Address,
        seller: Address,
        pool: Address,
        collection: Address,
    }

    fn harness(fees: FeeManager) -> Harness {
        let owner = address_from_tag(1);
        let buyer = address_from_tag(2);
        let seller = address_from_tag(3);
        let pool = address_from_tag(10);
        let collection = address_from_tag(20);

        let domain = DomainSeparator::new("OptionForge", "1", 7, address_from_tag(0xFF));
        let mut keyring = Keyring::new();
        keyring.register(owner, [0x11; 32]);
        keyring.register(buyer, [0x22; 32]);
        keyring.register(seller, [0x33; 32]);
        let verifier = OrderVerifier::new(domain, keyring);

        let mut protocol = Protocol::new(verifier, fees);
        let mut collections = BTreeSet::new();
        collections.insert(collection);
        protocol.create_pool(pool, owner, ZERO_ADDRESS, collections).unwrap();

        Harness {
            protocol,
            conduit: Conduit::default(),
            owner,
            buyer,
            seller,
            pool,
            collection,
        }
    }

    /// 2.5% fee, no pass discounts.
    fn flat_fees(recipient: Address) -> FeeManager {
        FeeManager::new(recipient, 25, 1_000)
    }

    fn put_ask(h: &Harness, id: u64, strike: u64, premium: u64) -> PoolAsk {
        PoolAsk {
            id,
            pool: h.pool,
            option_type_raw: OptionType::Put.to_u8(),
            strike,
            premium,
            expiry: NOW + 1_000,
            collection: [0u8; 32],
            token_id: 0,
            order_expiry: NOW + 100,
        }
    }

    fn fund_pool(h: &mut Harness, amount: u64) {
        h.protocol.credit_account(&h.owner, &ZERO_ADDRESS, amount);
        h.protocol.deposit(&h.owner.clone(), &h.pool.clone(), amount).unwrap();
    }

    fn write_put_to(h: &mut Harness, holder: Address, ask_id: u64, strike: u64) -> u64 {
        h.protocol.credit_account(&holder, &ZERO_ADDRESS, 1);
        let ask = put_ask(h, ask_id, strike, 1);
        let sig = h.protocol.verifier().sign_order(&ask, &h.owner).unwrap();
        h.protocol.write_option(&holder, &ask, &sig, 1, NOW).unwrap()
    }

    #[test]
    fn test_buy_option_splits_premium_and_fee() {
        let recipient = address_from_tag(0xEE);
        let mut h = harness(flat_fees(recipient));
        fund_pool(&mut h, 1_000);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 200);

        // Premium 200 at 2.5%: fee 5, pool gets 195.
        let ask = put_ask(&h, 1, 100, 200);
        let sig = h.protocol.verifier().sign_order(&ask, &h.owner).unwrap();
        let option_id = h
            .conduit
            .buy_option(&mut h.protocol, &h.buyer, &ask, &sig, NOW)
            .unwrap();

        assert_eq!(h.protocol.registry().owner_of(option_id).unwrap(), h.buyer);
        assert_eq!(h.protocol.book().balance_of(&recipient, &ZERO_ADDRESS), 5);
        assert_eq!(h.protocol.pool_accounting(&h.pool).unwrap().0, 1_195);
        assert_eq!(h.protocol.book().balance_of(&h.buyer, &ZERO_ADDRESS), 0);
    }

    #[test]
    fn test_batch_settles_all_or_nothing() {
        let mut h = harness(FeeManager::disabled());
        fund_pool(&mut h, 1_000);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 2);

        let good = put_ask(&h, 1, 100, 1);
        let good_sig = h.protocol.verifier().sign_order(&good, &h.owner).unwrap();
        let mut stale = put_ask(&h, 2, 100, 1);
        stale.order_expiry = NOW - 1;
        let stale_sig = h.protocol.verifier().sign_order(&stale, &h.owner).unwrap();

        let root_before = h.protocol.compute_state_root();
        let err = h
            .conduit
            .buy_options(
                &mut h.protocol,
                &h.buyer,
                &[(good, good_sig.clone()), (stale, stale_sig)],
                NOW,
            )
            .unwrap_err();
        assert_eq!(err, ProtocolError::HasExpired);

        // Nothing settled: the good leg rolled back with the bad one.
        assert_eq!(h.protocol.compute_state_root(), root_before);
        assert!(h.protocol.registry().is_empty());
        assert!(!h.protocol.is_consumed(&h.pool, 1));
    }

    #[test]
    fn test_batch_cap_is_enforced() {
        let mut h = harness(FeeManager::disabled());
        h.conduit = Conduit::new(1);
        let asks = vec![
            (put_ask(&h, 1, 100, 1), vec![0u8; 32]),
            (put_ask(&h, 2, 100, 1), vec![0u8; 32]),
        ];
        let err = h
            .conduit
            .buy_options(&mut h.protocol, &h.buyer.clone(), &asks, NOW)
            .unwrap_err();
        assert_eq!(err, ProtocolError::BatchTooLarge(2, 1));
    }

    #[test]
    fn test_accept_ask_resells_option() {
        let recipient = address_from_tag(0xEE);
        let mut h = harness(flat_fees(recipient));
        fund_pool(&mut h, 1_000);
        let seller = h.seller;
        let option_id = write_put_to(&mut h, seller, 1, 100);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 200);

        // Seller lists at 200; 2.5% fee comes out of their proceeds.
        let listing = Ask {
            id: 7,
            option_id,
            order_expiry: NOW + 50,
            price: 200,
            seller: h.seller,
            asset: ZERO_ADDRESS,
        };
        let sig = h.protocol.verifier().sign_order(&listing, &h.seller).unwrap();
        h.conduit
            .accept_ask(&mut h.protocol, &h.buyer.clone(), &listing, &sig, NOW)
            .unwrap();

        assert_eq!(h.protocol.registry().owner_of(option_id).unwrap(), h.buyer);
        assert_eq!(h.protocol.book().balance_of(&h.seller, &ZERO_ADDRESS), 195);
        assert_eq!(h.protocol.book().balance_of(&recipient, &ZERO_ADDRESS), 5);
        assert!(h.protocol.is_consumed(&h.seller, 7));
    }

    #[test]
    fn test_accept_ask_rejects_stale_listing() {
        let mut h = harness(FeeManager::disabled());
        fund_pool(&mut h, 1_000);
        let seller = h.seller;
        let option_id = write_put_to(&mut h, seller, 1, 100);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 200);

        let listing = Ask {
            id: 7,
            option_id,
            order_expiry: NOW - 1,
            price: 200,
            seller: h.seller,
            asset: ZERO_ADDRESS,
        };
        let sig = h.protocol.verifier().sign_order(&listing, &h.seller).unwrap();
        let err = h
            .conduit
            .accept_ask(&mut h.protocol, &h.buyer.clone(), &listing, &sig, NOW)
            .unwrap_err();
        assert_eq!(err, ProtocolError::HasExpired);
    }

    #[test]
    fn test_accept_ask_requires_seller_still_holds() {
        let mut h = harness(FeeManager::disabled());
        fund_pool(&mut h, 1_000);
        let seller = h.seller;
        let option_id = write_put_to(&mut h, seller, 1, 100);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 400);

        let listing = Ask {
            id: 7,
            option_id,
            order_expiry: NOW + 50,
            price: 200,
            seller: h.seller,
            asset: ZERO_ADDRESS,
        };
        let sig = h.protocol.verifier().sign_order(&listing, &h.seller).unwrap();

        // The seller moves the option away before settlement.
        h.protocol
            .transfer_option(&h.seller.clone(), option_id, &address_from_tag(9))
            .unwrap();
        let err = h
            .conduit
            .accept_ask(&mut h.protocol, &h.buyer.clone(), &listing, &sig, NOW)
            .unwrap_err();
        assert_eq!(err, ProtocolError::NotOptionOwner(option_id));
    }

    #[test]
    fn test_accept_bid_matches_terms_within_allowance() {
        let mut h = harness(FeeManager::disabled());
        fund_pool(&mut h, 1_000);
        let seller = h.seller;
        let option_id = write_put_to(&mut h, seller, 1, 100);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 50);

        // Option expiry is NOW + 1_000; the bid wants NOW + 960 with an
        // allowance of 50, so it matches.
        let bid = Bid {
            id: 9,
            price: 50,
            asset: ZERO_ADDRESS,
            collection: h.collection,
            order_expiry: NOW + 50,
            buyer: h.buyer,
            option_type_raw: OptionType::Put.to_u8(),
            strike: 100,
            expiry: NOW + 960,
            expiry_allowance: 50,
            option_token: [0u8; 32],
        };
        let sig = h.protocol.verifier().sign_order(&bid, &h.buyer).unwrap();
        h.conduit
            .accept_bid(&mut h.protocol, &h.seller.clone(), &bid, &sig, option_id, NOW)
            .unwrap();

        assert_eq!(h.protocol.registry().owner_of(option_id).unwrap(), h.buyer);
        assert_eq!(h.protocol.book().balance_of(&h.seller, &ZERO_ADDRESS), 50);
    }

    #[test]
    fn test_accept_bid_rejects_terms_outside_allowance() {
        let mut h = harness(FeeManager::disabled());
        fund_pool(&mut h, 1_000);
        let seller = h.seller;
        let option_id = write_put_to(&mut h, seller, 1, 100);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 50);

        let mut bid = Bid {
            id: 9,
            price: 50,
            asset: ZERO_ADDRESS,
            collection: h.collection,
            order_expiry: NOW + 50,
            buyer: h.buyer,
            option_type_raw: OptionType::Put.to_u8(),
            strike: 100,
            expiry: NOW + 900,
            expiry_allowance: 50,
            option_token: [0u8; 32],
        };
        // Expiry off by 100 with allowance 50.
        let sig = h.protocol.verifier().sign_order(&bid, &h.buyer).unwrap();
        let err = h
            .conduit
            .accept_bid(&mut h.protocol, &h.seller.clone(), &bid, &sig, option_id, NOW)
            .unwrap_err();
        assert_eq!(err, ProtocolError::OptionMismatch);

        // Wrong strike likewise.
        bid.expiry = NOW + 1_000;
        bid.strike = 99;
        let sig = h.protocol.verifier().sign_order(&bid, &h.buyer).unwrap();
        let err = h
            .conduit
            .accept_bid(&mut h.protocol, &h.seller.clone(), &bid, &sig, option_id, NOW)
            .unwrap_err();
        assert_eq!(err, ProtocolError::OptionMismatch);
    }

    #[test]
    fn test_cancel_requires_issuer() {
        let mut h = harness(FeeManager::disabled());
        let listing = Ask {
            id: 7,
            option_id: 1,
            order_expiry: NOW + 50,
            price: 200,
            seller: h.seller,
            asset: ZERO_ADDRESS,
        };
        let err = h
            .conduit
            .cancel_ask(&mut h.protocol, &h.buyer.clone(), &listing)
            .unwrap_err();
        assert_eq!(err, ProtocolError::Unauthorized);

        h.conduit
            .cancel_ask(&mut h.protocol, &h.seller.clone(), &listing)
            .unwrap();
        assert!(h.protocol.is_consumed(&h.seller, 7));
    }

    #[test]
    fn test_fee_discount_applies_through_conduit() {
        let recipient = address_from_tag(0xEE);
        let pass = address_from_tag(0xDD);
        // 2.5% fee, 20% off per pass, capped at 100%.
        let fees = FeeManager::new(recipient, 25, 1_000).with_discount(pass, 200, 1_000);
        let mut h = harness(fees);
        fund_pool(&mut h, 1_000);

        // Buyer holds two passes: 40% off the 5-unit fee leaves 3.
        h.protocol.credit_account(&h.buyer, &pass, 2);
        h.protocol.credit_account(&h.buyer, &ZERO_ADDRESS, 200);
        let ask = put_ask(&h, 1, 100, 200);
        let sig = h.protocol.verifier().sign_order(&ask, &h.owner).unwrap();
        h.conduit
            .buy_option(&mut h.protocol, &h.buyer, &ask, &sig, NOW)
            .unwrap();

        assert_eq!(h.protocol.book().balance_of(&recipient, &ZERO_ADDRESS), 3);
        assert_eq!(h.protocol.pool_accounting(&h.pool).unwrap().0, 1_197);
    }
}
