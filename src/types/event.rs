//! Protocol event log types.
//!
//! Every state transition in the pool, conduit, and flashloan engine
//! appends exactly one (or, for fee splits, two) events. Each variant
//! carries enough identifying data — option id, pool, counterpart,
//! price — that the ledger's effective state can be reconstructed from
//! the event log alone.

use crate::types::asset::{Address, Nft};

/// An entry in the protocol's append-only event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A pool was registered.
    PoolCreated {
        pool: Address,
        owner: Address,
        asset: Address,
    },

    /// A pool's secondary signer changed (`None` clears it).
    AdminChanged {
        pool: Address,
        admin: Option<Address>,
    },

    /// Liquidity entered the pool's escrow.
    Deposited {
        pool: Address,
        from: Address,
        amount: u64,
    },

    /// An NFT entered the pool's escrow.
    NftDeposited { pool: Address, nft: Nft },

    /// A new option was written against pool collateral.
    OptionIssued {
        option_id: u64,
        pool: Address,
        holder: Address,
        premium: u64,
        strike: u64,
        expiry: u64,
    },

    /// An option was exercised; `amount` is the strike settled.
    OptionExecuted {
        option_id: u64,
        pool: Address,
        amount: u64,
    },

    /// An option token changed hands on the secondary market.
    OptionSold {
        option_id: u64,
        seller: Address,
        buyer: Address,
        price: u64,
    },

    /// A pool bought back its own option (cancellation-by-return).
    OptionBoughtBack {
        option_id: u64,
        pool: Address,
        price: u64,
    },

    /// An expired option's collateral was released by a sweep.
    ExpiredOptionCleared { option_id: u64, pool: Address },

    /// An (issuer, id) pair was cancelled without a counterparty.
    OrderCancelled { issuer: Address, order_id: u64 },

    /// A protocol fee was forwarded to the fee recipient.
    FeePaid { recipient: Address, amount: u64 },

    /// The pool owner withdrew available balance.
    BalanceWithdrawn { pool: Address, amount: u64 },

    /// The pool owner withdrew an unlocked NFT.
    NftWithdrawn { pool: Address, nft: Nft },

    /// A flashloan arbitrage settled; `profit` went to the caller.
    FlashArbitrage {
        option_id: u64,
        borrowed: u64,
        profit: u64,
    },

    /// A BNPL loan-option was opened.
    LoanOpened {
        loan_id: u64,
        borrower: Address,
        adapter: Address,
        repayment: u64,
        maturity: u64,
    },

    /// A BNPL loan was repaid and its collateral reclaimed.
    LoanRepaid { loan_id: u64, profit: u64 },
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::asset::address_from_tag;

    #[test]
    fn test_events_carry_identifying_data() {
        let event = ProtocolEvent::OptionIssued {
            option_id: 1,
            pool: address_from_tag(10),
            holder: address_from_tag(2),
            premium: 1,
            strike: 10,
            expiry: 1_000,
        };
        match event {
            ProtocolEvent::OptionIssued { option_id, strike, .. } => {
                assert_eq!(option_id, 1);
                assert_eq!(strike, 10);
            }
            _ => panic!("wrong variant"),
        }
    }
}
