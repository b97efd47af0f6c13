//! Flashloan-atomic execution engine.
//!
//! ## Atomicity
//!
//! Every engine envelope runs against a snapshot: the whole protocol
//! state is cloned before the first mutation, and any error restores the
//! snapshot. An envelope therefore either settles completely — option
//! exercised, venues paid, vault repaid with its fee, profit delivered —
//! or leaves no trace at all, including no consumed order ids and no
//! events.
//!
//! ## Roles
//!
//! - **account**: the engine's transient escrow address. Borrowed funds
//!   and in-flight NFTs pass through it; it starts and ends every
//!   envelope empty.
//! - **vault**: the flash-liquidity address. Lends the borrowed amount
//!   and is repaid principal plus the configured fee fraction.
//! - **relayer**: the key that must have signed every routed
//!   [`MarketCall`] in the envelope.
//!
//! ## Envelopes
//!
//! - [`FlashEngine::arbitrage`]: exercise an in-the-money option the
//!   caller holds without the caller fronting the strike.
//! - [`FlashEngine::bnpl`]: finance a CALL exercise through a lending
//!   venue, leaving the caller a loan-option on the NFT.
//! - [`FlashEngine::execute_loan_option`] /
//!   [`FlashEngine::execute_loan_option_with_arbitrage`]: settle a
//!   loan-option directly or by flash-selling its collateral.

use crate::engine::bnpl::{AdapterRegistry, BorrowReceipt, BorrowRequest};
use crate::engine::calls::{verify_call_batch, CallRouter};
use crate::errors::ProtocolError;
use crate::escrow::Protocol;
use crate::types::{mul_frac, Address, MarketCall, Nft, OptionType, ProtocolEvent};

/// Flashloan-atomic settlement over a [`Protocol`].
#[derive(Debug, Clone)]
pub struct FlashEngine {
    /// Transient escrow address for in-flight funds and NFTs.
    account: Address,

    /// Flash-liquidity vault address.
    vault: Address,

    /// Required signer of every routed call.
    relayer: Address,

    /// Vault fee fraction numerator.
    fee_numerator: u64,

    /// Vault fee fraction denominator.
    fee_denominator: u64,
}

impl FlashEngine {
    /// Create an engine over the given role addresses and vault fee.
    pub fn new(
        account: Address,
        vault: Address,
        relayer: Address,
        fee_numerator: u64,
        fee_denominator: u64,
    ) -> Self {
        Self { account, vault, relayer, fee_numerator, fee_denominator }
    }

    /// The engine's escrow account address.
    #[inline]
    pub fn account(&self) -> Address {
        self.account
    }

    /// The flash vault address.
    #[inline]
    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Vault fee on a borrowed amount.
    #[inline]
    pub fn flash_fee(&self, borrowed: u64) -> u64 {
        mul_frac(borrowed, self.fee_numerator, self.fee_denominator)
    }

    // ========================================================================
    // Arbitrage
    // ========================================================================

    /// Exercise an option the caller holds using flash liquidity,
    /// settling the underlying through signed venue calls.
    ///
    /// For a CALL the engine borrows the strike, exercises, and sells
    /// the NFT through `calls`; for a PUT it borrows the calls' total
    /// value, buys a matching NFT through them, and delivers it against
    /// the strike. Either way the vault is repaid with its fee and the
    /// remainder goes to the caller as profit.
    ///
    /// Returns the profit delivered. On any error the protocol is
    /// restored to its pre-envelope state.
    pub fn arbitrage(
        &self,
        protocol: &mut Protocol,
        router: &CallRouter,
        caller: &Address,
        option_id: u64,
        calls: &[MarketCall],
        signatures: &[Vec<u8>],
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let snapshot = protocol.clone();
        match self.arbitrage_inner(protocol, router, caller, option_id, calls, signatures, now) {
            Ok(profit) => Ok(profit),
            Err(err) => {
                *protocol = snapshot;
                Err(err)
            }
        }
    }

    fn arbitrage_inner(
        &self,
        protocol: &mut Protocol,
        router: &CallRouter,
        caller: &Address,
        option_id: u64,
        calls: &[MarketCall],
        signatures: &[Vec<u8>],
        now: u64,
    ) -> Result<u64, ProtocolError> {
        protocol.begin_transaction()?;
        verify_call_batch(protocol.verifier(), &self.relayer, calls, signatures)?;

        let option = protocol.registry().get(option_id)?.clone();
        // Everything settles in the issuing pool's asset, vault included.
        let asset = protocol.pool(&option.pool)?.asset;

        let borrowed = match option.option_type() {
            OptionType::Call => {
                // Borrow the strike, take the NFT, sell it on venues.
                let borrowed = option.strike;
                self.draw_from_vault(protocol, &asset, borrowed)?;
                protocol.exercise_call_as(option_id, caller, &self.account, &self.account, now)?;
                for call in calls {
                    router.dispatch(protocol, &self.account, call, &asset)?;
                }
                borrowed
            }
            OptionType::Put => {
                // Borrow the purchase budget, buy a matching NFT on
                // venues, deliver it against the strike.
                let borrowed = calls.iter().map(|call| call.value).sum();
                self.draw_from_vault(protocol, &asset, borrowed)?;
                for call in calls {
                    router.dispatch(protocol, &self.account, call, &asset)?;
                }
                let nft = self.find_deliverable(protocol, &option.collection, option.token_id)?;
                protocol.exercise_put_as(option_id, caller, &self.account, &self.account, nft, now)?;
                borrowed
            }
        };

        let profit = self.repay_vault_and_sweep(protocol, &asset, borrowed, caller)?;
        protocol.push_event(ProtocolEvent::FlashArbitrage { option_id, borrowed, profit });
        protocol.end_transaction();
        Ok(profit)
    }

    // ========================================================================
    // BNPL
    // ========================================================================

    /// Finance a CALL exercise through a lending venue.
    ///
    /// The caller pays the ask's premium (and any down payment the loan
    /// principal leaves uncovered); the engine borrows the strike,
    /// exercises the freshly written CALL, collateralizes the NFT with
    /// the venue, and repays the vault from the advanced principal. The
    /// caller is left holding a loan-option: pay the venue's repayment
    /// before `request.maturity` and take the NFT.
    ///
    /// Returns the opened loan id.
    pub fn bnpl(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        caller: &Address,
        ask: &crate::types::PoolAsk,
        signature: &[u8],
        request: &BorrowRequest,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let snapshot = protocol.clone();
        match self.bnpl_inner(protocol, adapters, caller, ask, signature, request, now) {
            Ok(loan_id) => Ok(loan_id),
            Err(err) => {
                *protocol = snapshot;
                Err(err)
            }
        }
    }

    fn bnpl_inner(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        caller: &Address,
        ask: &crate::types::PoolAsk,
        signature: &[u8],
        request: &BorrowRequest,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        protocol.begin_transaction()?;
        let adapter = adapters.get(&request.adapter)?;
        if OptionType::from_u8(ask.option_type_raw) != Some(OptionType::Call) {
            return Err(ProtocolError::OptionMismatch);
        }
        if request.maturity <= now {
            return Err(ProtocolError::HasExpired);
        }

        let asset = protocol.pool(&ask.pool)?.asset;
        let option_id = protocol.issue_option(caller, ask, signature, now, ask.premium, 0)?;
        let option = protocol.registry().get(option_id)?.clone();
        let nft = option.underlying().ok_or(ProtocolError::OptionMismatch)?;

        let borrowed = option.strike;
        self.draw_from_vault(protocol, &asset, borrowed)?;
        protocol.exercise_call_as(option_id, caller, &self.account, &self.account, now)?;

        let receipt = adapter.borrow(protocol, &self.account, nft, &asset, request.principal)?;

        // Vault repayment comes from the advanced principal; whatever it
        // does not cover is the caller's down payment.
        let owed = borrowed + self.flash_fee(borrowed);
        let held = protocol.book().balance_of(&self.account, &asset);
        if held < owed {
            protocol.book_mut().transfer(caller, &self.account, &asset, owed - held)?;
        }
        protocol.book_mut().transfer(&self.account, &self.vault, &asset, owed)?;
        self.sweep_account(protocol, &asset, caller)?;

        let loan_id = protocol.loans_mut().open(*caller, &receipt, request.maturity);
        protocol.push_event(ProtocolEvent::LoanOpened {
            loan_id,
            borrower: *caller,
            adapter: receipt.adapter,
            repayment: receipt.repayment,
            maturity: request.maturity,
        });
        protocol.end_transaction();
        Ok(loan_id)
    }

    // ========================================================================
    // Loan-option settlement
    // ========================================================================

    /// Settle a loan-option directly: the borrower pays the repayment
    /// and takes the collateral.
    pub fn execute_loan_option(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        caller: &Address,
        loan_id: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        let snapshot = protocol.clone();
        match self.settle_loan_inner(protocol, adapters, caller, loan_id, now) {
            Ok(()) => Ok(()),
            Err(err) => {
                *protocol = snapshot;
                Err(err)
            }
        }
    }

    fn settle_loan_inner(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        caller: &Address,
        loan_id: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        protocol.begin_transaction()?;
        let loan = protocol.loans().get(loan_id)?.clone();
        if loan.borrower != *caller {
            return Err(ProtocolError::Unauthorized);
        }
        if loan.is_expired(now) {
            return Err(ProtocolError::LoanHasExpired(loan_id));
        }
        let adapter = adapters.get(&loan.adapter)?;
        adapter.repay(protocol, caller, &receipt_of(&loan))?;
        protocol.loans_mut().settle(loan_id)?;
        protocol.push_event(ProtocolEvent::LoanRepaid { loan_id, profit: 0 });
        protocol.end_transaction();
        Ok(())
    }

    /// Settle a loan-option by flash-selling its collateral: borrow the
    /// repayment, reclaim the NFT, sell it through signed venue calls,
    /// repay the vault, and deliver the remainder to the borrower.
    ///
    /// Returns the profit delivered.
    pub fn execute_loan_option_with_arbitrage(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        router: &CallRouter,
        caller: &Address,
        loan_id: u64,
        calls: &[MarketCall],
        signatures: &[Vec<u8>],
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let snapshot = protocol.clone();
        let result = self.settle_loan_arbitrage_inner(
            protocol, adapters, router, caller, loan_id, calls, signatures, now,
        );
        match result {
            Ok(profit) => Ok(profit),
            Err(err) => {
                *protocol = snapshot;
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_loan_arbitrage_inner(
        &self,
        protocol: &mut Protocol,
        adapters: &AdapterRegistry,
        router: &CallRouter,
        caller: &Address,
        loan_id: u64,
        calls: &[MarketCall],
        signatures: &[Vec<u8>],
        now: u64,
    ) -> Result<u64, ProtocolError> {
        protocol.begin_transaction()?;
        verify_call_batch(protocol.verifier(), &self.relayer, calls, signatures)?;

        let loan = protocol.loans().get(loan_id)?.clone();
        if loan.borrower != *caller {
            return Err(ProtocolError::Unauthorized);
        }
        if loan.is_expired(now) {
            return Err(ProtocolError::LoanHasExpired(loan_id));
        }
        let adapter = adapters.get(&loan.adapter)?;

        let asset = loan.asset;
        let borrowed = loan.repayment;
        self.draw_from_vault(protocol, &asset, borrowed)?;
        adapter.repay(protocol, &self.account, &receipt_of(&loan))?;
        for call in calls {
            router.dispatch(protocol, &self.account, call, &asset)?;
        }

        let profit = self.repay_vault_and_sweep(protocol, &asset, borrowed, caller)?;
        protocol.loans_mut().settle(loan_id)?;
        protocol.push_event(ProtocolEvent::LoanRepaid { loan_id, profit });
        protocol.end_transaction();
        Ok(profit)
    }

    // ========================================================================
    // Vault plumbing
    // ========================================================================

    fn draw_from_vault(
        &self,
        protocol: &mut Protocol,
        asset: &Address,
        amount: u64,
    ) -> Result<(), ProtocolError> {
        protocol
            .book_mut()
            .transfer(&self.vault, &self.account, asset, amount)
            .map_err(|_| ProtocolError::InsufficientLiquidity)
    }

    /// Repay principal plus fee, then sweep the remainder to `caller`.
    fn repay_vault_and_sweep(
        &self,
        protocol: &mut Protocol,
        asset: &Address,
        borrowed: u64,
        caller: &Address,
    ) -> Result<u64, ProtocolError> {
        let owed = borrowed + self.flash_fee(borrowed);
        if protocol.book().balance_of(&self.account, asset) < owed {
            return Err(ProtocolError::InsufficientProceeds);
        }
        protocol.book_mut().transfer(&self.account, &self.vault, asset, owed)?;
        self.sweep_account(protocol, asset, caller)
    }

    fn sweep_account(
        &self,
        protocol: &mut Protocol,
        asset: &Address,
        to: &Address,
    ) -> Result<u64, ProtocolError> {
        let remainder = protocol.book().balance_of(&self.account, asset);
        if remainder > 0 {
            protocol.book_mut().transfer(&self.account, to, asset, remainder)?;
        }
        Ok(remainder)
    }

    /// First NFT in the engine account matching the option's underlying
    /// terms (any token id when the option is unmatched).
    fn find_deliverable(
        &self,
        protocol: &Protocol,
        collection: &Address,
        token_id: u64,
    ) -> Result<Nft, ProtocolError> {
        protocol
            .book()
            .nfts()
            .find(|(nft, owner)| {
                **owner == self.account
                    && nft.collection == *collection
                    && (token_id == 0 || nft.token_id == token_id)
            })
            .map(|(nft, _)| *nft)
            .ok_or(ProtocolError::OptionMismatch)
    }
}

fn receipt_of(loan: &crate::engine::bnpl::Loan) -> BorrowReceipt {
    BorrowReceipt {
        adapter: loan.adapter,
        collateral: loan.collateral,
        asset: loan.asset,
        principal: loan.principal,
        repayment: loan.repayment,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
