//! Signed external-call routing for flash envelopes.
//!
//! ## Design
//!
//! Arbitrage and BNPL envelopes carry a sequence of [`MarketCall`]s that
//! buy or sell the underlying on external venues. Each call must be
//! individually signed by the engine's trusted relayer; the batch is
//! validated in full before the first call is dispatched, so a bad
//! signature can never leave a half-routed sequence behind.
//!
//! Dispatch itself goes through a [`CallRouter`]: a registry of venue
//! handlers keyed by target address. A handler settles its leg directly
//! against the protocol's asset book. Any handler failure (or a call to
//! an unregistered target) surfaces as
//! [`ProtocolError::ExternalCallFailed`], which aborts the whole
//! envelope.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::errors::ProtocolError;
use crate::escrow::Protocol;
use crate::types::{Address, MarketCall};
use crate::verifier::OrderVerifier;

/// Canonical digest of one routed call.
///
/// The payload is variable-length, so it is hashed first and the digest
/// commits to `(domain, target, value, payload_hash)`.
pub fn call_digest(verifier: &OrderVerifier, call: &MarketCall) -> [u8; 32] {
    let payload_hash = Sha256::digest(&call.payload);

    let mut hasher = Sha256::new();
    hasher.update(verifier.domain().hash());
    hasher.update(call.target);
    hasher.update(call.value.to_le_bytes());
    hasher.update(payload_hash);

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Sign one routed call with a registered key.
pub fn sign_call(
    verifier: &OrderVerifier,
    call: &MarketCall,
    signer: &Address,
) -> Result<Vec<u8>, ProtocolError> {
    let digest = call_digest(verifier, call);
    verifier
        .keyring()
        .sign(signer, &digest)
        .ok_or(ProtocolError::InvalidSignature)
}

/// Validate a whole call batch against the relayer before dispatch.
///
/// Rejects an empty sequence, a call/signature length mismatch, and any
/// signature that does not recover to `relayer`.
pub fn verify_call_batch(
    verifier: &OrderVerifier,
    relayer: &Address,
    calls: &[MarketCall],
    signatures: &[Vec<u8>],
) -> Result<(), ProtocolError> {
    if calls.is_empty() {
        return Err(ProtocolError::EmptyCallSequence);
    }
    if calls.len() != signatures.len() {
        return Err(ProtocolError::LengthMismatch {
            calls: calls.len(),
            signatures: signatures.len(),
        });
    }
    for (call, signature) in calls.iter().zip(signatures) {
        let digest = call_digest(verifier, call);
        let recovered = verifier.recover_digest(&digest, signature)?;
        if recovered != *relayer {
            return Err(ProtocolError::SignerMismatch);
        }
    }
    Ok(())
}

// ============================================================================
// CallHandler / CallRouter
// ============================================================================

/// A venue handler that settles one routed call against the asset book.
///
/// `caller` is the engine's escrow account; the call's `value` has
/// already been forwarded to the handler's target address, in the
/// envelope's settlement asset, when `call` runs.
pub trait CallHandler {
    fn call(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        call: &MarketCall,
    ) -> Result<(), ProtocolError>;
}

/// Registry of venue handlers keyed by target address.
#[derive(Default)]
pub struct CallRouter {
    handlers: HashMap<Address, Box<dyn CallHandler>>,
}

impl CallRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a target address.
    pub fn register(&mut self, target: Address, handler: Box<dyn CallHandler>) {
        self.handlers.insert(target, handler);
    }

    /// Whether a handler is registered for `target`.
    #[inline]
    pub fn is_registered(&self, target: &Address) -> bool {
        self.handlers.contains_key(target)
    }

    /// Dispatch one call: forward its value to the target in `asset`,
    /// then run the target's handler. Any failure maps to
    /// [`ProtocolError::ExternalCallFailed`] for the target.
    pub fn dispatch(
        &self,
        protocol: &mut Protocol,
        caller: &Address,
        call: &MarketCall,
        asset: &Address,
    ) -> Result<(), ProtocolError> {
        let handler = self
            .handlers
            .get(&call.target)
            .ok_or(ProtocolError::ExternalCallFailed(call.target))?;
        if call.value > 0 {
            protocol
                .book_mut()
                .transfer(caller, &call.target, asset, call.value)
                .map_err(|_| ProtocolError::ExternalCallFailed(call.target))?;
        }
        handler
            .call(protocol, caller, call)
            .map_err(|_| ProtocolError::ExternalCallFailed(call.target))
    }
}

impl std::fmt::Debug for CallRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRouter")
            .field("targets", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeeManager;
    use crate::types::{address_from_tag, ZERO_ADDRESS};
    use crate::verifier::{DomainSeparator, Keyring};

    fn test_protocol(relayer: Address) -> Protocol {
        let domain = DomainSeparator::new("OptionForge", "1", 7, address_from_tag(0xFF));
        let mut keyring = Keyring::new();
        keyring.register(relayer, [0x33; 32]);
        keyring.register(address_from_tag(4), [0x44; 32]);
        Protocol::new(OrderVerifier::new(domain, keyring), FeeManager::disabled())
    }

    #[test]
    fn test_call_digest_commits_to_payload() {
        let relayer = address_from_tag(3);
        let protocol = test_protocol(relayer);

        let a = MarketCall::new(address_from_tag(99), 5, vec![1, 2, 3]);
        let mut b = a.clone();
        b.payload = vec![1, 2, 4];
        assert_ne!(
            call_digest(protocol.verifier(), &a),
            call_digest(protocol.verifier(), &b)
        );
    }

    #[test]
    fn test_verify_batch_rejects_empty_sequence() {
        let relayer = address_from_tag(3);
        let protocol = test_protocol(relayer);

        let err = verify_call_batch(protocol.verifier(), &relayer, &[], &[]).unwrap_err();
        assert_eq!(err, ProtocolError::EmptyCallSequence);
    }

    #[test]
    fn test_verify_batch_rejects_length_mismatch() {
        let relayer = address_from_tag(3);
        let protocol = test_protocol(relayer);
        let calls = vec![
            MarketCall::new(address_from_tag(99), 0, vec![]),
            MarketCall::new(address_from_tag(98), 0, vec![]),
        ];
        let sig = sign_call(protocol.verifier(), &calls[0], &relayer).unwrap();

        let err =
            verify_call_batch(protocol.verifier(), &relayer, &calls, &[sig]).unwrap_err();
        assert_eq!(err, ProtocolError::LengthMismatch { calls: 2, signatures: 1 });
    }

    #[test]
    fn test_verify_batch_rejects_foreign_relayer() {
        let relayer = address_from_tag(3);
        let protocol = test_protocol(relayer);
        let call = MarketCall::new(address_from_tag(99), 0, vec![]);

        // Signed by a registered key that is not the relayer.
        let sig = sign_call(protocol.verifier(), &call, &address_from_tag(4)).unwrap();
        let err = verify_call_batch(
            protocol.verifier(),
            &relayer,
            std::slice::from_ref(&call),
            &[sig],
        )
        .unwrap_err();
        assert_eq!(err, ProtocolError::SignerMismatch);
    }

    #[test]
    fn test_verify_batch_accepts_relayer_signatures() {
        let relayer = address_from_tag(3);
        let protocol = test_protocol(relayer);
        let calls = vec![
            MarketCall::new(address_from_tag(99), 5, vec![1]),
            MarketCall::new(address_from_tag(98), 0, vec![2]),
        ];
        let sigs: Vec<Vec<u8>> = calls
            .iter()
            .map(|c| sign_call(protocol.verifier(), c, &relayer).unwrap())
            .collect();

        verify_call_batch(protocol.verifier(), &relayer, &calls, &sigs).unwrap();
    }

    #[test]
    fn test_dispatch_unregistered_target_fails() {
        let relayer = address_from_tag(3);
        let mut protocol = test_protocol(relayer);
        let router = CallRouter::new();
        let call = MarketCall::new(address_from_tag(99), 0, vec![]);

        let err = router
            .dispatch(&mut protocol, &address_from_tag(7), &call, &ZERO_ADDRESS)
            .unwrap_err();
        assert_eq!(err, ProtocolError::ExternalCallFailed(address_from_tag(99)));
    }

    #[test]
    fn test_dispatch_forwards_value_then_runs_handler() {
        struct Probe;
        impl CallHandler for Probe {
            fn call(
                &self,
                protocol: &mut Protocol,
                caller: &Address,
                call: &MarketCall,
            ) -> Result<(), ProtocolError> {
                // Echo the forwarded value back to prove ordering.
                protocol
                    .book_mut()
                    .transfer(&call.target, caller, &ZERO_ADDRESS, call.value)
            }
        }

        let relayer = address_from_tag(3);
        let mut protocol = test_protocol(relayer);
        let account = address_from_tag(7);
        let target = address_from_tag(99);
        protocol.credit_account(&account, &ZERO_ADDRESS, 5);

        let mut router = CallRouter::new();
        router.register(target, Box::new(Probe));
        router
            .dispatch(&mut protocol, &account, &MarketCall::new(target, 5, vec![]), &ZERO_ADDRESS)
            .unwrap();

        assert_eq!(protocol.book().balance_of(&account, &ZERO_ADDRESS), 5);
        assert_eq!(protocol.book().balance_of(&target, &ZERO_ADDRESS), 0);
    }
}
