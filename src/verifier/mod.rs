//! Signed-order verification.
//!
//! ## Design
//!
//! Verification is pure: given a typed order and a signature, reconstruct
//! the order's canonical digest under the protocol's domain separator,
//! recover the signing address from the keyring, and compare it to the
//! claimed issuer. Nothing here mutates state, and rejection is always a
//! typed error — never a silent `false`.
//!
//! ## Digest Construction
//!
//! ```text
//! digest = SHA-256( domain_hash || type_tag || ssz(order) )
//! ```
//!
//! The domain hash commits to the protocol name, version, chain id, and
//! verifying party, so an order signed for one deployment can never
//! authorize a transition on another. The per-layout type tag keeps two
//! order types with coincidentally equal SSZ bytes from sharing a digest.
//!
//! ## Signer Recovery
//!
//! Signatures are 32-byte HMAC-SHA256 tags keyed per account. The keyring
//! recovers the signer by scanning its registered keys (deterministically,
//! in address order) for the one that authenticates the digest; the
//! recovered address is then compared against the order's claimed issuer.
//! A wrong-length tag, an unrecoverable tag, and a recovered-but-different
//! signer are three distinct errors.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::ProtocolError;
use crate::types::{Address, Ask, Bid, PoolAsk, PoolBid, ZERO_ADDRESS};

type HmacSha256 = Hmac<Sha256>;

/// Expected signature length in bytes (one HMAC-SHA256 tag).
pub const SIGNATURE_LEN: usize = 32;

// ============================================================================
// TypedOrder
// ============================================================================

/// A signed order layout the verifier knows how to canonicalize.
///
/// The verifier's logic is shared across order types and parameterized by
/// this trait: each layout contributes its tag and canonical encoding.
pub trait TypedOrder {
    /// Layout discriminator mixed into the digest.
    const TYPE_TAG: u8;

    /// Canonical SSZ bytes of the order.
    fn encode(&self) -> Result<Vec<u8>, ProtocolError>;
}

impl TypedOrder for PoolAsk {
    const TYPE_TAG: u8 = 1;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        ssz_rs::serialize(self).map_err(|e| ProtocolError::Serialization(format!("{e:?}")))
    }
}

impl TypedOrder for PoolBid {
    const TYPE_TAG: u8 = 2;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        ssz_rs::serialize(self).map_err(|e| ProtocolError::Serialization(format!("{e:?}")))
    }
}

impl TypedOrder for Ask {
    const TYPE_TAG: u8 = 3;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        ssz_rs::serialize(self).map_err(|e| ProtocolError::Serialization(format!("{e:?}")))
    }
}

impl TypedOrder for Bid {
    const TYPE_TAG: u8 = 4;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        ssz_rs::serialize(self).map_err(|e| ProtocolError::Serialization(format!("{e:?}")))
    }
}

// ============================================================================
// DomainSeparator
// ============================================================================

/// Protocol domain binding for order digests.
///
/// Hashed once at construction; every order digest starts from this hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSeparator {
    name: String,
    version: String,
    chain_id: u64,
    verifying_party: Address,
    hash: [u8; 32],
}

impl DomainSeparator {
    /// Build a domain separator and precompute its hash.
    pub fn new(name: &str, version: &str, chain_id: u64, verifying_party: Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((version.len() as u64).to_le_bytes());
        hasher.update(version.as_bytes());
        hasher.update(chain_id.to_le_bytes());
        hasher.update(verifying_party);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());

        Self {
            name: name.to_string(),
            version: version.to_string(),
            chain_id,
            verifying_party,
            hash,
        }
    }

    /// The precomputed domain hash.
    #[inline]
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Protocol name component.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chain id component.
    #[inline]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// Registered signing keys, keyed by account address.
///
/// Stored in a `BTreeMap` so recovery scans addresses in a deterministic
/// order.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: BTreeMap<Address, [u8; 32]>,
}

impl Keyring {
    /// Create an empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an account's signing key.
    pub fn register(&mut self, address: Address, secret: [u8; 32]) {
        self.keys.insert(address, secret);
    }

    /// Number of registered signers.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring has no registered signers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sign a digest with the key registered for `address`.
    ///
    /// Returns `None` if the address has no registered key.
    pub fn sign(&self, address: &Address, digest: &[u8; 32]) -> Option<Vec<u8>> {
        let secret = self.keys.get(address)?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(digest);
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// Recover the address whose key authenticates `signature` over
    /// `digest`, or `None` if no registered key does.
    pub fn recover(&self, digest: &[u8; 32], signature: &[u8]) -> Option<Address> {
        for (address, secret) in &self.keys {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                continue;
            };
            mac.update(digest);
            if mac.verify_slice(signature).is_ok() {
                return Some(*address);
            }
        }
        None
    }
}

// ============================================================================
// OrderVerifier
// ============================================================================

/// Canonicalizes orders and authenticates their signers.
#[derive(Debug, Clone)]
pub struct OrderVerifier {
    domain: DomainSeparator,
    keyring: Keyring,
}

impl OrderVerifier {
    /// Create a verifier over a domain and keyring.
    pub fn new(domain: DomainSeparator, keyring: Keyring) -> Self {
        Self { domain, keyring }
    }

    /// The domain this verifier binds orders to.
    #[inline]
    pub fn domain(&self) -> &DomainSeparator {
        &self.domain
    }

    /// The verifier's keyring.
    #[inline]
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// Mutable keyring access (signer registration).
    #[inline]
    pub fn keyring_mut(&mut self) -> &mut Keyring {
        &mut self.keyring
    }

    /// Canonical digest of a typed order under this domain.
    pub fn digest<T: TypedOrder>(&self, order: &T) -> Result<[u8; 32], ProtocolError> {
        let body = order.encode()?;
        let mut hasher = Sha256::new();
        hasher.update(self.domain.hash());
        hasher.update([T::TYPE_TAG]);
        hasher.update(&body);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Ok(digest)
    }

    /// Recover the signer of an arbitrary digest.
    ///
    /// Shared by order verification and the flash engine's signed-call
    /// validation.
    pub fn recover_digest(
        &self,
        digest: &[u8; 32],
        signature: &[u8],
    ) -> Result<Address, ProtocolError> {
        if signature.len() != SIGNATURE_LEN {
            return Err(ProtocolError::MalformedSignature(signature.len()));
        }
        self.keyring
            .recover(digest, signature)
            .ok_or(ProtocolError::InvalidSignature)
    }

    /// Verify that `signature` authenticates `order` from `claimed`.
    ///
    /// Errors, in check order: [`ProtocolError::MalformedSignature`] for a
    /// wrong-length tag, [`ProtocolError::InvalidSignature`] when no
    /// registered signer (or the zero address) is recovered, and
    /// [`ProtocolError::SignerMismatch`] when the recovered signer differs
    /// from the claimed issuer.
    pub fn verify<T: TypedOrder>(
        &self,
        order: &T,
        signature: &[u8],
        claimed: Address,
    ) -> Result<Address, ProtocolError> {
        let digest = self.digest(order)?;
        let recovered = self.recover_digest(&digest, signature)?;
        if recovered == ZERO_ADDRESS {
            return Err(ProtocolError::InvalidSignature);
        }
        if recovered != claimed {
            return Err(ProtocolError::SignerMismatch);
        }
        Ok(recovered)
    }

    /// Verify a signature and check the recovered signer against an
    /// allow-list (pool owner/admin orders have no claimed-issuer field).
    pub fn verify_any<T: TypedOrder>(
        &self,
        order: &T,
        signature: &[u8],
        allowed: &[Address],
    ) -> Result<Address, ProtocolError> {
        let digest = self.digest(order)?;
        let recovered = self.recover_digest(&digest, signature)?;
        if recovered == ZERO_ADDRESS {
            return Err(ProtocolError::InvalidSignature);
        }
        if !allowed.contains(&recovered) {
            return Err(ProtocolError::Unauthorized);
        }
        Ok(recovered)
    }

    /// Convenience: sign a typed order with a registered key.
    pub fn sign_order<T: TypedOrder>(
        &self,
        order: &T,
        signer: &Address,
    ) -> Result<Vec<u8>, ProtocolError> {
        let digest = self.digest(order)?;
        self.keyring
            .sign(signer, &digest)
            .ok_or(ProtocolError::InvalidSignature)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::address_from_tag;

    fn test_verifier() -> OrderVerifier {
        let domain = DomainSeparator::new("OptionForge", "1", 7, address_from_tag(0xFF));
        let mut keyring = Keyring::new();
        keyring.register(address_from_tag(1), [0x11; 32]);
        keyring.register(address_from_tag(2), [0x22; 32]);
        OrderVerifier::new(domain, keyring)
    }

    fn sample_ask(seller: Address) -> Ask {
        Ask {
            id: 1,
            option_id: 9,
            order_expiry: 1_000,
            price: 5,
            seller,
            asset: ZERO_ADDRESS,
        }
    }

    #[test]
    fn test_domain_hash_commits_to_all_fields() {
        let base = DomainSeparator::new("OptionForge", "1", 7, address_from_tag(0xFF));
        let name = DomainSeparator::new("Other", "1", 7, address_from_tag(0xFF));
        let version = DomainSeparator::new("OptionForge", "2", 7, address_from_tag(0xFF));
        let chain = DomainSeparator::new("OptionForge", "1", 8, address_from_tag(0xFF));
        let party = DomainSeparator::new("OptionForge", "1", 7, address_from_tag(0xFE));

        assert_ne!(base.hash(), name.hash());
        assert_ne!(base.hash(), version.hash());
        assert_ne!(base.hash(), chain.hash());
        assert_ne!(base.hash(), party.hash());
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let verifier = test_verifier();
        let seller = address_from_tag(1);
        let ask = sample_ask(seller);

        let sig = verifier.sign_order(&ask, &seller).unwrap();
        let recovered = verifier.verify(&ask, &sig, seller).unwrap();
        assert_eq!(recovered, seller);
    }

    #[test]
    fn test_malformed_signature_is_distinct() {
        let verifier = test_verifier();
        let seller = address_from_tag(1);
        let ask = sample_ask(seller);

        let err = verifier.verify(&ask, &[0u8; 16], seller).unwrap_err();
        assert_eq!(err, ProtocolError::MalformedSignature(16));
    }

    #[test]
    fn test_garbage_signature_recovers_nobody() {
        let verifier = test_verifier();
        let seller = address_from_tag(1);
        let ask = sample_ask(seller);

        let err = verifier.verify(&ask, &[0u8; 32], seller).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSignature);
    }

    #[test]
    fn test_foreign_signer_is_mismatch() {
        let verifier = test_verifier();
        let seller = address_from_tag(1);
        let ask = sample_ask(seller);

        // Signed by a registered key that is not the claimed issuer.
        let sig = verifier.sign_order(&ask, &address_from_tag(2)).unwrap();
        let err = verifier.verify(&ask, &sig, seller).unwrap_err();
        assert_eq!(err, ProtocolError::SignerMismatch);
    }

    #[test]
    fn test_digest_binds_order_fields() {
        let verifier = test_verifier();
        let seller = address_from_tag(1);
        let ask = sample_ask(seller);
        let mut tampered = ask.clone();
        tampered.price = 6;

        // A signature over the original must not verify the tampered order.
        let sig = verifier.sign_order(&ask, &seller).unwrap();
        let err = verifier.verify(&tampered, &sig, seller).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSignature);
    }

    #[test]
    fn test_digest_binds_type_tag() {
        let verifier = test_verifier();
        // Same field bytes, different layouts: digests must differ.
        let pool_bid = PoolBid::default();
        let a = verifier.digest(&pool_bid).unwrap();
        let ask = Ask::default();
        let b = verifier.digest(&ask).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_any_checks_allow_list() {
        let verifier = test_verifier();
        let signer = address_from_tag(1);
        let ask = sample_ask(signer);
        let sig = verifier.sign_order(&ask, &signer).unwrap();

        let ok = verifier.verify_any(&ask, &sig, &[address_from_tag(2), signer]);
        assert_eq!(ok.unwrap(), signer);

        let err = verifier.verify_any(&ask, &sig, &[address_from_tag(2)]);
        assert_eq!(err.unwrap_err(), ProtocolError::Unauthorized);
    }

    #[test]
    fn test_unsigned_address_cannot_sign() {
        let verifier = test_verifier();
        let ask = sample_ask(address_from_tag(9));
        let err = verifier.sign_order(&ask, &address_from_tag(9)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSignature);
    }
}
