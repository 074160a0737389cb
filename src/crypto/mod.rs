//! Symmetric encryption keyed by identity.
//!
//! Every stage payload is sealed under a key derived from the identity of
//! the party meant to read it: the literal string `"self"` for tokens a
//! user keeps, or the hex encoding of the receiver's public key for tokens
//! being handed off. The derivation is a single SHA-256, so the same
//! identity string always yields the same key and a receiver's wallet can
//! decrypt with no side channel.
//!
//! Decryption failure doubles as the access-control signal: a payload that
//! was not sealed for you authenticates against the wrong key and fails
//! deterministically, rather than yielding plausible-looking garbage.

use crate::{
    error::{Error, Result},
    util::ser::BinaryVec,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, CryptoRng, RngCore, SeedableRng};
use serde::Serialize;
use serde_derive::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric keys are always this many bytes.
pub const KEY_LEN: usize = 32;
/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;
/// The identity string a self-held token's key is derived from.
pub const SELF_IDENTITY: &str = "self";

/// A convenience function that returns a ChaCha20 CSRNG seeded with OS
/// random bytes. Use this if you want a strong random number generator and
/// your platform provides good entropy; otherwise bring your own
/// [`RngCore`] and pass it to any function here that takes `&mut rng`.
pub fn rng_chacha20() -> rand_chacha::ChaCha20Rng {
    let mut seed_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut seed_bytes);
    rand_chacha::ChaCha20Rng::from_seed(seed_bytes)
}

/// An ed25519 public key, used both as a wallet's identity and as the key a
/// token's spending condition binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = slice.try_into().map_err(|_| Error::BadLength)?;
        Ok(Self(arr))
    }

    /// Parse a public key from its canonical lowercase hex form.
    pub fn from_hex(string: &str) -> Result<Self> {
        let bytes = hex::decode(string)?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The canonical string form: lowercase hex. This is the form used as a
    /// user id in custody records and as an encryption key seed.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The identity a token's encryption key and spending condition bind to.
///
/// The original string union ("self" or a raw pubkey string) is replaced by
/// a tagged variant so nothing downstream has to guess at normalization.
/// [`resolve`][Identity::resolve] produces the one canonical string that
/// feeds the key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    /// The token stays with its creator.
    SelfHeld,
    /// The token is bound to an explicit counterparty.
    PublicKey(PublicKey),
}

impl Identity {
    /// Wrap an optional receiver: absent means the token stays with self.
    pub fn from_receiver(receiver: Option<PublicKey>) -> Self {
        match receiver {
            Some(pubkey) => Identity::PublicKey(pubkey),
            None => Identity::SelfHeld,
        }
    }

    /// The canonical string this identity hashes under.
    pub fn resolve(&self) -> String {
        match self {
            Identity::SelfHeld => SELF_IDENTITY.into(),
            Identity::PublicKey(pubkey) => pubkey.to_hex(),
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Identity::SelfHeld)
    }
}

/// A symmetric encryption key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Derive the key for an identity: SHA-256 over the canonical identity
    /// string. Deterministic, so lock-time and unlock-time derivations agree
    /// without coordination.
    pub fn derive(identity: &Identity) -> Self {
        let digest = Sha256::digest(identity.resolve().as_bytes());
        Self(digest.into())
    }

    /// Build a key from raw bytes. Anything other than exactly
    /// [`KEY_LEN`] bytes is rejected here, before any cipher sees it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| Error::CryptoKeyLength {
            expected: KEY_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Encrypt a payload under this key with a fresh random nonce.
    pub fn seal<R: RngCore + CryptoRng>(&self, rng: &mut R, plaintext: &[u8]) -> Result<Sealed> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::CryptoSealFailed)?;
        Ok(Sealed {
            nonce,
            ciphertext: BinaryVec::from(ciphertext),
        })
    }

    /// Decrypt a sealed payload. Fails if this key is not the key the
    /// payload was sealed under, or the ciphertext was modified.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(XNonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| Error::CryptoOpenFailed)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(<hidden>)")
    }
}

/// An encrypted payload: nonce plus ciphertext. The flat wire form
/// (`nonce || ciphertext`) is what gets embedded in a token's data chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Sealed {
    nonce: [u8; NONCE_LEN],
    ciphertext: BinaryVec,
}

impl Sealed {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(self.ciphertext.as_ref());
        out
    }

    /// Split a wire-form payload back into nonce and ciphertext. Anything
    /// too short to hold a nonce and an auth tag cannot possibly open.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_LEN + 16 {
            return Err(Error::CryptoOpenFailed);
        }
        let nonce: [u8; NONCE_LEN] = bytes[0..NONCE_LEN].try_into().map_err(|_| Error::BadLength)?;
        Ok(Self {
            nonce,
            ciphertext: BinaryVec::from(bytes[NONCE_LEN..].to_vec()),
        })
    }
}

/// Whether a failed decryption under the resolved receiver key may retry
/// under the `"self"` key.
///
/// A receiver who continues a chain for themself produces a self-keyed
/// token while the latest transfer record still names them, so read paths
/// that resolve the receiver from custody records genuinely need the
/// fallback. It can also paper over real authorization failures, which is
/// why it is a required, explicit choice rather than a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptPolicy {
    /// Only the resolved receiver identity's key is tried.
    ReceiverOnly,
    /// On failure, retry once under the `"self"` key.
    ReceiverThenSelf,
}

/// Seal a JSON-serializable payload for an identity, returning the wire form.
pub fn seal_json<T: Serialize, R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &SecretKey,
    value: &T,
) -> Result<Vec<u8>> {
    let plain = serde_json::to_vec(value)?;
    Ok(key.seal(rng, &plain)?.to_bytes())
}

/// Open a wire-form payload and parse it as JSON.
pub fn open_json(key: &SecretKey, bytes: &[u8]) -> Result<serde_json::Value> {
    let sealed = Sealed::from_bytes(bytes)?;
    let plain = key.open(&sealed)?;
    Ok(serde_json::from_slice(&plain)?)
}

/// Open a payload for the given identity, honoring the fallback policy.
/// Only a cryptographic open failure triggers the fallback; a payload that
/// opens but holds malformed JSON is a hard error either way.
pub fn open_payload(identity: &Identity, policy: DecryptPolicy, bytes: &[u8]) -> Result<serde_json::Value> {
    let key = SecretKey::derive(identity);
    match open_json(&key, bytes) {
        Ok(value) => Ok(value),
        Err(Error::CryptoOpenFailed) => {
            if policy == DecryptPolicy::ReceiverThenSelf && !identity.is_self() {
                tracing::debug!(identity = %identity.resolve(), "payload did not open under receiver key, retrying under self");
                open_json(&SecretKey::derive(&Identity::SelfHeld), bytes)
            } else {
                Err(Error::CryptoOpenFailed)
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::test::rng;

    fn pubkey(fill: u8) -> PublicKey {
        PublicKey::from_bytes([fill; 32])
    }

    #[test]
    fn derive_is_deterministic() {
        let identity = Identity::PublicKey(pubkey(7));
        let key1 = SecretKey::derive(&identity);
        let key2 = SecretKey::derive(&identity);
        let mut rng = rng();
        let sealed = key1.seal(&mut rng, b"same key, no side channel").unwrap();
        assert_eq!(key2.open(&sealed).unwrap(), b"same key, no side channel");
    }

    #[test]
    fn seal_open_round_trip() {
        let mut rng = rng();
        for identity in [Identity::SelfHeld, Identity::PublicKey(pubkey(3))] {
            let key = SecretKey::derive(&identity);
            let sealed = key.seal(&mut rng, b"get a job").unwrap();
            assert_eq!(key.open(&sealed).unwrap(), b"get a job");
        }
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let mut rng = rng();
        let key1 = SecretKey::derive(&Identity::PublicKey(pubkey(1)));
        let key2 = SecretKey::derive(&Identity::PublicKey(pubkey(2)));
        let sealed = key1.seal(&mut rng, b"nice marmot").unwrap();
        assert!(matches!(key2.open(&sealed), Err(Error::CryptoOpenFailed)));
        // self key must not open a receiver-keyed payload either
        let self_key = SecretKey::derive(&Identity::SelfHeld);
        assert!(matches!(self_key.open(&sealed), Err(Error::CryptoOpenFailed)));
    }

    #[test]
    fn truncated_key_is_rejected() {
        let mut rng = rng();
        let key = SecretKey::derive(&Identity::SelfHeld);
        let sealed = key.seal(&mut rng, b"hello there").unwrap();
        // any strict prefix of the key bytes is refused at construction
        let full = Sha256::digest(SELF_IDENTITY.as_bytes());
        for cut in [0, 8, 16, 31] {
            let short = SecretKey::from_bytes(&full[0..cut]);
            assert!(matches!(
                short,
                Err(Error::CryptoKeyLength { expected: KEY_LEN, got }) if got == cut
            ));
        }
        assert_eq!(key.open(&sealed).unwrap(), b"hello there");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let mut rng = rng();
        let key = SecretKey::derive(&Identity::SelfHeld);
        let sealed = key.seal(&mut rng, b"HI HUNGRY IM DAD").unwrap();
        let mut bytes = sealed.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Sealed::from_bytes(&bytes).unwrap();
        assert!(matches!(key.open(&tampered), Err(Error::CryptoOpenFailed)));
        // truncation fails too, at parse or open time
        let cut = Sealed::from_bytes(&sealed.to_bytes()[0..NONCE_LEN + 4]);
        assert!(matches!(cut, Err(Error::CryptoOpenFailed)));
    }

    #[test]
    fn payload_fallback_policies() {
        let mut rng = rng();
        let receiver = Identity::PublicKey(pubkey(9));
        let data = serde_json::json!({ "stage": "Processing", "batch": 42 });

        // sealed for self, read path resolved the receiver identity
        let self_sealed = seal_json(&mut rng, &SecretKey::derive(&Identity::SelfHeld), &data).unwrap();
        assert!(matches!(
            open_payload(&receiver, DecryptPolicy::ReceiverOnly, &self_sealed),
            Err(Error::CryptoOpenFailed)
        ));
        let opened = open_payload(&receiver, DecryptPolicy::ReceiverThenSelf, &self_sealed).unwrap();
        assert_eq!(opened, data);

        // sealed for the receiver: both policies open it under the receiver key
        let recv_sealed = seal_json(&mut rng, &SecretKey::derive(&receiver), &data).unwrap();
        assert_eq!(open_payload(&receiver, DecryptPolicy::ReceiverOnly, &recv_sealed).unwrap(), data);

        // sealed for a third party: fallback does not rescue it
        let other_sealed = seal_json(&mut rng, &SecretKey::derive(&Identity::PublicKey(pubkey(8))), &data).unwrap();
        assert!(matches!(
            open_payload(&receiver, DecryptPolicy::ReceiverThenSelf, &other_sealed),
            Err(Error::CryptoOpenFailed)
        ));
    }

    #[test]
    fn identity_resolution() {
        assert_eq!(Identity::SelfHeld.resolve(), "self");
        let pk = pubkey(0xab);
        assert_eq!(Identity::PublicKey(pk.clone()).resolve(), pk.to_hex());
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert_eq!(Identity::from_receiver(None), Identity::SelfHeld);
        assert_eq!(Identity::from_receiver(Some(pk.clone())), Identity::PublicKey(pk));
    }
}
