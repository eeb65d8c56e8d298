// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Per-message authenticators binding a wire payload to its claimed sender.
//!
//! The binding is always over `codec.pack(msg_without_sig ++ sender_identity)`
//! (see [`signing_bytes`]); backends only differ in how they turn those bytes
//! into a signature. The shipped default, [`Sha256MacSigner`], is the
//! placeholder the specification mandates: a keyed hash with no actual secret,
//! trivially forgeable by anyone who can compute SHA-256. [`Ed25519Signer`] is
//! provided to show the drop-in replacement path — same trait, no call-site
//! changes — grounded in the Ed25519 backend this lineage's keystore uses.

use crate::core::types::{encode_canonical, CodecError};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Signer errors.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The payload could not be canonically encoded.
    #[error("codec")]
    Codec(#[from] CodecError),
    /// The backend rejected the key material it was given.
    #[error("invalid key material")]
    InvalidKey,
}

/// Build the domain-bound signing payload: `codec.pack(msg_without_sig ++ sender_identity)`.
///
/// `msg_without_sig` is any serializable tuple/struct of the message's fields
/// excluding the signature slot; `sender_identity` is the claimed sender's
/// address or public key bytes.
pub fn signing_bytes<M: Serialize>(
    msg_without_sig: &M,
    sender_identity: &[u8],
) -> Result<Vec<u8>, SignerError> {
    Ok(encode_canonical(&(msg_without_sig, sender_identity))?)
}

/// A pluggable message authenticator.
///
/// `sign` produces a signature over an already domain-bound payload (see
/// [`signing_bytes`]); `verify` checks a signature against the same payload
/// and the claimed sender's public identity. Implementations must treat
/// `verify` as returning `true` iff the signature was produced by the holder
/// of `sender_pub`'s private key over exactly those bytes (for real schemes)
/// — callers MUST NOT mutate a wire message's signature field once set.
pub trait Signer: Send + Sync {
    /// Sign `payload`, which already encodes the sender identity per [`signing_bytes`].
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
    /// Verify `signature` over `payload`, claimed to originate from `sender_pub`.
    fn verify(&self, payload: &[u8], sender_pub: &[u8], signature: &[u8]) -> bool;
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let d = ring::digest::digest(&ring::digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Placeholder signer mandated by the specification: a SHA-256 digest over
/// the payload. `sender_pub` is intentionally unused — the payload already
/// carries the sender identity (see [`signing_bytes`]), and there is no
/// secret key, so this scheme is existentially forgeable by design. It MUST
/// be replaced by an asymmetric scheme (e.g. [`Ed25519Signer`]) before any
/// real deployment.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256MacSigner;

impl Signer for Sha256MacSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(sha256(payload).to_vec())
    }

    fn verify(&self, payload: &[u8], _sender_pub: &[u8], signature: &[u8]) -> bool {
        let expected = sha256(payload);
        expected.ct_eq(signature).unwrap_u8() == 1 && signature.len() == expected.len()
    }
}

/// Ed25519-backed signer (existentially unforgeable). Holds this peer's own
/// keypair for `sign`; `verify` is stateless and takes the claimed sender's
/// public key bytes directly, so a single instance can verify messages from
/// every peer in the session.
pub struct Ed25519Signer {
    keypair: Ed25519KeyPair,
}

impl Ed25519Signer {
    /// Construct from PKCS#8 document bytes (see `ring::signature::Ed25519KeyPair::generate_pkcs8`).
    /// The caller's buffer is copied into a zeroizing one so the raw private
    /// key material is wiped from memory once the keypair is parsed out of it.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, SignerError> {
        let owned = Zeroizing::new(pkcs8.to_vec());
        let keypair = Ed25519KeyPair::from_pkcs8(&owned).map_err(|_| SignerError::InvalidKey)?;
        Ok(Self { keypair })
    }

    /// This peer's public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        let pk = self.keypair.public_key().as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        out
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.keypair.sign(payload).as_ref().to_vec())
    }

    fn verify(&self, payload: &[u8], sender_pub: &[u8], signature: &[u8]) -> bool {
        if sender_pub.len() != 32 || signature.len() != 64 {
            return false;
        }
        let pk = UnparsedPublicKey::new(&ED25519, sender_pub);
        pk.verify(payload, signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_signer_round_trip() {
        let signer = Sha256MacSigner;
        let payload = signing_bytes(&("hello", 7u64), b"peer-A").unwrap();
        let sig = signer.sign(&payload).unwrap();
        assert!(signer.verify(&payload, b"peer-A", &sig));
    }

    #[test]
    fn mac_signer_rejects_tampered_payload() {
        let signer = Sha256MacSigner;
        let payload = signing_bytes(&("hello", 7u64), b"peer-A").unwrap();
        let sig = signer.sign(&payload).unwrap();
        let tampered = signing_bytes(&("hello", 8u64), b"peer-A").unwrap();
        assert!(!signer.verify(&tampered, b"peer-A", &sig));
    }

    #[test]
    fn mac_signer_deterministic() {
        // Scenario S6: signing the same message twice yields identical signatures.
        let signer = Sha256MacSigner;
        let payload = signing_bytes(&("hello", 7u64), b"peer-A").unwrap();
        assert_eq!(signer.sign(&payload).unwrap(), signer.sign(&payload).unwrap());
    }

    #[test]
    fn ed25519_signer_round_trip() {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let signer = Ed25519Signer::from_pkcs8(pkcs8.as_ref()).unwrap();
        let payload = signing_bytes(&("hello", 7u64), &signer.public_key_bytes()).unwrap();
        let sig = signer.sign(&payload).unwrap();
        assert!(signer.verify(&payload, &signer.public_key_bytes(), &sig));
        assert!(!signer.verify(&payload, &signer.public_key_bytes(), &[0u8; 64]));
    }
}
