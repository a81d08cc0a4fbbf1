//! Ed25519 transaction signing.
//!
//! A transaction is signed over its [`signing_hash`](crate::types::Transaction::signing_hash),
//! which commits to every field except the signature itself. The sender
//! address is derived from the embedded public key.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Address, Transaction};

/// Ed25519 keypair for signing transactions.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Embed `keypair`'s public key in `tx` and sign it.
pub fn sign_transaction(tx: &mut Transaction, keypair: &KeyPair) {
    tx.public_key = keypair.public_key_bytes();
    let hash = tx.signing_hash();
    tx.signature = keypair.sign(hash.as_bytes()).to_vec();
}

/// Verify `tx.signature` against `tx.public_key` over the signing hash.
pub fn verify_transaction(tx: &Transaction) -> Result<(), CryptoError> {
    let key = ed25519_dalek::VerifyingKey::from_bytes(&tx.public_key)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes: [u8; 64] = tx
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    key.verify(tx.signing_hash().as_bytes(), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}
