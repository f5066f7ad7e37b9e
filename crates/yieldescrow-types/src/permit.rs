//! # TransferPermit — the single-use, signed transfer authorization
//!
//! A payer signs a permit off-ledger, allowing one named spender (the
//! escrow custodian) to pull up to `amount` of one `token` exactly once,
//! before `deadline`, without a separate approval step.
//!
//! ## Security Properties
//!
//! - **Signature-bound**: ed25519 over the canonical payload, keyed by the owner address
//! - **Nonce-bound**: each (owner, nonce) pair can be consumed once
//! - **Time-bound**: rejected unless the deadline is strictly in the future
//! - **Asset/amount-bound**: the pull may not exceed the permitted amount of the permitted token

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, Asset, EscrowError, Result, constants};

/// Permission for `spender` to pull `amount` of `token` from `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPermit {
    /// Funds owner; its address is its ed25519 public key.
    pub owner: Address,
    /// The only account allowed to redeem the permit.
    pub spender: Address,
    pub token: Asset,
    /// Upper bound on the pulled amount.
    pub amount: Amount,
    /// Single-use nonce, scoped to the owner.
    pub nonce: u64,
    /// The permit is valid only while `now < deadline`.
    pub deadline: DateTime<Utc>,
}

/// Detached ed25519 signature over [`TransferPermit::signing_payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitSignature(pub Vec<u8>);

impl TransferPermit {
    /// Canonical signing payload.
    ///
    /// Format: `"yieldescrow:permit:v1:" || owner || spender || len(token) || token || amount(16 LE) || nonce(8 LE) || deadline_ms(8 LE)`
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(160);
        payload.extend_from_slice(constants::PERMIT_DOMAIN);
        payload.extend_from_slice(self.owner.as_bytes());
        payload.extend_from_slice(self.spender.as_bytes());
        payload.extend_from_slice(&(self.token.len() as u64).to_le_bytes());
        payload.extend_from_slice(self.token.as_bytes());
        payload.extend_from_slice(&self.amount.to_le_bytes());
        payload.extend_from_slice(&self.nonce.to_le_bytes());
        payload.extend_from_slice(&self.deadline.timestamp_millis().to_le_bytes());
        payload
    }

    /// Sign with the owner's key.
    #[must_use]
    pub fn sign(&self, key: &SigningKey) -> PermitSignature {
        PermitSignature(key.sign(&self.signing_payload()).to_bytes().to_vec())
    }

    /// Verify `signature` against the owner address.
    ///
    /// # Errors
    /// Returns [`EscrowError::AuthorizationSignatureInvalid`] if the owner is
    /// not a valid public key, the signature is malformed, or it doesn't verify.
    pub fn verify_signature(&self, signature: &PermitSignature) -> Result<()> {
        let key = VerifyingKey::from_bytes(self.owner.as_bytes())
            .map_err(|_| EscrowError::AuthorizationSignatureInvalid)?;
        let sig = Signature::from_slice(&signature.0)
            .map_err(|_| EscrowError::AuthorizationSignatureInvalid)?;
        key.verify(&self.signing_payload(), &sig)
            .map_err(|_| EscrowError::AuthorizationSignatureInvalid)
    }

    /// Whether the permit is still usable at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.deadline
    }
}

/// Generate a random owner key. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
pub fn random_signing_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}

/// Address for a signing key.
#[must_use]
pub fn address_of(key: &SigningKey) -> Address {
    Address::from_pubkey(key.verifying_key().to_bytes())
}
