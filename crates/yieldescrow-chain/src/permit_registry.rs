//! Permit registry — verifies signed transfer permits and tracks consumed
//! nonces per owner.
//!
//! A nonce is consumed only after the permit has passed every check and the
//! caller has moved the funds, so a failed pull never burns a permit.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use yieldescrow_types::{
    Address, Amount, EscrowError, PermitSignature, Result, TransferPermit,
};

/// Used nonces per permit owner.
#[derive(Debug, Clone, Default)]
pub struct PermitRegistry {
    /// `owner → Set<nonce>`.
    used_nonces: HashMap<Address, HashSet<u64>>,
}

impl PermitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a permit redemption without consuming anything.
    ///
    /// Checks, in order: deadline, spender, amount bound, nonce freshness,
    /// signature.
    ///
    /// # Errors
    /// - `AuthorizationExpired` if `now >= deadline`
    /// - `AuthorizationMismatch` if `caller` isn't the spender or `amount` exceeds the permit
    /// - `AuthorizationNonceReused` if the nonce was consumed
    /// - `AuthorizationSignatureInvalid` if the signature doesn't verify
    pub fn check(
        &self,
        permit: &TransferPermit,
        signature: &PermitSignature,
        caller: &Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !permit.is_live_at(now) {
            return Err(EscrowError::AuthorizationExpired);
        }
        if permit.spender != *caller {
            return Err(EscrowError::AuthorizationMismatch {
                reason: format!("spender {} is not caller {caller}", permit.spender),
            });
        }
        if amount > permit.amount {
            return Err(EscrowError::AuthorizationMismatch {
                reason: format!("requested {amount} exceeds permitted {}", permit.amount),
            });
        }
        if self.is_used(&permit.owner, permit.nonce) {
            return Err(EscrowError::AuthorizationNonceReused {
                nonce: permit.nonce,
            });
        }
        permit.verify_signature(signature)
    }

    /// Mark `(owner, nonce)` consumed.
    ///
    /// # Errors
    /// Returns `AuthorizationNonceReused` if it already was.
    pub fn consume(&mut self, owner: &Address, nonce: u64) -> Result<()> {
        if !self.used_nonces.entry(*owner).or_default().insert(nonce) {
            return Err(EscrowError::AuthorizationNonceReused { nonce });
        }
        Ok(())
    }

    #[must_use]
    pub fn is_used(&self, owner: &Address, nonce: u64) -> bool {
        self.used_nonces
            .get(owner)
            .is_some_and(|nonces| nonces.contains(&nonce))
    }

    /// Total nonces consumed across all owners.
    #[must_use]
    pub fn total_consumed(&self) -> usize {
        self.used_nonces.values().map(HashSet::len).sum()
    }
}
