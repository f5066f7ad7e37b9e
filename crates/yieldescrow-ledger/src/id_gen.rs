//! Escrow identifier derivation.
//!
//! `id = SHA-256(domain || payer || vendor || len(token) || token || amount
//! || len(service_ref) || service_ref || created_at_ms || counter)`.
//! The counter is per-ledger and strictly increasing, so two escrows
//! created from identical inputs in the same millisecond still differ.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use yieldescrow_types::{Address, Amount, EscrowId, constants};

/// Hash inputs for one escrow id.
#[derive(Debug, Clone, Copy)]
pub struct EscrowIdInput<'a> {
    pub payer: &'a Address,
    pub vendor: &'a Address,
    pub token: &'a str,
    pub amount: Amount,
    pub service_ref: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Derive the escrow id for `input` at position `counter`.
#[must_use]
pub fn derive_escrow_id(input: &EscrowIdInput<'_>, counter: u64) -> EscrowId {
    let mut hasher = Sha256::new();
    hasher.update(constants::ESCROW_ID_DOMAIN);
    hasher.update(input.payer.as_bytes());
    hasher.update(input.vendor.as_bytes());
    hasher.update((input.token.len() as u64).to_le_bytes());
    hasher.update(input.token.as_bytes());
    hasher.update(input.amount.to_le_bytes());
    hasher.update((input.service_ref.len() as u64).to_le_bytes());
    hasher.update(input.service_ref.as_bytes());
    hasher.update(input.created_at.timestamp_millis().to_le_bytes());
    hasher.update(counter.to_le_bytes());
    EscrowId(hasher.finalize().into())
}
