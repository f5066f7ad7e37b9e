//! Supply conservation invariant checker.
//!
//! Mathematical invariant enforced by the simulated chain:
//! ```text
//! ∀ token: Σ(balances, including market vaults) == Σ(minted)
//! ```
//!
//! Escrow steps, market operations and interest payments only move tokens
//! between accounts; none of them may create or destroy supply.

use std::collections::HashMap;

use yieldescrow_types::{Amount, Asset, EscrowError, Result};

/// Tracks per-token mint totals and validates conservation against the bank.
#[derive(Debug, Clone, Default)]
pub struct SupplyConservation {
    /// Total minted per token since genesis.
    minted: HashMap<Asset, Amount>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mint.
    pub fn record_mint(&mut self, token: &str, amount: Amount) {
        let entry = self.minted.entry(token.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Expected total supply for a token.
    #[must_use]
    pub fn expected_supply(&self, token: &str) -> Amount {
        self.minted.get(token).copied().unwrap_or(0)
    }

    /// Verify that the actual supply (sum of all balances) matches the mints.
    ///
    /// # Errors
    /// Returns [`EscrowError::SupplyInvariantViolation`] if actual ≠ expected.
    pub fn verify(&self, token: &str, actual_supply: Amount) -> Result<()> {
        let expected = self.expected_supply(token);
        if actual_supply != expected {
            return Err(EscrowError::SupplyInvariantViolation {
                reason: format!("Token {token}: actual supply {actual_supply} != minted {expected}"),
            });
        }
        Ok(())
    }

    /// All tokens ever minted.
    #[must_use]
    pub fn tracked_tokens(&self) -> Vec<Asset> {
        self.minted.keys().cloned().collect()
    }
}
