//! Token bank: per-(holder, token) balances and token transfer hooks.
//!
//! Every mutation is all-or-nothing: a transfer rejected by a hook leaves
//! both balances as they were.

use std::{collections::HashMap, fmt, sync::Arc};

use yieldescrow_types::{Address, Amount, Asset, EscrowError, Result, TransferHook};

/// Source of truth for token balances on the simulated chain.
#[derive(Clone, Default)]
pub struct TokenBank {
    /// Per-(holder, token) balances. Absent means zero.
    balances: HashMap<(Address, Asset), Amount>,
    /// Optional per-token callback run after each transfer.
    hooks: HashMap<Asset, Arc<dyn TransferHook>>,
}

impl TokenBank {
    /// Create a new empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `amount` new units of `token` in `holder`'s account.
    ///
    /// # Errors
    /// Returns `ArithmeticOverflow` if the balance would exceed `u128::MAX`.
    pub fn mint(&mut self, holder: Address, token: &str, amount: Amount) -> Result<()> {
        let entry = self.balances.entry((holder, token.to_string())).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| EscrowError::overflow("token mint"))?;
        Ok(())
    }

    /// Balance for a (holder, token) pair.
    #[must_use]
    pub fn balance(&self, holder: &Address, token: &str) -> Amount {
        self.balances
            .get(&(*holder, token.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Move `amount` of `token` from `from` to `to`, then run the token hook.
    ///
    /// # Errors
    /// - `InsufficientBalance` if `from` holds less than `amount`
    /// - `TransferRejected` if the token hook rejects (balances restored)
    pub fn transfer(&mut self, token: &str, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        let available = self.balance(from, token);
        if available < amount {
            return Err(EscrowError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        let to_before = self.balance(to, token);
        if from != to {
            let credited = to_before
                .checked_add(amount)
                .ok_or_else(|| EscrowError::overflow("token transfer"))?;
            self.balances
                .insert((*from, token.to_string()), available - amount);
            self.balances.insert((*to, token.to_string()), credited);
        }

        if let Some(hook) = self.hooks.get(token).cloned() {
            if let Err(err) = hook.on_transfer(token, from, to, amount) {
                self.balances.insert((*from, token.to_string()), available);
                self.balances.insert((*to, token.to_string()), to_before);
                tracing::debug!(token, %from, %to, amount, error = %err, "Transfer rejected by hook");
                return Err(EscrowError::TransferRejected {
                    reason: err.to_string(),
                });
            }
        }

        tracing::debug!(token, %from, %to, amount, "Token transfer");
        Ok(())
    }

    /// Install (or replace) the transfer hook for `token`.
    pub fn set_hook(&mut self, token: &str, hook: Arc<dyn TransferHook>) {
        self.hooks.insert(token.to_string(), hook);
    }

    /// Remove the transfer hook for `token`.
    pub fn clear_hook(&mut self, token: &str) {
        self.hooks.remove(token);
    }

    /// Total units of `token` held across all accounts.
    #[must_use]
    pub fn total_supply(&self, token: &str) -> Amount {
        self.balances
            .iter()
            .filter(|((_, t), _)| t == token)
            .fold(0u128, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

impl fmt::Debug for TokenBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBank")
            .field("accounts", &self.balances.len())
            .field("hooked_tokens", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}
