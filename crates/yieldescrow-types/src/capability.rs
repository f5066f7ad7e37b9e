//! Capability traits: the external collaborators the escrow ledger calls.
//!
//! The ledger never touches balances, permits or market positions
//! directly. Everything goes through these seams, so any shared ledger
//! (a simulated chain in tests, an adapter over a real one elsewhere) can
//! back it. A [`Host`] must be `Clone`: the ledger checkpoints the host at
//! the start of every step and restores it if the step fails.

use chrono::{DateTime, Utc};

use crate::{
    Address, Amount, MarketDescriptor, MarketId, MarketState, PermitSignature, Result,
    TransferPermit,
};

/// Source of the current ledger time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Plain token movements between accounts.
pub trait AssetTransfer {
    fn balance_of(&self, token: &str, holder: &Address) -> Amount;

    /// Move `amount` of `token` from `from` to `to`.
    fn transfer(&mut self, token: &str, from: &Address, to: &Address, amount: Amount)
    -> Result<()>;
}

/// Redeems signed single-use transfer permits.
pub trait PermitClient {
    /// Verify `permit` and `signature`, consume its nonce, and move `amount`
    /// from the permit owner to `destination`. The caller is `permit.spender`.
    ///
    /// Fails closed if expired, already consumed, over the permitted amount,
    /// or the signature does not verify.
    fn pull_with_permit(
        &mut self,
        permit: &TransferPermit,
        signature: &PermitSignature,
        destination: &Address,
        amount: Amount,
    ) -> Result<()>;

    fn is_nonce_used(&self, owner: &Address, nonce: u64) -> bool;
}

/// Interest-bearing deposit market with share accounting.
pub trait LendingMarket {
    /// Supply exactly `assets` from `depositor`; returns the shares minted to it.
    fn supply(
        &mut self,
        market: &MarketDescriptor,
        assets: Amount,
        depositor: &Address,
    ) -> Result<u128>;

    /// Withdraw on behalf of `depositor`, sending assets to `receiver`.
    ///
    /// Exactly one of `assets` and `shares` must be non-zero. With a share
    /// basis the market decides the assets released, which includes any
    /// accrued interest. Returns the assets released.
    fn withdraw(
        &mut self,
        market: &MarketDescriptor,
        assets: Amount,
        shares: u128,
        depositor: &Address,
        receiver: &Address,
    ) -> Result<Amount>;

    /// Shares held by `holder` in `market`.
    fn position(&self, market: &MarketId, holder: &Address) -> u128;

    fn market_state(&self, market: &MarketId) -> Result<MarketState>;

    /// Assets `shares` would redeem for right now (rounded down).
    fn preview_redeem(&self, market: &MarketId, shares: u128) -> Result<Amount>;
}

/// Token-level callback run on every transfer of that token.
///
/// Returning an error rejects the transfer. Hooks may call back into
/// arbitrary code, including the escrow ledger itself.
pub trait TransferHook: Send + Sync {
    fn on_transfer(&self, token: &str, from: &Address, to: &Address, amount: Amount)
    -> Result<()>;
}

/// Everything the escrow ledger needs from the shared ledger it runs on.
pub trait Host: Clock + AssetTransfer + PermitClient + LendingMarket + Clone + Send {}

impl<T> Host for T where T: Clock + AssetTransfer + PermitClient + LendingMarket + Clone + Send {}
