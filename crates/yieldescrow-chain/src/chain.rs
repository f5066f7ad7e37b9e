//! The simulated shared ledger the escrow core runs against.
//!
//! `SimulatedChain` bundles a clock, the token bank, the permit registry,
//! the lending pool and the supply checker, and implements every
//! capability trait in `yieldescrow_types::capability`. It is `Clone`, so
//! a caller can checkpoint it before a step and restore it on failure.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use yieldescrow_types::{
    Address, Amount, AssetTransfer, Clock, LendingMarket, MarketDescriptor, MarketId,
    MarketState, PermitClient, PermitSignature, Result, TransferHook, TransferPermit,
};

use crate::lending_pool::LendingPool;
use crate::permit_registry::PermitRegistry;
use crate::supply_conservation::SupplyConservation;
use crate::token_bank::TokenBank;

#[derive(Debug, Clone)]
pub struct SimulatedChain {
    now: DateTime<Utc>,
    bank: TokenBank,
    permits: PermitRegistry,
    pool: LendingPool,
    supply: SupplyConservation,
}

impl SimulatedChain {
    /// A fresh chain whose clock starts at `genesis`.
    #[must_use]
    pub fn new(genesis: DateTime<Utc>) -> Self {
        Self {
            now: genesis,
            bank: TokenBank::new(),
            permits: PermitRegistry::new(),
            pool: LendingPool::new(),
            supply: SupplyConservation::new(),
        }
    }

    // ── clock ──────────────────────────────────────────────────────────

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn set_time(&mut self, at: DateTime<Utc>) {
        self.now = at;
    }

    // ── tokens ─────────────────────────────────────────────────────────

    /// Create new supply in `holder`'s account.
    pub fn mint(&mut self, holder: Address, token: &str, amount: Amount) -> Result<()> {
        self.bank.mint(holder, token, amount)?;
        self.supply.record_mint(token, amount);
        Ok(())
    }

    pub fn set_transfer_hook(&mut self, token: &str, hook: Arc<dyn TransferHook>) {
        self.bank.set_hook(token, hook);
    }

    pub fn clear_transfer_hook(&mut self, token: &str) {
        self.bank.clear_hook(token);
    }

    // ── markets ────────────────────────────────────────────────────────

    pub fn create_market(
        &mut self,
        descriptor: MarketDescriptor,
        supply_cap: Option<Amount>,
    ) -> Result<MarketId> {
        self.pool.create_market(descriptor, supply_cap, self.now)
    }

    pub fn borrow(&mut self, market: &MarketId, assets: Amount, borrower: &Address) -> Result<()> {
        self.pool.borrow(&mut self.bank, market, assets, borrower, self.now)
    }

    pub fn repay(&mut self, market: &MarketId, assets: Amount, borrower: &Address) -> Result<()> {
        self.pool.repay(&mut self.bank, market, assets, borrower, self.now)
    }

    /// Pay `interest` from `payer` into the market's supply side.
    pub fn accrue_interest(&mut self, market: &MarketId, interest: Amount, payer: &Address) -> Result<()> {
        self.pool
            .accrue_interest(&mut self.bank, market, interest, payer, self.now)
    }

    /// Pay `rate × total supply` from `payer`. Returns the interest paid.
    pub fn accrue_interest_rate(
        &mut self,
        market: &MarketId,
        rate: Decimal,
        payer: &Address,
    ) -> Result<Amount> {
        self.pool
            .accrue_interest_rate(&mut self.bank, market, rate, payer, self.now)
    }

    pub fn realize_bad_debt(&mut self, market: &MarketId, borrower: &Address, assets: Amount) -> Result<()> {
        self.pool.realize_bad_debt(market, borrower, assets, self.now)
    }

    // ── invariants ─────────────────────────────────────────────────────

    /// Supply conservation for one token.
    pub fn verify_supply(&self, token: &str) -> Result<()> {
        self.supply.verify(token, self.bank.total_supply(token))
    }

    /// Supply conservation for every minted token, plus vault backing.
    pub fn verify_all(&self) -> Result<()> {
        for token in self.supply.tracked_tokens() {
            self.verify_supply(&token)?;
        }
        self.pool.verify_vault_backing(&self.bank)
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for SimulatedChain {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl AssetTransfer for SimulatedChain {
    fn balance_of(&self, token: &str, holder: &Address) -> Amount {
        self.bank.balance(holder, token)
    }

    fn transfer(&mut self, token: &str, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.bank.transfer(token, from, to, amount)
    }
}

impl PermitClient for SimulatedChain {
    fn pull_with_permit(
        &mut self,
        permit: &TransferPermit,
        signature: &PermitSignature,
        destination: &Address,
        amount: Amount,
    ) -> Result<()> {
        // The redeeming contract is the permit's spender; funds may land elsewhere.
        self.permits
            .check(permit, signature, &permit.spender, amount, self.now)?;
        self.bank
            .transfer(&permit.token, &permit.owner, destination, amount)?;
        self.permits.consume(&permit.owner, permit.nonce)?;
        tracing::debug!(
            owner = %permit.owner,
            %destination,
            token = %permit.token,
            amount,
            nonce = permit.nonce,
            "Permit redeemed"
        );
        Ok(())
    }

    fn is_nonce_used(&self, owner: &Address, nonce: u64) -> bool {
        self.permits.is_used(owner, nonce)
    }
}

impl LendingMarket for SimulatedChain {
    fn supply(&mut self, market: &MarketDescriptor, assets: Amount, depositor: &Address) -> Result<u128> {
        self.pool
            .supply(&mut self.bank, market, assets, depositor, self.now)
    }

    fn withdraw(
        &mut self,
        market: &MarketDescriptor,
        assets: Amount,
        shares: u128,
        depositor: &Address,
        receiver: &Address,
    ) -> Result<Amount> {
        self.pool.withdraw(
            &mut self.bank,
            market,
            assets,
            shares,
            depositor,
            receiver,
            self.now,
        )
    }

    fn position(&self, market: &MarketId, holder: &Address) -> u128 {
        self.pool.position(market, holder)
    }

    fn market_state(&self, market: &MarketId) -> Result<MarketState> {
        self.pool.state(market)
    }

    fn preview_redeem(&self, market: &MarketId, shares: u128) -> Result<Amount> {
        self.pool.preview_redeem(market, shares)
    }
}
