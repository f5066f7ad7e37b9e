//! Share-based lending pool.
//!
//! Each market holds its liquidity in a vault account on the token bank.
//! Suppliers own shares; the asset value of a share grows as interest is
//! paid into the market and shrinks only when bad debt is realized.
//!
//! Invariant per market: `vault balance == total_supply_assets - total_borrow_assets`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use yieldescrow_types::{
    Address, Amount, EscrowError, MarketDescriptor, MarketId, MarketState, Result,
};

use crate::shares_math::{mul_div_down, to_assets_down, to_shares_down, to_shares_up};
use crate::token_bank::TokenBank;

/// All markets plus every supplier position and borrower debt.
#[derive(Debug, Clone, Default)]
pub struct LendingPool {
    markets: HashMap<MarketId, MarketState>,
    /// `(market, holder) → shares`.
    positions: HashMap<(MarketId, Address), u128>,
    /// `(market, borrower) → assets owed`.
    debts: HashMap<(MarketId, Address), Amount>,
}

impl LendingPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market for `descriptor`.
    ///
    /// # Errors
    /// - `MarketAlreadyExists` if it is already registered
    /// - `InconsistentMarketInput` if the LLTV is outside `[0, 1)`
    pub fn create_market(
        &mut self,
        descriptor: MarketDescriptor,
        supply_cap: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<MarketId> {
        let id = descriptor.id();
        if self.markets.contains_key(&id) {
            return Err(EscrowError::MarketAlreadyExists(id));
        }
        if !descriptor.lltv_is_valid() {
            return Err(EscrowError::InconsistentMarketInput {
                reason: format!("lltv {} outside [0, 1)", descriptor.lltv),
            });
        }
        tracing::debug!(market = %id, loan = %descriptor.loan_token, "Market created");
        self.markets.insert(
            id,
            MarketState {
                id,
                descriptor,
                total_supply_assets: 0,
                total_supply_shares: 0,
                total_borrow_assets: 0,
                supply_cap,
                last_update: now,
            },
        );
        Ok(id)
    }

    fn market(&self, id: &MarketId) -> Result<&MarketState> {
        self.markets.get(id).ok_or(EscrowError::MarketNotFound(*id))
    }

    /// Aggregate state of a market.
    pub fn state(&self, id: &MarketId) -> Result<MarketState> {
        self.market(id).cloned()
    }

    /// Shares held by `holder`.
    #[must_use]
    pub fn position(&self, id: &MarketId, holder: &Address) -> u128 {
        self.positions.get(&(*id, *holder)).copied().unwrap_or(0)
    }

    /// Assets owed by `borrower`.
    #[must_use]
    pub fn debt(&self, id: &MarketId, borrower: &Address) -> Amount {
        self.debts.get(&(*id, *borrower)).copied().unwrap_or(0)
    }

    /// Current redemption value of `shares`.
    pub fn preview_redeem(&self, id: &MarketId, shares: u128) -> Result<Amount> {
        let m = self.market(id)?;
        to_assets_down(shares, m.total_supply_assets, m.total_supply_shares)
    }

    /// Supply exactly `assets` from `depositor`. Returns shares minted.
    ///
    /// # Errors
    /// - `MarketNotFound`, `ZeroMarketAmount`, `SupplyCapExceeded`
    /// - any token bank error moving funds into the vault
    pub fn supply(
        &mut self,
        bank: &mut TokenBank,
        descriptor: &MarketDescriptor,
        assets: Amount,
        depositor: &Address,
        now: DateTime<Utc>,
    ) -> Result<u128> {
        let id = descriptor.id();
        let m = self.market(&id)?;
        if assets == 0 {
            return Err(EscrowError::ZeroMarketAmount);
        }
        let new_total_assets = m
            .total_supply_assets
            .checked_add(assets)
            .ok_or_else(|| EscrowError::overflow("market supply assets"))?;
        if let Some(cap) = m.supply_cap {
            if new_total_assets > cap {
                return Err(EscrowError::SupplyCapExceeded {
                    cap,
                    requested: new_total_assets,
                });
            }
        }
        let shares = to_shares_down(assets, m.total_supply_assets, m.total_supply_shares)?;
        if shares == 0 {
            return Err(EscrowError::ZeroMarketAmount);
        }
        let new_total_shares = m
            .total_supply_shares
            .checked_add(shares)
            .ok_or_else(|| EscrowError::overflow("market supply shares"))?;
        let new_position = self
            .position(&id, depositor)
            .checked_add(shares)
            .ok_or_else(|| EscrowError::overflow("supplier position"))?;

        bank.transfer(&descriptor.loan_token, depositor, &id.vault_address(), assets)?;

        let m = self
            .markets
            .get_mut(&id)
            .ok_or(EscrowError::MarketNotFound(id))?;
        m.total_supply_assets = new_total_assets;
        m.total_supply_shares = new_total_shares;
        m.last_update = now;
        self.positions.insert((id, *depositor), new_position);

        tracing::debug!(market = %id, %depositor, assets, shares, "Supplied");
        Ok(shares)
    }

    /// Withdraw for `depositor` to `receiver` by exact assets or exact shares.
    /// Returns the assets released.
    ///
    /// # Errors
    /// - `InconsistentMarketInput` unless exactly one of `assets`/`shares` is non-zero
    /// - `InsufficientShares`, `InsufficientLiquidity`, `MarketNotFound`
    #[allow(clippy::too_many_arguments)]
    pub fn withdraw(
        &mut self,
        bank: &mut TokenBank,
        descriptor: &MarketDescriptor,
        assets: Amount,
        shares: u128,
        depositor: &Address,
        receiver: &Address,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        let id = descriptor.id();
        let m = self.market(&id)?;
        if (assets == 0) == (shares == 0) {
            return Err(EscrowError::InconsistentMarketInput {
                reason: "exactly one of assets and shares must be non-zero".into(),
            });
        }
        let (assets, shares) = if shares == 0 {
            (
                assets,
                to_shares_up(assets, m.total_supply_assets, m.total_supply_shares)?,
            )
        } else {
            (
                to_assets_down(shares, m.total_supply_assets, m.total_supply_shares)?,
                shares,
            )
        };

        let held = self.position(&id, depositor);
        if held < shares {
            return Err(EscrowError::InsufficientShares {
                needed: shares,
                available: held,
            });
        }
        let idle = m.idle_liquidity();
        if idle < assets {
            return Err(EscrowError::InsufficientLiquidity {
                needed: assets,
                available: idle,
            });
        }

        bank.transfer(&descriptor.loan_token, &id.vault_address(), receiver, assets)?;

        let m = self
            .markets
            .get_mut(&id)
            .ok_or(EscrowError::MarketNotFound(id))?;
        m.total_supply_assets -= assets;
        m.total_supply_shares -= shares;
        m.last_update = now;
        self.positions.insert((id, *depositor), held - shares);

        tracing::debug!(market = %id, %depositor, %receiver, assets, shares, "Withdrawn");
        Ok(assets)
    }

    /// Lend idle liquidity to `borrower`. Collateral is not modeled.
    pub fn borrow(
        &mut self,
        bank: &mut TokenBank,
        id: &MarketId,
        assets: Amount,
        borrower: &Address,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let m = self.market(id)?;
        let idle = m.idle_liquidity();
        if idle < assets {
            return Err(EscrowError::InsufficientLiquidity {
                needed: assets,
                available: idle,
            });
        }
        let token = m.descriptor.loan_token.clone();
        bank.transfer(&token, &id.vault_address(), borrower, assets)?;

        let m = self.markets.get_mut(id).ok_or(EscrowError::MarketNotFound(*id))?;
        m.total_borrow_assets += assets;
        m.last_update = now;
        *self.debts.entry((*id, *borrower)).or_default() += assets;
        Ok(())
    }

    /// Repay up to the borrower's outstanding debt.
    pub fn repay(
        &mut self,
        bank: &mut TokenBank,
        id: &MarketId,
        assets: Amount,
        borrower: &Address,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let m = self.market(id)?;
        let owed = self.debt(id, borrower);
        if assets > owed {
            return Err(EscrowError::InconsistentMarketInput {
                reason: format!("repay {assets} exceeds debt {owed}"),
            });
        }
        let token = m.descriptor.loan_token.clone();
        bank.transfer(&token, borrower, &id.vault_address(), assets)?;

        let m = self.markets.get_mut(id).ok_or(EscrowError::MarketNotFound(*id))?;
        m.total_borrow_assets -= assets;
        m.last_update = now;
        self.debts.insert((*id, *borrower), owed - assets);
        Ok(())
    }

    /// Pay `interest` from `payer` into the market; every supplier's shares
    /// appreciate pro rata. A market with no outstanding shares has nobody to
    /// credit, so positive interest into it is rejected.
    pub fn accrue_interest(
        &mut self,
        bank: &mut TokenBank,
        id: &MarketId,
        interest: Amount,
        payer: &Address,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let m = self.market(id)?;
        if interest > 0 && m.total_supply_shares == 0 {
            return Err(EscrowError::InconsistentMarketInput {
                reason: format!("interest {interest} into market {id} with no suppliers"),
            });
        }
        let new_total = m
            .total_supply_assets
            .checked_add(interest)
            .ok_or_else(|| EscrowError::overflow("interest accrual"))?;
        let token = m.descriptor.loan_token.clone();
        bank.transfer(&token, payer, &id.vault_address(), interest)?;

        let m = self.markets.get_mut(id).ok_or(EscrowError::MarketNotFound(*id))?;
        m.total_supply_assets = new_total;
        m.last_update = now;
        tracing::debug!(market = %id, interest, total_supply = new_total, "Interest accrued");
        Ok(())
    }

    /// Accrue `rate × total_supply_assets` (rounded down), paid by `payer`.
    /// Returns the interest amount.
    pub fn accrue_interest_rate(
        &mut self,
        bank: &mut TokenBank,
        id: &MarketId,
        rate: Decimal,
        payer: &Address,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        if rate.is_sign_negative() {
            return Err(EscrowError::InconsistentMarketInput {
                reason: format!("negative interest rate {rate}"),
            });
        }
        let total = self.market(id)?.total_supply_assets;
        let mantissa = u128::try_from(rate.mantissa())
            .map_err(|_| EscrowError::overflow("interest rate mantissa"))?;
        let scale = 10u128.pow(rate.scale());
        let interest = mul_div_down(total, mantissa, scale)?;
        self.accrue_interest(bank, id, interest, payer, now)?;
        Ok(interest)
    }

    /// Write off `assets` of a borrower's debt; suppliers absorb the loss.
    pub fn realize_bad_debt(
        &mut self,
        id: &MarketId,
        borrower: &Address,
        assets: Amount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let owed = self.debt(id, borrower);
        if assets > owed {
            return Err(EscrowError::InconsistentMarketInput {
                reason: format!("bad debt {assets} exceeds debt {owed}"),
            });
        }
        let m = self.markets.get_mut(id).ok_or(EscrowError::MarketNotFound(*id))?;
        m.total_borrow_assets -= assets;
        m.total_supply_assets = m.total_supply_assets.saturating_sub(assets);
        m.last_update = now;
        self.debts.insert((*id, *borrower), owed - assets);
        tracing::debug!(market = %id, %borrower, assets, "Bad debt realized");
        Ok(())
    }

    /// Check that each vault holds exactly its idle liquidity.
    pub fn verify_vault_backing(&self, bank: &TokenBank) -> Result<()> {
        for m in self.markets.values() {
            let held = bank.balance(&m.id.vault_address(), &m.descriptor.loan_token);
            if held != m.idle_liquidity() {
                return Err(EscrowError::SupplyInvariantViolation {
                    reason: format!(
                        "{}: vault holds {held}, idle liquidity is {}",
                        m.id,
                        m.idle_liquidity()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        pool: LendingPool,
        bank: TokenBank,
        desc: MarketDescriptor,
        id: MarketId,
        alice: Address,
        bob: Address,
    }

    fn setup(cap: Option<Amount>) -> Fixture {
        let mut pool = LendingPool::new();
        let mut bank = TokenBank::new();
        let desc = MarketDescriptor::dummy("USDC");
        let id = pool.create_market(desc.clone(), cap, Utc::now()).unwrap();
        let alice = Address::random();
        let bob = Address::random();
        bank.mint(alice, "USDC", 10_000).unwrap();
        bank.mint(bob, "USDC", 10_000).unwrap();
        Fixture { pool, bank, desc, id, alice, bob }
    }

    #[test]
    fn duplicate_market_rejected() {
        let mut f = setup(None);
        let err = f.pool.create_market(f.desc.clone(), None, Utc::now()).unwrap_err();
        assert_eq!(err, EscrowError::MarketAlreadyExists(f.id));
    }

    #[test]
    fn supply_mints_shares_and_moves_funds() {
        let mut f = setup(None);
        let shares = f.pool.supply(&mut f.bank, &f.desc, 800, &f.alice, Utc::now()).unwrap();
        assert_eq!(shares, 800_000_000);
        assert_eq!(f.pool.position(&f.id, &f.alice), shares);
        assert_eq!(f.bank.balance(&f.alice, "USDC"), 9_200);
        assert_eq!(f.bank.balance(&f.id.vault_address(), "USDC"), 800);
        f.pool.verify_vault_backing(&f.bank).unwrap();
    }

    #[test]
    fn supply_unknown_market_fails() {
        let mut f = setup(None);
        let other = MarketDescriptor::dummy("DAI");
        let err = f.pool.supply(&mut f.bank, &other, 1, &f.alice, Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::MarketNotFound(_)));
    }

    #[test]
    fn supply_cap_enforced_without_moving_funds() {
        let mut f = setup(Some(1_000));
        f.pool.supply(&mut f.bank, &f.desc, 600, &f.alice, Utc::now()).unwrap();
        let err = f.pool.supply(&mut f.bank, &f.desc, 500, &f.bob, Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::SupplyCapExceeded { cap: 1_000, requested: 1_100 }));
        assert_eq!(f.bank.balance(&f.bob, "USDC"), 10_000);
    }

    #[test]
    fn interest_accrues_to_share_holders() {
        let mut f = setup(None);
        let shares = f.pool.supply(&mut f.bank, &f.desc, 800, &f.alice, Utc::now()).unwrap();
        f.pool.accrue_interest(&mut f.bank, &f.id, 50, &f.bob, Utc::now()).unwrap();
        assert_eq!(f.pool.preview_redeem(&f.id, shares).unwrap(), 850);

        let out = f.pool
            .withdraw(&mut f.bank, &f.desc, 0, shares, &f.alice, &f.alice, Utc::now())
            .unwrap();
        assert_eq!(out, 850);
        assert_eq!(f.bank.balance(&f.alice, "USDC"), 10_050);
        assert_eq!(f.pool.position(&f.id, &f.alice), 0);
        f.pool.verify_vault_backing(&f.bank).unwrap();
    }

    #[test]
    fn interest_into_empty_market_rejected() {
        let mut f = setup(None);
        let err = f.pool.accrue_interest(&mut f.bank, &f.id, 50, &f.bob, Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::InconsistentMarketInput { .. }));
        assert_eq!(f.bank.balance(&f.bob, "USDC"), 10_000);
        assert_eq!(f.pool.state(&f.id).unwrap().total_supply_assets, 0);

        // Zero interest is a no-op, and the first supplier starts at the base rate.
        f.pool.accrue_interest(&mut f.bank, &f.id, 0, &f.bob, Utc::now()).unwrap();
        let shares = f.pool.supply(&mut f.bank, &f.desc, 800, &f.alice, Utc::now()).unwrap();
        assert_eq!(shares, 800_000_000);
        assert_eq!(f.pool.preview_redeem(&f.id, shares).unwrap(), 800);
        f.pool.verify_vault_backing(&f.bank).unwrap();
    }

    #[test]
    fn interest_split_pro_rata() {
        let mut f = setup(None);
        let a = f.pool.supply(&mut f.bank, &f.desc, 300, &f.alice, Utc::now()).unwrap();
        let b = f.pool.supply(&mut f.bank, &f.desc, 100, &f.bob, Utc::now()).unwrap();
        f.pool.accrue_interest(&mut f.bank, &f.id, 40, &f.bob, Utc::now()).unwrap();
        assert_eq!(f.pool.preview_redeem(&f.id, a).unwrap(), 330);
        assert_eq!(f.pool.preview_redeem(&f.id, b).unwrap(), 110);
    }

    #[test]
    fn withdraw_by_assets_burns_shares_up() {
        let mut f = setup(None);
        f.pool.supply(&mut f.bank, &f.desc, 300, &f.alice, Utc::now()).unwrap();
        f.pool.accrue_interest(&mut f.bank, &f.id, 1, &f.bob, Utc::now()).unwrap();
        let before = f.pool.position(&f.id, &f.alice);
        let out = f.pool
            .withdraw(&mut f.bank, &f.desc, 100, 0, &f.alice, &f.alice, Utc::now())
            .unwrap();
        assert_eq!(out, 100);
        let burned = before - f.pool.position(&f.id, &f.alice);
        // 100 * 300e6 / 301, rounded up.
        assert_eq!(burned, 99_667_775);
    }

    #[test]
    fn withdraw_requires_exactly_one_input() {
        let mut f = setup(None);
        for (a, s) in [(0, 0), (1, 1)] {
            let err = f.pool
                .withdraw(&mut f.bank, &f.desc, a, s, &f.alice, &f.alice, Utc::now())
                .unwrap_err();
            assert!(matches!(err, EscrowError::InconsistentMarketInput { .. }));
        }
    }

    #[test]
    fn withdraw_more_shares_than_held_fails() {
        let mut f = setup(None);
        let shares = f.pool.supply(&mut f.bank, &f.desc, 100, &f.alice, Utc::now()).unwrap();
        let err = f.pool
            .withdraw(&mut f.bank, &f.desc, 0, shares + 1, &f.alice, &f.alice, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientShares { .. }));
    }

    #[test]
    fn borrowed_liquidity_blocks_withdraw() {
        let mut f = setup(None);
        let shares = f.pool.supply(&mut f.bank, &f.desc, 800, &f.alice, Utc::now()).unwrap();
        f.pool.borrow(&mut f.bank, &f.id, 500, &f.bob, Utc::now()).unwrap();
        let err = f.pool
            .withdraw(&mut f.bank, &f.desc, 0, shares, &f.alice, &f.alice, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientLiquidity { needed: 800, available: 300 }));

        f.pool.repay(&mut f.bank, &f.id, 500, &f.bob, Utc::now()).unwrap();
        assert_eq!(f.pool.debt(&f.id, &f.bob), 0);
        assert!(f.pool
            .withdraw(&mut f.bank, &f.desc, 0, shares, &f.alice, &f.alice, Utc::now())
            .is_ok());
    }

    #[test]
    fn bad_debt_reduces_share_value() {
        let mut f = setup(None);
        let shares = f.pool.supply(&mut f.bank, &f.desc, 800, &f.alice, Utc::now()).unwrap();
        f.pool.borrow(&mut f.bank, &f.id, 100, &f.bob, Utc::now()).unwrap();
        f.pool.realize_bad_debt(&f.id, &f.bob, 100, Utc::now()).unwrap();
        assert_eq!(f.pool.preview_redeem(&f.id, shares).unwrap(), 700);
        f.pool.verify_vault_backing(&f.bank).unwrap();
    }

    #[test]
    fn interest_rate_accrual() {
        let mut f = setup(None);
        f.pool.supply(&mut f.bank, &f.desc, 1_000, &f.alice, Utc::now()).unwrap();
        let interest = f.pool
            .accrue_interest_rate(&mut f.bank, &f.id, Decimal::new(25, 3), &f.bob, Utc::now())
            .unwrap();
        assert_eq!(interest, 25);
        assert_eq!(f.pool.state(&f.id).unwrap().total_supply_assets, 1_025);
        assert!(f.pool
            .accrue_interest_rate(&mut f.bank, &f.id, Decimal::new(-1, 2), &f.bob, Utc::now())
            .is_err());
    }
}
