//! Lending market descriptors, aggregate state and per-asset bindings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Address, Amount, Asset, MarketId, constants};

/// Parameters identifying one lending market.
///
/// Two descriptors with identical fields name the same market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketDescriptor {
    /// Asset supplied and borrowed.
    pub loan_token: Asset,
    /// Asset borrowers post as collateral.
    pub collateral_token: Asset,
    /// Price oracle account.
    pub oracle: Address,
    /// Interest-rate model account.
    pub irm: Address,
    /// Liquidation loan-to-value threshold, in `[0, 1)`.
    pub lltv: Decimal,
}

impl MarketDescriptor {
    /// Market identifier: SHA-256 over the canonical encoding.
    ///
    /// Format: `domain || len(loan) || loan || len(coll) || coll || oracle || irm || lltv(normalized str)`
    #[must_use]
    pub fn id(&self) -> MarketId {
        let mut hasher = Sha256::new();
        hasher.update(constants::MARKET_ID_DOMAIN);
        hasher.update((self.loan_token.len() as u64).to_le_bytes());
        hasher.update(self.loan_token.as_bytes());
        hasher.update((self.collateral_token.len() as u64).to_le_bytes());
        hasher.update(self.collateral_token.as_bytes());
        hasher.update(self.oracle.as_bytes());
        hasher.update(self.irm.as_bytes());
        hasher.update(self.lltv.normalize().to_string().as_bytes());
        MarketId(hasher.finalize().into())
    }

    /// Whether the liquidation threshold is usable.
    #[must_use]
    pub fn lltv_is_valid(&self) -> bool {
        self.lltv >= Decimal::ZERO && self.lltv < Decimal::ONE
    }
}

/// Dummy descriptor for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl MarketDescriptor {
    pub fn dummy(loan_token: &str) -> Self {
        Self {
            loan_token: loan_token.to_string(),
            collateral_token: "WETH".to_string(),
            oracle: Address::derive("oracle:weth"),
            irm: Address::derive("irm:adaptive"),
            lltv: Decimal::new(86, 2),
        }
    }
}

/// Aggregate figures for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub id: MarketId,
    pub descriptor: MarketDescriptor,
    /// Assets owed to suppliers (principal plus accrued interest).
    pub total_supply_assets: Amount,
    /// Shares outstanding across all suppliers.
    pub total_supply_shares: u128,
    /// Assets currently lent out.
    pub total_borrow_assets: Amount,
    /// Optional ceiling on `total_supply_assets`.
    pub supply_cap: Option<Amount>,
    pub last_update: DateTime<Utc>,
}

impl MarketState {
    /// Assets held by the market and available for withdrawal.
    #[must_use]
    pub fn idle_liquidity(&self) -> Amount {
        self.total_supply_assets
            .saturating_sub(self.total_borrow_assets)
    }

    /// Borrowed / supplied. Zero for an empty market.
    #[must_use]
    pub fn utilization(&self) -> Decimal {
        if self.total_supply_assets == 0 {
            return Decimal::ZERO;
        }
        // Scale both sides into u64 range; the ratio survives the shift.
        let shift = (128 - self.total_supply_assets.leading_zeros()).saturating_sub(64);
        let supply = u64::try_from(self.total_supply_assets >> shift).unwrap_or(u64::MAX);
        let borrow = u64::try_from(self.total_borrow_assets >> shift).unwrap_or(u64::MAX);
        Decimal::from(borrow)
            .checked_div(Decimal::from(supply))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Per-asset configuration: which market receives deposits, and whether the
/// asset is accepted at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMarketBinding {
    pub token: Asset,
    pub market: MarketDescriptor,
    pub allowed: bool,
    pub updated_at: DateTime<Utc>,
}

impl TokenMarketBinding {
    #[must_use]
    pub fn market_id(&self) -> MarketId {
        self.market.id()
    }
}
