//! Configuration for an escrow ledger instance.

use serde::{Deserialize, Serialize};

use crate::{Address, EscrowError, Result, constants};

/// Per-ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account that holds pulled funds and the lending position.
    pub custodian: Address,
    /// Receives all lending yield on normal confirmation.
    pub platform_beneficiary: Address,
    /// Share of each payment paid to the vendor at creation, in basis points.
    pub vendor_upfront_bps: u16,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            custodian: Address::derive(constants::DEFAULT_CUSTODIAN_LABEL),
            platform_beneficiary: Address::derive(constants::DEFAULT_BENEFICIARY_LABEL),
            vendor_upfront_bps: constants::DEFAULT_VENDOR_UPFRONT_BPS,
        }
    }
}

impl LedgerConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject unusable configurations.
    pub fn validate(&self) -> Result<()> {
        if self.custodian.is_zero() {
            return Err(EscrowError::Configuration("custodian is the zero address".into()));
        }
        if self.platform_beneficiary.is_zero() {
            return Err(EscrowError::Configuration(
                "platform beneficiary is the zero address".into(),
            ));
        }
        if self.platform_beneficiary == self.custodian {
            return Err(EscrowError::Configuration(
                "platform beneficiary must differ from custodian".into(),
            ));
        }
        if u128::from(self.vendor_upfront_bps) > constants::BPS_DENOMINATOR {
            return Err(EscrowError::Configuration(format!(
                "vendor_upfront_bps {} exceeds {}",
                self.vendor_upfront_bps,
                constants::BPS_DENOMINATOR
            )));
        }
        Ok(())
    }
}
