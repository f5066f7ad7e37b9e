//! Owner and arbiter capabilities.
//!
//! Capabilities are plain values handed out by one ledger instance and
//! checked against that instance's id. They cannot be constructed outside
//! this crate and are deliberately not `Clone`.

use uuid::Uuid;
use yieldescrow_types::{EscrowError, Result};

/// Rights to configure token bindings, the beneficiary, and arbiters.
#[derive(Debug, PartialEq, Eq)]
pub struct OwnerCap {
    ledger_id: Uuid,
}

/// Rights to resolve disputes.
#[derive(Debug, PartialEq, Eq)]
pub struct ArbiterCap {
    ledger_id: Uuid,
}

impl OwnerCap {
    pub(crate) fn issue(ledger_id: Uuid) -> Self {
        Self { ledger_id }
    }

    /// The ledger this capability was issued by.
    #[must_use]
    pub fn ledger_id(&self) -> Uuid {
        self.ledger_id
    }

    pub(crate) fn check(&self, ledger_id: Uuid) -> Result<()> {
        check_issuer("owner", self.ledger_id, ledger_id)
    }
}

impl ArbiterCap {
    pub(crate) fn issue(ledger_id: Uuid) -> Self {
        Self { ledger_id }
    }

    #[must_use]
    pub fn ledger_id(&self) -> Uuid {
        self.ledger_id
    }

    pub(crate) fn check(&self, ledger_id: Uuid) -> Result<()> {
        check_issuer("arbiter", self.ledger_id, ledger_id)
    }
}

fn check_issuer(kind: &str, issued_by: Uuid, ledger_id: Uuid) -> Result<()> {
    if issued_by != ledger_id {
        return Err(EscrowError::Unauthorized {
            reason: format!("{kind} capability issued by ledger {issued_by}, not {ledger_id}"),
        });
    }
    Ok(())
}
