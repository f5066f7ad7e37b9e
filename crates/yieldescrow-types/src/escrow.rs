//! # EscrowRecord — the unit of custody for one service payment
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  confirm   ┌───────────┐
//!   │ PENDING ├───────────▶│ CONFIRMED │◀─────┐
//!   └────┬────┘            └───────────┘      │ resolve(favor vendor)
//!        │ dispute                            │
//!        ▼                 ┌───────────┐      │
//!   ┌──────────┐──────────▶│ CANCELLED │      │
//!   │ DISPUTED │ resolve   └───────────┘      │
//!   └────┬─────┘ (favor payer)                │
//!        └────────────────────────────────────┘
//! ```
//!
//! CONFIRMED and CANCELLED are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, Asset, EscrowError, EscrowId, MarketDescriptor, MarketId, Result};

/// Lifecycle status of an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds are split: upfront paid, remainder earning in the market.
    Pending,
    /// Service confirmed (or arbitration favored the vendor).
    Confirmed,
    /// A party raised a dispute; only arbitration can move it on.
    Disputed,
    /// Arbitration favored the payer.
    Cancelled,
}

impl EscrowStatus {
    /// Can a record in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Confirmed | Self::Disputed)
                | (Self::Disputed, Self::Confirmed | Self::Cancelled)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Disputed => write!(f, "DISPUTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A state-changing action requested on an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowAction {
    Confirm,
    Dispute,
    Resolve,
}

impl EscrowAction {
    /// The only status this action may be applied from.
    #[must_use]
    pub fn required_status(&self) -> EscrowStatus {
        match self {
            Self::Confirm | Self::Dispute => EscrowStatus::Pending,
            Self::Resolve => EscrowStatus::Disputed,
        }
    }
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirm => write!(f, "confirm"),
            Self::Dispute => write!(f, "dispute"),
            Self::Resolve => write!(f, "resolve"),
        }
    }
}

/// Custody record for one service payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: EscrowId,
    /// Payer; the only party allowed to confirm.
    pub payer: Address,
    /// Receiving party.
    pub vendor: Address,
    pub token: Asset,
    /// Total pulled from the payer.
    pub total_amount: Amount,
    /// Paid to the vendor at creation.
    pub vendor_amount: Amount,
    /// Supplied to the lending market at creation.
    pub deposit_amount: Amount,
    /// Opaque marketplace reference (order / bid id).
    pub service_ref: String,
    /// Market the deposit went into.
    pub market: MarketDescriptor,
    pub market_id: MarketId,
    /// Market shares received for `deposit_amount`. Only consumed by a withdraw.
    pub shares: u128,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    /// Set on confirmation or arbitration.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    /// Reject `action` unless the record is in the status it requires.
    ///
    /// # Errors
    /// Returns [`EscrowError::InvalidStateTransition`] otherwise.
    pub fn ensure_can(&self, action: EscrowAction) -> Result<()> {
        if self.status == action.required_status() {
            Ok(())
        } else {
            Err(EscrowError::InvalidStateTransition {
                status: self.status,
                action,
            })
        }
    }

    /// Move to `target`, stamping `resolved_at` when the target is terminal.
    ///
    /// # Errors
    /// Returns [`EscrowError::InvalidStateTransition`] for edges outside the
    /// state machine.
    pub fn transition(
        &mut self,
        action: EscrowAction,
        target: EscrowStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_can(action)?;
        if !self.status.can_transition_to(target) {
            return Err(EscrowError::InvalidStateTransition {
                status: self.status,
                action,
            });
        }
        self.status = target;
        if target.is_terminal() {
            self.resolved_at = Some(now);
        }
        Ok(())
    }

    /// Whether `who` is the payer or the vendor.
    #[must_use]
    pub fn is_party(&self, who: &Address) -> bool {
        self.payer == *who || self.vendor == *who
    }

    /// The split invariant that must hold for every record.
    #[must_use]
    pub fn split_is_conserved(&self) -> bool {
        self.vendor_amount.checked_add(self.deposit_amount) == Some(self.total_amount)
    }
}

/// Dummy record for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl EscrowRecord {
    pub fn dummy(total_amount: Amount) -> Self {
        let vendor_amount = total_amount / 5;
        let market = MarketDescriptor::dummy("USDC");
        Self {
            id: EscrowId(rand::random::<[u8; 32]>()),
            payer: Address::random(),
            vendor: Address::random(),
            token: "USDC".to_string(),
            total_amount,
            vendor_amount,
            deposit_amount: total_amount - vendor_amount,
            service_ref: "svc-1".to_string(),
            market_id: market.id(),
            market,
            shares: 0,
            status: EscrowStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
