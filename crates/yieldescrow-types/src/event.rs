//! Audit-trail events emitted by committed ledger steps.
//!
//! Events are appended only when a step commits; a rolled-back step leaves
//! no event behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, Amount, Asset, EscrowId, MarketId};

/// One entry in the ledger's append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    EscrowCreated {
        id: EscrowId,
        payer: Address,
        vendor: Address,
        token: Asset,
        total_amount: Amount,
        vendor_amount: Amount,
        deposit_amount: Amount,
        market_id: MarketId,
        shares: u128,
        at: DateTime<Utc>,
    },
    ServiceConfirmed {
        id: EscrowId,
        principal_to_vendor: Amount,
        yield_to_platform: Amount,
        at: DateTime<Utc>,
    },
    DisputeInitiated {
        id: EscrowId,
        by: Address,
        at: DateTime<Utc>,
    },
    DisputeResolved {
        id: EscrowId,
        favor_vendor: bool,
        recipient: Address,
        amount: Amount,
        at: DateTime<Utc>,
    },
    TokenMarketSet {
        token: Asset,
        market_id: MarketId,
        at: DateTime<Utc>,
    },
    TokenAllowanceChanged {
        token: Asset,
        allowed: bool,
        at: DateTime<Utc>,
    },
    BeneficiaryChanged {
        beneficiary: Address,
        at: DateTime<Utc>,
    },
    ArbiterGranted {
        at: DateTime<Utc>,
    },
}

impl EscrowEvent {
    /// The escrow this event concerns, if any.
    #[must_use]
    pub fn escrow_id(&self) -> Option<EscrowId> {
        match self {
            Self::EscrowCreated { id, .. }
            | Self::ServiceConfirmed { id, .. }
            | Self::DisputeInitiated { id, .. }
            | Self::DisputeResolved { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Stable event name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EscrowCreated { .. } => "ESCROW_CREATED",
            Self::ServiceConfirmed { .. } => "SERVICE_CONFIRMED",
            Self::DisputeInitiated { .. } => "DISPUTE_INITIATED",
            Self::DisputeResolved { .. } => "DISPUTE_RESOLVED",
            Self::TokenMarketSet { .. } => "TOKEN_MARKET_SET",
            Self::TokenAllowanceChanged { .. } => "TOKEN_ALLOWANCE_CHANGED",
            Self::BeneficiaryChanged { .. } => "BENEFICIARY_CHANGED",
            Self::ArbiterGranted { .. } => "ARBITER_GRANTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_id_extraction() {
        let id = EscrowId([3; 32]);
        let ev = EscrowEvent::DisputeInitiated {
            id,
            by: Address::random(),
            at: Utc::now(),
        };
        assert_eq!(ev.escrow_id(), Some(id));
        assert_eq!(ev.kind(), "DISPUTE_INITIATED");

        let admin = EscrowEvent::ArbiterGranted { at: Utc::now() };
        assert_eq!(admin.escrow_id(), None);
    }

    #[test]
    fn serde_roundtrip() {
        let ev = EscrowEvent::ServiceConfirmed {
            id: EscrowId([9; 32]),
            principal_to_vendor: 800,
            yield_to_platform: 50,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: EscrowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
