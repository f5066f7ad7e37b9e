//! # yieldescrow-ledger
//!
//! **Escrow Ledger**: the settlement core for yield-bearing service escrows.
//!
//! ## Lifecycle
//!
//! 1. `create_escrow`: pull the payment with a signed single-use permit,
//!    pay the vendor its upfront share, supply the rest to the token's
//!    lending market, record the shares
//! 2. `confirm_service`: redeem the shares; principal to the vendor, any
//!    yield to the platform beneficiary
//! 3. `initiate_dispute` / `resolve_dispute`: an arbiter sends the whole
//!    redeemed position to the vendor or back to the payer
//!
//! Each entry point is one atomic, non-reentrant step over a [`Host`]
//! (see `yieldescrow_types::capability`).
//!
//! [`Host`]: yieldescrow_types::Host

pub mod capability;
pub mod id_gen;
pub mod ledger;
pub mod reentrancy;
pub mod split;

pub use capability::{ArbiterCap, OwnerCap};
pub use id_gen::{EscrowIdInput, derive_escrow_id};
pub use ledger::EscrowLedger;
pub use reentrancy::{EntryToken, ReentrancyGuard};
pub use split::split_payment;
