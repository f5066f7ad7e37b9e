//! # yieldescrow-types
//!
//! Shared types, errors, configuration and capability traits for the
//! **yieldescrow** settlement core.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`Address`], [`EscrowId`], [`MarketId`], [`Asset`], [`Amount`]
//! - **Escrow model**: [`EscrowRecord`], [`EscrowStatus`], [`EscrowAction`]
//! - **Market model**: [`MarketDescriptor`], [`MarketState`], [`TokenMarketBinding`]
//! - **Authorization model**: [`TransferPermit`], [`PermitSignature`]
//! - **Audit trail**: [`EscrowEvent`]
//! - **Configuration**: [`LedgerConfig`]
//! - **Capabilities**: [`PermitClient`], [`AssetTransfer`], [`LendingMarket`], [`Clock`], [`TransferHook`], [`Host`]
//! - **Errors**: [`EscrowError`] with `YE_ERR_` prefix codes
//! - **Constants**: system-wide defaults

pub mod capability;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod event;
pub mod ids;
pub mod market;
pub mod permit;

pub use capability::*;
pub use config::*;
pub use error::*;
pub use escrow::*;
pub use event::*;
pub use ids::*;
pub use market::*;
pub use permit::*;

// Constants are accessed via `yieldescrow_types::constants::FOO`
// (not re-exported to avoid name collisions).
