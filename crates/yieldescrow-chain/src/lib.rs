//! # yieldescrow-chain
//!
//! **Simulated shared ledger** backing the escrow core's capability traits.
//!
//! ## Architecture
//!
//! 1. **TokenBank**: per-(holder, token) balances with per-token transfer hooks
//! 2. **PermitRegistry**: ed25519 permit verification and single-use nonces
//! 3. **LendingPool**: share-based markets with vault accounts, borrow/repay,
//!    interest accrual and bad-debt realization
//! 4. **SupplyConservation**: Σ balances == Σ mints, per token
//! 5. **SimulatedChain**: clock + all of the above, implementing
//!    `Clock`, `AssetTransfer`, `PermitClient` and `LendingMarket`

pub mod chain;
pub mod lending_pool;
pub mod permit_registry;
pub mod shares_math;
pub mod supply_conservation;
pub mod token_bank;

pub use chain::SimulatedChain;
pub use lending_pool::LendingPool;
pub use permit_registry::PermitRegistry;
pub use supply_conservation::SupplyConservation;
pub use token_bank::TokenBank;
