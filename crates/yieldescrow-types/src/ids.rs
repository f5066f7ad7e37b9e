//! Identifiers used throughout yieldescrow.
//!
//! Parties are 32-byte addresses. A party that signs transfer permits uses
//! its raw ed25519 public key as its address; contract-like accounts
//! (custodian, market vaults) use addresses derived by hashing a label.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Type alias for asset identifiers (e.g., "USDC", "DAI").
pub type Asset = String;

/// Token amounts in the asset's smallest unit.
pub type Amount = u128;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 32-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The null address. Never a valid party.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Address of a key-holding party (its ed25519 public key).
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for a contract-like account.
    #[must_use]
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"yieldescrow:address:v1:");
        hasher.update(label.as_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// Random address for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Address {
    pub fn random() -> Self {
        Self(rand::random::<[u8; 32]>())
    }
}

// ---------------------------------------------------------------------------
// EscrowId
// ---------------------------------------------------------------------------

/// Globally unique escrow identifier (SHA-256 of the creation context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EscrowId(pub [u8; 32]);

impl EscrowId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "escrow:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// MarketId
// ---------------------------------------------------------------------------

/// Identifier of a lending market, derived from its [`crate::MarketDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketId(pub [u8; 32]);

impl MarketId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Deterministic address of the account holding this market's liquidity.
    #[must_use]
    pub fn vault_address(&self) -> Address {
        Address::derive(&format!("market-vault:{}", hex::encode(self.0)))
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
