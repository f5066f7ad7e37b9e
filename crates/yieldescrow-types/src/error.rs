//! Error types for the yieldescrow settlement core.
//!
//! All errors use the `YE_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Escrow / state-machine errors
//! - 2xx: Asset and balance errors
//! - 3xx: Transfer authorization (permit) errors
//! - 4xx: Lending market errors
//! - 5xx: Arithmetic errors
//! - 6xx: Execution errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Amount, Asset, EscrowAction, EscrowId, EscrowStatus, MarketId};

/// Central error enum for all yieldescrow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    // =================================================================
    // Escrow Errors (1xx)
    // =================================================================
    /// No escrow record with this identifier.
    #[error("YE_ERR_100: Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    /// The requested action is not allowed from the record's current status.
    #[error("YE_ERR_101: Invalid state transition: cannot {action} an escrow in {status}")]
    InvalidStateTransition {
        status: EscrowStatus,
        action: EscrowAction,
    },

    /// The caller lacks the right to perform this action.
    #[error("YE_ERR_102: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Amount must be strictly positive.
    #[error("YE_ERR_103: Invalid amount: must be greater than zero")]
    InvalidAmount,

    /// A party address is null or otherwise unusable.
    #[error("YE_ERR_104: Invalid party: {reason}")]
    InvalidParty { reason: String },

    /// The service reference is empty or too long.
    #[error("YE_ERR_105: Invalid service reference: {reason}")]
    InvalidServiceRef { reason: String },

    // =================================================================
    // Asset / Balance Errors (2xx)
    // =================================================================
    /// The asset is not bound to a market or is switched off.
    #[error("YE_ERR_200: Unsupported asset: {0}")]
    UnsupportedAsset(Asset),

    /// Not enough balance to perform a transfer.
    #[error("YE_ERR_201: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    /// A token-level hook rejected the transfer.
    #[error("YE_ERR_202: Transfer rejected: {reason}")]
    TransferRejected { reason: String },

    // =================================================================
    // Authorization Errors (3xx)
    // =================================================================
    /// The permit deadline is not strictly in the future.
    #[error("YE_ERR_300: Transfer authorization expired")]
    AuthorizationExpired,

    /// The permit is bound to a different owner, spender, asset or a smaller amount.
    #[error("YE_ERR_301: Transfer authorization mismatch: {reason}")]
    AuthorizationMismatch { reason: String },

    /// The ed25519 signature over the permit payload didn't verify.
    #[error("YE_ERR_302: Transfer authorization signature invalid")]
    AuthorizationSignatureInvalid,

    /// The permit nonce was already consumed (replay).
    #[error("YE_ERR_303: Transfer authorization nonce already used: {nonce}")]
    AuthorizationNonceReused { nonce: u64 },

    // =================================================================
    // Market Errors (4xx)
    // =================================================================
    /// No lending market with this identifier.
    #[error("YE_ERR_400: Market not found: {0}")]
    MarketNotFound(MarketId),

    /// A market with this descriptor already exists.
    #[error("YE_ERR_401: Market already exists: {0}")]
    MarketAlreadyExists(MarketId),

    /// Supplying would exceed the market's supply cap.
    #[error("YE_ERR_402: Market supply cap exceeded: cap {cap}, requested total {requested}")]
    SupplyCapExceeded { cap: Amount, requested: Amount },

    /// Not enough idle liquidity in the market to release the assets.
    #[error("YE_ERR_403: Insufficient market liquidity: need {needed}, idle {available}")]
    InsufficientLiquidity { needed: Amount, available: Amount },

    /// The holder does not own enough shares.
    #[error("YE_ERR_404: Insufficient shares: need {needed}, have {available}")]
    InsufficientShares { needed: u128, available: u128 },

    /// Exactly one of (assets, shares) must be non-zero on supply/withdraw.
    #[error("YE_ERR_405: Inconsistent market input: {reason}")]
    InconsistentMarketInput { reason: String },

    /// The market returned less than the deposited principal.
    #[error("YE_ERR_406: Market loss: principal {principal}, returned {returned}")]
    MarketLoss { principal: Amount, returned: Amount },

    /// The operation would mint or redeem zero shares/assets.
    #[error("YE_ERR_407: Zero shares or assets for market operation")]
    ZeroMarketAmount,

    // =================================================================
    // Arithmetic Errors (5xx)
    // =================================================================
    /// An intermediate value exceeded the numeric range.
    #[error("YE_ERR_500: Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: String },

    // =================================================================
    // Execution Errors (6xx)
    // =================================================================
    /// An entry point was invoked from inside a step on the same thread.
    #[error("YE_ERR_600: Reentrant call rejected")]
    ReentrantCall,

    /// Supply conservation invariant violated.
    #[error("YE_ERR_601: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("YE_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("YE_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.).
    #[error("YE_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl EscrowError {
    /// Shorthand for [`EscrowError::ArithmeticOverflow`].
    pub fn overflow(context: impl Into<String>) -> Self {
        Self::ArithmeticOverflow {
            context: context.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EscrowError>;

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
