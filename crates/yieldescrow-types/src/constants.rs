//! System-wide constants for the yieldescrow settlement core.

/// Basis-point denominator (100% = 10_000 bps).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default share of a payment paid to the vendor at creation (20%).
pub const DEFAULT_VENDOR_UPFRONT_BPS: u16 = 2_000;

/// Shares minted per asset unit on the first supply into an empty market.
pub const INITIAL_SHARES_PER_ASSET: u128 = 1_000_000;

/// Maximum length of a service reference string.
pub const MAX_SERVICE_REF_LEN: usize = 256;

/// Domain tag hashed into every escrow identifier.
pub const ESCROW_ID_DOMAIN: &[u8] = b"yieldescrow:escrow_id:v1:";

/// Domain tag hashed into every market identifier.
pub const MARKET_ID_DOMAIN: &[u8] = b"yieldescrow:market_id:v1:";

/// Domain tag prefixed to every permit signing payload.
pub const PERMIT_DOMAIN: &[u8] = b"yieldescrow:permit:v1:";

/// Label used to derive the default custodian address.
pub const DEFAULT_CUSTODIAN_LABEL: &str = "yieldescrow:custodian";

/// Label used to derive the default platform beneficiary address.
pub const DEFAULT_BENEFICIARY_LABEL: &str = "yieldescrow:platform";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
