//! Deterministic upfront/deposit split.
//!
//! `vendor = floor(total × bps / 10_000)`, `deposit = total − vendor`.
//! The product is never formed directly: with `total = q·10_000 + r`,
//! `floor(total × bps / 10_000) = q·bps + floor(r·bps / 10_000)`, and both
//! terms fit in `u128` for every `total` when `bps ≤ 10_000`.

use yieldescrow_types::{Amount, EscrowError, Result, constants::BPS_DENOMINATOR};

/// Split `total` into `(vendor_amount, deposit_amount)`.
///
/// # Errors
/// `Configuration` if `bps` exceeds 100%.
pub fn split_payment(total: Amount, bps: u16) -> Result<(Amount, Amount)> {
    let bps = u128::from(bps);
    if bps > BPS_DENOMINATOR {
        return Err(EscrowError::Configuration(format!(
            "vendor upfront bps {bps} exceeds {BPS_DENOMINATOR}"
        )));
    }
    let q = total / BPS_DENOMINATOR;
    let r = total % BPS_DENOMINATOR;
    let vendor = q
        .checked_mul(bps)
        .and_then(|v| v.checked_add(r * bps / BPS_DENOMINATOR))
        .ok_or_else(|| EscrowError::overflow("vendor split"))?;
    Ok((vendor, total - vendor))
}
