//! Share ↔ asset conversion with explicit rounding and no intermediate
//! overflow.
//!
//! `mul_div` computes `⌊a·b/d⌋` exactly for any `u128` inputs by widening
//! the product to 256 bits. The result itself must fit in `u128`.
//!
//! Rounding always favors the market: shares minted on supply round down,
//! assets released on redeem round down, shares burned for an exact asset
//! withdrawal round up.

use yieldescrow_types::{EscrowError, Result, constants::INITIAL_SHARES_PER_ASSET};

const LOW_MASK: u128 = u64::MAX as u128;

/// Full 256-bit product as `(hi, lo)`.
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    let (a1, a0) = (a >> 64, a & LOW_MASK);
    let (b1, b0) = (b >> 64, b & LOW_MASK);
    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;
    let mid = (p00 >> 64) + (p01 & LOW_MASK) + (p10 & LOW_MASK);
    let lo = (p00 & LOW_MASK) | (mid << 64);
    let hi = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (hi, lo)
}

/// `(⌊a·b/d⌋, a·b mod d)`.
fn mul_div_rem(a: u128, b: u128, d: u128) -> Result<(u128, u128)> {
    if d == 0 {
        return Err(EscrowError::overflow("mul_div: division by zero"));
    }
    if let Some(p) = a.checked_mul(b) {
        return Ok((p / d, p % d));
    }
    let (hi, lo) = widening_mul(a, b);
    if hi >= d {
        return Err(EscrowError::overflow("mul_div: quotient exceeds u128"));
    }
    // Binary long division of (hi:lo) by d; remainder stays below d.
    let mut rem = hi;
    let mut quot: u128 = 0;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quot <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quot |= 1;
        }
    }
    Ok((quot, rem))
}

/// `⌊a·b/d⌋`.
pub fn mul_div_down(a: u128, b: u128, d: u128) -> Result<u128> {
    mul_div_rem(a, b, d).map(|(q, _)| q)
}

/// `⌈a·b/d⌉`.
pub fn mul_div_up(a: u128, b: u128, d: u128) -> Result<u128> {
    let (q, r) = mul_div_rem(a, b, d)?;
    if r == 0 {
        Ok(q)
    } else {
        q.checked_add(1)
            .ok_or_else(|| EscrowError::overflow("mul_div_up"))
    }
}

/// Shares minted for supplying `assets`, rounded down.
///
/// With no shares outstanding the first supplier mints at the fixed initial
/// rate and `total_assets` is ignored: residual assets stay in the vault and
/// are not credited to the next supplier. Pools refuse interest into a market
/// with no shares, and redeeming every share returns every asset.
pub fn to_shares_down(assets: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    if total_shares == 0 {
        return assets
            .checked_mul(INITIAL_SHARES_PER_ASSET)
            .ok_or_else(|| EscrowError::overflow("initial share mint"));
    }
    mul_div_down(assets, total_shares, total_assets)
}

/// Shares burned to release exactly `assets`, rounded up.
pub fn to_shares_up(assets: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    if total_shares == 0 {
        return Err(EscrowError::ZeroMarketAmount);
    }
    mul_div_up(assets, total_shares, total_assets)
}

/// Assets redeemed for `shares`, rounded down.
pub fn to_assets_down(shares: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    if total_shares == 0 {
        return Ok(0);
    }
    mul_div_down(shares, total_assets, total_shares)
}
