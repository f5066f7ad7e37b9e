//! # EscrowLedger — custody, split, and settlement of service payments
//!
//! Every public mutating entry point is one atomic step:
//!
//! 1. Reject the call with `ReentrantCall` if the calling thread is already
//!    inside a step (e.g. a token hook calling back in)
//! 2. Take the fair state lock; steps from other threads wait in arrival
//!    order
//! 3. Take a checkpoint (host + records + bindings + counter + events) and
//!    run the step against the live state
//! 4. On an error or a panic, restore the checkpoint, so the host's
//!    balances, nonces and market positions are exactly as before the call
//!
//! Validation and authorization checks run before the first host call, so
//! those failures never even touch the host.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use parking_lot::FairMutex;
use uuid::Uuid;
use yieldescrow_types::{
    Address, Amount, Asset, EscrowAction, EscrowError, EscrowEvent, EscrowId, EscrowRecord,
    EscrowStatus, Host, LedgerConfig, MarketDescriptor, MarketId, PermitSignature, Result,
    TokenMarketBinding, TransferPermit, constants,
};

use crate::capability::{ArbiterCap, OwnerCap};
use crate::id_gen::{EscrowIdInput, derive_escrow_id};
use crate::reentrancy::ReentrancyGuard;
use crate::split::split_payment;

/// Everything a step may mutate. Cloned wholesale as the rollback checkpoint.
#[derive(Debug, Clone)]
struct LedgerState<H> {
    host: H,
    config: LedgerConfig,
    escrows: HashMap<EscrowId, EscrowRecord>,
    bindings: HashMap<Asset, TokenMarketBinding>,
    counter: u64,
    events: Vec<EscrowEvent>,
}

/// The escrow settlement core, running on host `H`.
pub struct EscrowLedger<H: Host> {
    id: Uuid,
    guard: ReentrancyGuard,
    state: FairMutex<LedgerState<H>>,
}

impl<H: Host> EscrowLedger<H> {
    /// Create a ledger on `host`. Returns the ledger and its only owner capability.
    ///
    /// # Errors
    /// `Configuration` if `config` fails validation.
    pub fn new(host: H, config: LedgerConfig) -> Result<(Self, OwnerCap)> {
        config.validate()?;
        let id = Uuid::now_v7();
        tracing::info!(
            ledger = %id,
            custodian = %config.custodian,
            beneficiary = %config.platform_beneficiary,
            vendor_upfront_bps = config.vendor_upfront_bps,
            "Escrow ledger created"
        );
        let ledger = Self {
            id,
            guard: ReentrancyGuard::new(),
            state: FairMutex::new(LedgerState {
                host,
                config,
                escrows: HashMap::new(),
                bindings: HashMap::new(),
                counter: 0,
                events: Vec::new(),
            }),
        };
        Ok((ledger, OwnerCap::issue(id)))
    }

    #[must_use]
    pub fn ledger_id(&self) -> Uuid {
        self.id
    }

    // ── Step plumbing ───────────────────────────────────────────────

    /// Run `f` as one serialized, all-or-nothing step.
    ///
    /// Steps from other threads wait on the fair lock in arrival order. A
    /// call from inside a running step on the same thread is rejected. The
    /// checkpoint is restored whether `f` returns an error or panics; a
    /// panic is then resumed.
    fn step<T>(&self, op: &'static str, f: impl FnOnce(&mut LedgerState<H>) -> Result<T>) -> Result<T> {
        self.guard.ensure_not_reentrant()?;
        let mut state = self.state.lock();
        let _entry = self.guard.enter()?;
        let checkpoint = state.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut state))) {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(err)) => {
                *state = checkpoint;
                tracing::warn!(ledger = %self.id, op, error = %err, "Step rolled back");
                Err(err)
            }
            Err(payload) => {
                *state = checkpoint;
                tracing::error!(ledger = %self.id, op, "Step panicked, rolled back");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Read committed state. Rejected from inside a running step.
    fn read<T>(&self, f: impl FnOnce(&LedgerState<H>) -> Result<T>) -> Result<T> {
        self.guard.ensure_not_reentrant()?;
        let state = self.state.lock();
        f(&state)
    }

    // ── Escrow lifecycle ────────────────────────────────────────────

    /// Pull `total_amount` from `payer` with a signed permit, pay the vendor
    /// its upfront share, and supply the remainder to the token's market.
    ///
    /// # Errors
    /// In check order:
    /// - `InvalidParty` for a zero payer/vendor, payer == vendor, or a
    ///   vendor equal to the custodian
    /// - `InvalidAmount` if `total_amount == 0`
    /// - `InvalidServiceRef` if the reference is empty or too long
    /// - `UnsupportedAsset` if `token` is unbound or disallowed
    /// - `AuthorizationExpired` if the permit deadline is not in the future
    /// - `AuthorizationMismatch` if the permit's owner, token, amount or
    ///   spender doesn't fit the call
    /// - then any permit, transfer or market error from the host; the whole
    ///   step is rolled back
    #[allow(clippy::too_many_arguments)]
    pub fn create_escrow(
        &self,
        payer: Address,
        vendor: Address,
        token: &str,
        total_amount: Amount,
        service_ref: &str,
        permit: &TransferPermit,
        signature: &PermitSignature,
    ) -> Result<EscrowId> {
        self.step("create_escrow", |st| {
            let custodian = st.config.custodian;
            validate_parties(&payer, &vendor, &custodian)?;
            if total_amount == 0 {
                return Err(EscrowError::InvalidAmount);
            }
            validate_service_ref(service_ref)?;
            let market = match st.bindings.get(token) {
                Some(b) if b.allowed => b.market.clone(),
                _ => return Err(EscrowError::UnsupportedAsset(token.to_string())),
            };
            let now = st.host.now();
            validate_permit(permit, &payer, token, total_amount, &custodian, now)?;

            // 1. Pull into custody (consumes the nonce).
            st.host
                .pull_with_permit(permit, signature, &custodian, total_amount)?;

            // 2. Split.
            let (vendor_amount, deposit_amount) =
                split_payment(total_amount, st.config.vendor_upfront_bps)?;

            // 3. Upfront payout.
            if vendor_amount > 0 {
                st.host.transfer(token, &custodian, &vendor, vendor_amount)?;
            }

            // 4. Deposit the remainder on behalf of the custodian.
            let shares = if deposit_amount > 0 {
                st.host.supply(&market, deposit_amount, &custodian)?
            } else {
                0
            };

            // 5. Persist.
            let id = derive_escrow_id(
                &EscrowIdInput {
                    payer: &payer,
                    vendor: &vendor,
                    token,
                    amount: total_amount,
                    service_ref,
                    created_at: now,
                },
                st.counter,
            );
            if st.escrows.contains_key(&id) {
                return Err(EscrowError::Internal(format!("escrow id collision: {id}")));
            }
            st.counter = st
                .counter
                .checked_add(1)
                .ok_or_else(|| EscrowError::overflow("escrow counter"))?;

            let market_id = market.id();
            let record = EscrowRecord {
                id,
                payer,
                vendor,
                token: token.to_string(),
                total_amount,
                vendor_amount,
                deposit_amount,
                service_ref: service_ref.to_string(),
                market,
                market_id,
                shares,
                status: EscrowStatus::Pending,
                created_at: now,
                resolved_at: None,
            };
            debug_assert!(record.split_is_conserved());
            st.escrows.insert(id, record);
            st.events.push(EscrowEvent::EscrowCreated {
                id,
                payer,
                vendor,
                token: token.to_string(),
                total_amount,
                vendor_amount,
                deposit_amount,
                market_id,
                shares,
                at: now,
            });

            tracing::info!(
                ledger = %self.id,
                escrow = %id,
                %payer,
                %vendor,
                token,
                total_amount,
                vendor_amount,
                deposit_amount,
                shares,
                "Escrow created"
            );
            Ok(id)
        })
    }

    /// Payer confirms delivery: principal to the vendor, yield to the platform.
    ///
    /// # Errors
    /// - `EscrowNotFound`, then `InvalidStateTransition` unless Pending,
    ///   then `Unauthorized` unless `caller` is the payer
    /// - `MarketLoss` if the position redeems for less than the deposit;
    ///   the step is rolled back and the escrow stays Pending
    pub fn confirm_service(&self, escrow_id: &EscrowId, caller: &Address) -> Result<()> {
        self.step("confirm_service", |st| {
            let record = lookup(&st.escrows, escrow_id)?;
            record.ensure_can(EscrowAction::Confirm)?;
            if record.payer != *caller {
                return Err(EscrowError::Unauthorized {
                    reason: format!("only the payer may confirm, caller {caller}"),
                });
            }
            let custodian = st.config.custodian;
            let beneficiary = st.config.platform_beneficiary;
            let principal = record.deposit_amount;

            let withdrawn = redeem_position(&mut st.host, &record, &custodian, &custodian)?;
            if withdrawn < principal {
                return Err(EscrowError::MarketLoss {
                    principal,
                    returned: withdrawn,
                });
            }
            let yield_amount = withdrawn - principal;

            if principal > 0 {
                st.host
                    .transfer(&record.token, &custodian, &record.vendor, principal)?;
            }
            if yield_amount > 0 {
                st.host
                    .transfer(&record.token, &custodian, &beneficiary, yield_amount)?;
            }

            let now = st.host.now();
            apply_transition(st, escrow_id, EscrowAction::Confirm, EscrowStatus::Confirmed, now)?;
            st.events.push(EscrowEvent::ServiceConfirmed {
                id: *escrow_id,
                principal_to_vendor: principal,
                yield_to_platform: yield_amount,
                at: now,
            });

            tracing::info!(
                ledger = %self.id,
                escrow = %escrow_id,
                principal,
                yield_amount,
                %beneficiary,
                "Service confirmed"
            );
            Ok(())
        })
    }

    /// Payer or vendor moves a Pending escrow into dispute. No funds move.
    ///
    /// # Errors
    /// `EscrowNotFound`, `InvalidStateTransition`, then `Unauthorized` if
    /// `caller` is neither party.
    pub fn initiate_dispute(&self, escrow_id: &EscrowId, caller: &Address) -> Result<()> {
        self.step("initiate_dispute", |st| {
            let record = lookup(&st.escrows, escrow_id)?;
            record.ensure_can(EscrowAction::Dispute)?;
            if !record.is_party(caller) {
                return Err(EscrowError::Unauthorized {
                    reason: format!("{caller} is not a party to {escrow_id}"),
                });
            }
            let now = st.host.now();
            apply_transition(st, escrow_id, EscrowAction::Dispute, EscrowStatus::Disputed, now)?;
            st.events.push(EscrowEvent::DisputeInitiated {
                id: *escrow_id,
                by: *caller,
                at: now,
            });
            tracing::info!(ledger = %self.id, escrow = %escrow_id, by = %caller, "Dispute initiated");
            Ok(())
        })
    }

    /// Arbiter settles a dispute. The full position (principal and yield,
    /// unseparated) goes to the vendor or back to the payer. The vendor's
    /// upfront payout is never reclaimed.
    ///
    /// # Errors
    /// `Unauthorized` for a foreign capability, `EscrowNotFound`,
    /// `InvalidStateTransition` unless Disputed, then any market or
    /// transfer error (rolled back).
    pub fn resolve_dispute(&self, escrow_id: &EscrowId, favor_vendor: bool, arbiter: &ArbiterCap) -> Result<Amount> {
        self.step("resolve_dispute", |st| {
            arbiter.check(self.id)?;
            let record = lookup(&st.escrows, escrow_id)?;
            record.ensure_can(EscrowAction::Resolve)?;

            let (recipient, target) = if favor_vendor {
                (record.vendor, EscrowStatus::Confirmed)
            } else {
                (record.payer, EscrowStatus::Cancelled)
            };
            let custodian = st.config.custodian;
            let amount = redeem_position(&mut st.host, &record, &custodian, &recipient)?;

            let now = st.host.now();
            apply_transition(st, escrow_id, EscrowAction::Resolve, target, now)?;
            st.events.push(EscrowEvent::DisputeResolved {
                id: *escrow_id,
                favor_vendor,
                recipient,
                amount,
                at: now,
            });
            tracing::info!(
                ledger = %self.id,
                escrow = %escrow_id,
                favor_vendor,
                %recipient,
                amount,
                status = %target,
                "Dispute resolved"
            );
            Ok(amount)
        })
    }

    // ── Administration ──────────────────────────────────────────────

    /// Bind `token` to `market` and allow it.
    ///
    /// # Errors
    /// - `Unauthorized` for a foreign capability
    /// - `InconsistentMarketInput` if the market lends a different token or
    ///   its LLTV is outside `[0, 1)`
    /// - `MarketNotFound` if the host has no such market
    pub fn set_token_market(&self, owner: &OwnerCap, token: &str, market: MarketDescriptor) -> Result<MarketId> {
        self.step("set_token_market", |st| {
            owner.check(self.id)?;
            if market.loan_token != token {
                return Err(EscrowError::InconsistentMarketInput {
                    reason: format!("market lends {}, not {token}", market.loan_token),
                });
            }
            if !market.lltv_is_valid() {
                return Err(EscrowError::InconsistentMarketInput {
                    reason: format!("lltv {} outside [0, 1)", market.lltv),
                });
            }
            let market_id = market.id();
            st.host.market_state(&market_id)?;

            let now = st.host.now();
            st.bindings.insert(
                token.to_string(),
                TokenMarketBinding {
                    token: token.to_string(),
                    market,
                    allowed: true,
                    updated_at: now,
                },
            );
            st.events.push(EscrowEvent::TokenMarketSet {
                token: token.to_string(),
                market_id,
                at: now,
            });
            tracing::info!(ledger = %self.id, token, market = %market_id, "Token market set");
            Ok(market_id)
        })
    }

    /// Toggle whether new escrows may use `token`. Existing escrows are unaffected.
    ///
    /// # Errors
    /// `Unauthorized` for a foreign capability, `UnsupportedAsset` if the
    /// token was never bound.
    pub fn set_token_allowed(&self, owner: &OwnerCap, token: &str, allowed: bool) -> Result<()> {
        self.step("set_token_allowed", |st| {
            owner.check(self.id)?;
            let now = st.host.now();
            let binding = st
                .bindings
                .get_mut(token)
                .ok_or_else(|| EscrowError::UnsupportedAsset(token.to_string()))?;
            binding.allowed = allowed;
            binding.updated_at = now;
            st.events.push(EscrowEvent::TokenAllowanceChanged {
                token: token.to_string(),
                allowed,
                at: now,
            });
            tracing::info!(ledger = %self.id, token, allowed, "Token allowance changed");
            Ok(())
        })
    }

    /// Redirect future yield to `beneficiary`.
    ///
    /// # Errors
    /// `Unauthorized`, or `InvalidParty` for a zero address or the custodian.
    pub fn set_platform_beneficiary(&self, owner: &OwnerCap, beneficiary: Address) -> Result<()> {
        self.step("set_platform_beneficiary", |st| {
            owner.check(self.id)?;
            if beneficiary.is_zero() || beneficiary == st.config.custodian {
                return Err(EscrowError::InvalidParty {
                    reason: format!("beneficiary {beneficiary} must be non-zero and not the custodian"),
                });
            }
            st.config.platform_beneficiary = beneficiary;
            let now = st.host.now();
            st.events
                .push(EscrowEvent::BeneficiaryChanged { beneficiary, at: now });
            tracing::info!(ledger = %self.id, %beneficiary, "Platform beneficiary changed");
            Ok(())
        })
    }

    /// Issue a new arbiter capability for this ledger.
    pub fn grant_arbiter(&self, owner: &OwnerCap) -> Result<ArbiterCap> {
        self.step("grant_arbiter", |st| {
            owner.check(self.id)?;
            let now = st.host.now();
            st.events.push(EscrowEvent::ArbiterGranted { at: now });
            tracing::info!(ledger = %self.id, "Arbiter granted");
            Ok(ArbiterCap::issue(self.id))
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get_escrow(&self, escrow_id: &EscrowId) -> Result<EscrowRecord> {
        self.read(|st| lookup(&st.escrows, escrow_id))
    }

    pub fn token_binding(&self, token: &str) -> Result<Option<TokenMarketBinding>> {
        self.read(|st| Ok(st.bindings.get(token).cloned()))
    }

    /// Escrows where `party` is payer or vendor, oldest first.
    pub fn escrows_by_party(&self, party: &Address) -> Result<Vec<EscrowRecord>> {
        self.read(|st| {
            let mut out: Vec<EscrowRecord> = st
                .escrows
                .values()
                .filter(|r| r.is_party(party))
                .cloned()
                .collect();
            out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(out)
        })
    }

    /// Yield the escrow's shares would realize right now. Zero once settled.
    pub fn pending_yield(&self, escrow_id: &EscrowId) -> Result<Amount> {
        self.read(|st| {
            let record = lookup(&st.escrows, escrow_id)?;
            if record.status.is_terminal() || record.shares == 0 {
                return Ok(0);
            }
            let value = st.host.preview_redeem(&record.market_id, record.shares)?;
            Ok(value.saturating_sub(record.deposit_amount))
        })
    }

    /// Committed events, oldest first.
    pub fn events(&self) -> Result<Vec<EscrowEvent>> {
        self.read(|st| Ok(st.events.clone()))
    }

    pub fn config(&self) -> Result<LedgerConfig> {
        self.read(|st| Ok(st.config.clone()))
    }

    /// Shares the custodian holds in `market`.
    pub fn custodian_position(&self, market: &MarketId) -> Result<u128> {
        self.read(|st| Ok(st.host.position(market, &st.config.custodian)))
    }

    /// Check that, per market, the shares recorded on open escrows are
    /// covered by the custodian's actual position.
    ///
    /// # Errors
    /// `SupplyInvariantViolation` naming the first uncovered market.
    pub fn verify_position_coverage(&self) -> Result<()> {
        self.read(|st| {
            let mut claimed: HashMap<MarketId, u128> = HashMap::new();
            for record in st.escrows.values().filter(|r| !r.status.is_terminal()) {
                let total = claimed.entry(record.market_id).or_default();
                *total = total
                    .checked_add(record.shares)
                    .ok_or_else(|| EscrowError::overflow("claimed shares"))?;
            }
            for (market, shares) in claimed {
                let held = st.host.position(&market, &st.config.custodian);
                if held < shares {
                    return Err(EscrowError::SupplyInvariantViolation {
                        reason: format!(
                            "market {market}: escrows claim {shares} shares, custodian holds {held}"
                        ),
                    });
                }
            }
            Ok(())
        })
    }

    /// Read-only access to the host.
    pub fn with_host<T>(&self, f: impl FnOnce(&H) -> T) -> Result<T> {
        self.read(|st| Ok(f(&st.host)))
    }

    /// Act on the host as an outside participant (other suppliers,
    /// borrowers, the clock). Runs as a guarded, rolled-back-on-error step.
    pub fn with_host_mut<T>(&self, f: impl FnOnce(&mut H) -> Result<T>) -> Result<T> {
        self.step("with_host_mut", |st| f(&mut st.host))
    }
}

impl<H: Host> std::fmt::Debug for EscrowLedger<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowLedger")
            .field("id", &self.id)
            .field("in_step", &self.guard.is_entered())
            .finish_non_exhaustive()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn lookup(escrows: &HashMap<EscrowId, EscrowRecord>, id: &EscrowId) -> Result<EscrowRecord> {
    escrows
        .get(id)
        .cloned()
        .ok_or(EscrowError::EscrowNotFound(*id))
}

fn apply_transition<H>(
    st: &mut LedgerState<H>,
    id: &EscrowId,
    action: EscrowAction,
    target: EscrowStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    st.escrows
        .get_mut(id)
        .ok_or(EscrowError::EscrowNotFound(*id))?
        .transition(action, target, now)
}

/// Withdraw the record's whole share position to `receiver`.
fn redeem_position<H: Host>(
    host: &mut H,
    record: &EscrowRecord,
    custodian: &Address,
    receiver: &Address,
) -> Result<Amount> {
    if record.shares == 0 {
        return Ok(0);
    }
    host.withdraw(&record.market, 0, record.shares, custodian, receiver)
}

fn validate_parties(payer: &Address, vendor: &Address, custodian: &Address) -> Result<()> {
    let reason = if payer.is_zero() {
        "payer is the zero address"
    } else if vendor.is_zero() {
        "vendor is the zero address"
    } else if vendor == custodian {
        "vendor is the custodian"
    } else if payer == vendor {
        "payer and vendor are the same account"
    } else {
        return Ok(());
    };
    Err(EscrowError::InvalidParty {
        reason: reason.into(),
    })
}

fn validate_service_ref(service_ref: &str) -> Result<()> {
    if service_ref.is_empty() {
        return Err(EscrowError::InvalidServiceRef {
            reason: "empty".into(),
        });
    }
    if service_ref.len() > constants::MAX_SERVICE_REF_LEN {
        return Err(EscrowError::InvalidServiceRef {
            reason: format!(
                "{} bytes exceeds {}",
                service_ref.len(),
                constants::MAX_SERVICE_REF_LEN
            ),
        });
    }
    Ok(())
}

fn validate_permit(
    permit: &TransferPermit,
    payer: &Address,
    token: &str,
    total_amount: Amount,
    custodian: &Address,
    now: DateTime<Utc>,
) -> Result<()> {
    if !permit.is_live_at(now) {
        return Err(EscrowError::AuthorizationExpired);
    }
    let reason = if permit.owner != *payer {
        format!("permit owner {} is not payer {payer}", permit.owner)
    } else if permit.token != token {
        format!("permit token {} is not {token}", permit.token)
    } else if permit.amount < total_amount {
        format!("permit covers {}, need {total_amount}", permit.amount)
    } else if permit.spender != *custodian {
        format!("permit spender {} is not the custodian", permit.spender)
    } else {
        return Ok(());
    };
    Err(EscrowError::AuthorizationMismatch { reason })
}
