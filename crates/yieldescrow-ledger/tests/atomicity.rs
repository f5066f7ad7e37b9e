//! All-or-nothing steps, re-entrancy, market failure modes and
//! capability isolation.

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use common::{Harness, PAYER_FUNDS, TOKEN};
use parking_lot::Mutex;
use proptest::prelude::*;
use yieldescrow_chain::SimulatedChain;
use yieldescrow_ledger::{EscrowLedger, split_payment};
use yieldescrow_types::*;

/// Rejects every transfer into one account.
struct BlockRecipient(Address);

impl TransferHook for BlockRecipient {
    fn on_transfer(&self, _token: &str, _from: &Address, to: &Address, _amount: Amount) -> Result<()> {
        if *to == self.0 {
            return Err(EscrowError::Unauthorized {
                reason: format!("{to} is frozen"),
            });
        }
        Ok(())
    }
}

/// Calls back into the ledger on every transfer and records what happened.
struct CallbackHook {
    ledger: Weak<EscrowLedger<SimulatedChain>>,
    target: EscrowId,
    caller: Address,
    seen: Mutex<Vec<EscrowError>>,
}

impl TransferHook for CallbackHook {
    fn on_transfer(&self, _token: &str, _from: &Address, _to: &Address, _amount: Amount) -> Result<()> {
        let Some(ledger) = self.ledger.upgrade() else {
            return Ok(());
        };
        let mut seen = self.seen.lock();
        if let Err(err) = ledger.confirm_service(&self.target, &self.caller) {
            seen.push(err);
        }
        if let Err(err) = ledger.get_escrow(&self.target) {
            seen.push(err);
        }
        Ok(())
    }
}

/// Panics on any transfer into one account.
struct PanicOnRecipient(Address);

impl TransferHook for PanicOnRecipient {
    fn on_transfer(&self, _token: &str, _from: &Address, to: &Address, _amount: Amount) -> Result<()> {
        assert_ne!(*to, self.0, "token contract aborted");
        Ok(())
    }
}

/// On the first transfer, confirms an escrow from a separate thread.
struct ConfirmFromOtherThread {
    ledger: Weak<EscrowLedger<SimulatedChain>>,
    target: EscrowId,
    caller: Address,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl TransferHook for ConfirmFromOtherThread {
    fn on_transfer(&self, _token: &str, _from: &Address, _to: &Address, _amount: Amount) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_none() {
            if let Some(ledger) = self.ledger.upgrade() {
                let (target, caller) = (self.target, self.caller);
                *handle = Some(thread::spawn(move || ledger.confirm_service(&target, &caller)));
            }
        }
        Ok(())
    }
}

fn install_hook(h: &Harness, hook: Arc<dyn TransferHook>) {
    h.ledger
        .with_host_mut(|chain| {
            chain.set_transfer_hook(TOKEN, hook);
            Ok(())
        })
        .unwrap();
}

#[test]
fn supply_cap_breach_rolls_back_vendor_payout() {
    let h = Harness::with_supply_cap(Some(500));
    let (permit, sig) = h.permit_for(TOKEN, 1_000);
    let err = h.create_with(&permit, &sig, 1_000).unwrap_err();

    assert!(matches!(err, EscrowError::SupplyCapExceeded { cap: 500, .. }));
    assert_eq!(h.balance(&h.vendor), 0, "vendor must not be paid when the deposit fails");
    assert_eq!(h.balance(&h.payer), PAYER_FUNDS);
    assert_eq!(h.balance(&h.custodian), 0);
    assert!(!h.nonce_used(permit.nonce));
    assert!(h.ledger.escrows_by_party(&h.payer).unwrap().is_empty());

    // Under the cap, the same permit still works.
    h.create_with(&permit, &sig, 600).unwrap();
    h.assert_conserved();
}

#[test]
fn hook_rejection_rolls_back_create() {
    let h = Harness::new();
    install_hook(&h, Arc::new(BlockRecipient(h.vendor)));
    let (permit, sig) = h.permit_for(TOKEN, 1_000);

    let err = h.create_with(&permit, &sig, 1_000).unwrap_err();
    assert!(matches!(err, EscrowError::TransferRejected { .. }));
    assert_eq!(h.balance(&h.payer), PAYER_FUNDS);
    assert!(!h.nonce_used(permit.nonce));
    assert_eq!(h.ledger.custodian_position(&h.market_id).unwrap(), 0);
    h.assert_conserved();
}

#[test]
fn hook_rejection_rolls_back_confirm() {
    let h = Harness::new();
    let id = h.create(1_000).unwrap();
    h.accrue(50);
    install_hook(&h, Arc::new(BlockRecipient(h.beneficiary)));

    let err = h.ledger.confirm_service(&id, &h.payer).unwrap_err();
    assert!(matches!(err, EscrowError::TransferRejected { .. }));
    let rec = h.ledger.get_escrow(&id).unwrap();
    assert_eq!(rec.status, EscrowStatus::Pending);
    assert_eq!(h.balance(&h.vendor), 200, "principal transfer was undone");
    assert_eq!(h.ledger.custodian_position(&h.market_id).unwrap(), rec.shares);
    h.assert_conserved();
}

#[test]
fn reentrant_calls_from_hook_rejected() {
    let h = Harness::new();
    let id = h.create(1_000).unwrap();
    let hook = Arc::new(CallbackHook {
        ledger: Arc::downgrade(&h.ledger),
        target: id,
        caller: h.payer,
        seen: Mutex::new(Vec::new()),
    });
    install_hook(&h, hook.clone());

    // A second escrow triggers the hook on every token movement.
    let second = h.create(500).unwrap();

    let seen = hook.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|e| *e == EscrowError::ReentrantCall));
    assert_eq!(h.ledger.get_escrow(&id).unwrap().status, EscrowStatus::Pending);
    assert_eq!(h.ledger.get_escrow(&second).unwrap().status, EscrowStatus::Pending);

    // The guard is released once the outer step returns.
    h.ledger
        .with_host_mut(|chain| {
            chain.clear_transfer_hook(TOKEN);
            Ok(())
        })
        .unwrap();
    h.ledger.confirm_service(&id, &h.payer).unwrap();
    h.assert_conserved();
}

#[test]
fn panicking_hook_rolls_back_create() {
    let h = Harness::new();
    install_hook(&h, Arc::new(PanicOnRecipient(h.vendor)));
    let (permit, sig) = h.permit_for(TOKEN, 1_000);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| h.create_with(&permit, &sig, 1_000)));
    assert!(outcome.is_err());

    assert_eq!(h.balance(&h.payer), PAYER_FUNDS);
    assert_eq!(h.balance(&h.vendor), 0);
    assert_eq!(h.balance(&h.custodian), 0);
    assert!(!h.nonce_used(permit.nonce));
    assert!(h.ledger.escrows_by_party(&h.payer).unwrap().is_empty());
    assert_eq!(h.ledger.custodian_position(&h.market_id).unwrap(), 0);
    h.assert_conserved();

    // The ledger keeps serving once the hook is gone.
    h.ledger
        .with_host_mut(|chain| {
            chain.clear_transfer_hook(TOKEN);
            Ok(())
        })
        .unwrap();
    h.create_with(&permit, &sig, 1_000).unwrap();
    h.assert_conserved();
}

#[test]
fn panicking_hook_rolls_back_confirm() {
    let h = Harness::new();
    let id = h.create(1_000).unwrap();
    h.accrue(50);
    install_hook(&h, Arc::new(PanicOnRecipient(h.beneficiary)));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| h.ledger.confirm_service(&id, &h.payer)));
    assert!(outcome.is_err());

    let rec = h.ledger.get_escrow(&id).unwrap();
    assert_eq!(rec.status, EscrowStatus::Pending);
    assert_eq!(h.balance(&h.vendor), 200);
    assert_eq!(h.ledger.pending_yield(&id).unwrap(), 50);
    assert_eq!(h.ledger.custodian_position(&h.market_id).unwrap(), rec.shares);
    h.assert_conserved();
}

#[test]
fn call_from_another_thread_waits_for_running_step() {
    let h = Harness::new();
    let first = h.create(1_000).unwrap();
    let hook = Arc::new(ConfirmFromOtherThread {
        ledger: Arc::downgrade(&h.ledger),
        target: first,
        caller: h.payer,
        handle: Mutex::new(None),
    });
    install_hook(&h, hook.clone());

    let second = h.create(500).unwrap();
    let handle = hook.handle.lock().take().expect("hook ran");
    assert_eq!(handle.join().unwrap(), Ok(()));

    assert_eq!(h.ledger.get_escrow(&first).unwrap().status, EscrowStatus::Confirmed);
    assert_eq!(h.ledger.get_escrow(&second).unwrap().status, EscrowStatus::Pending);
    h.assert_conserved();
}

#[test]
fn concurrent_creates_all_commit() {
    let h = Harness::new();
    let permits: Vec<_> = (0..8).map(|_| h.permit_for(TOKEN, 1_000)).collect();
    let (payer, vendor) = (h.payer, h.vendor);

    let ids: Vec<EscrowId> = thread::scope(|s| {
        let handles: Vec<_> = permits
            .iter()
            .map(|(permit, sig)| {
                let ledger = Arc::clone(&h.ledger);
                s.spawn(move || {
                    ledger.create_escrow(payer, vendor, TOKEN, 1_000, "bid:parallel", permit, sig)
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap().unwrap()).collect()
    });

    assert_eq!(ids.len(), 8);
    assert_eq!(h.ledger.escrows_by_party(&payer).unwrap().len(), 8);
    assert_eq!(h.balance(&payer), PAYER_FUNDS - 8_000);
    assert_eq!(h.balance(&vendor), 1_600);
    h.assert_conserved();
}

#[test]
fn market_loss_fails_confirm_and_keeps_escrow_pending() {
    let h = Harness::new();
    let id = h.create(1_000).unwrap();
    let borrower = Address::derive("borrower:defaulting");
    let market = h.market_id;
    h.ledger
        .with_host_mut(|chain| {
            chain.borrow(&market, 100, &borrower)?;
            chain.realize_bad_debt(&market, &borrower, 100)
        })
        .unwrap();

    let err = h.ledger.confirm_service(&id, &h.payer).unwrap_err();
    assert_eq!(
        err,
        EscrowError::MarketLoss {
            principal: 800,
            returned: 700,
        }
    );
    assert_eq!(h.ledger.get_escrow(&id).unwrap().status, EscrowStatus::Pending);
    assert_eq!(h.balance(&h.vendor), 200);

    // Arbitration has no principal floor and can still settle it.
    h.ledger.initiate_dispute(&id, &h.payer).unwrap();
    assert_eq!(h.ledger.resolve_dispute(&id, false, &h.arbiter).unwrap(), 700);
    h.assert_conserved();
}

#[test]
fn illiquid_market_blocks_confirm_until_repaid() {
    let h = Harness::new();
    let id = h.create(1_000).unwrap();
    let borrower = Address::derive("borrower:large");
    let market = h.market_id;
    h.ledger
        .with_host_mut(|chain| chain.borrow(&market, 600, &borrower))
        .unwrap();

    let err = h.ledger.confirm_service(&id, &h.payer).unwrap_err();
    assert!(matches!(err, EscrowError::InsufficientLiquidity { .. }));
    assert_eq!(h.ledger.get_escrow(&id).unwrap().status, EscrowStatus::Pending);

    h.ledger
        .with_host_mut(|chain| chain.repay(&market, 600, &borrower))
        .unwrap();
    h.ledger.confirm_service(&id, &h.payer).unwrap();
    assert_eq!(h.balance(&h.vendor), 1_000);
    h.assert_conserved();
}

#[test]
fn failed_host_action_is_rolled_back() {
    let h = Harness::new();
    let somebody = Address::derive("somebody");
    let err = h
        .ledger
        .with_host_mut(|chain| {
            chain.mint(somebody, TOKEN, 10)?;
            chain.transfer(TOKEN, &somebody, &h.vendor, 11)
        })
        .unwrap_err();
    assert!(matches!(err, EscrowError::InsufficientBalance { .. }));
    assert_eq!(h.balance(&somebody), 0);
    h.assert_conserved();
}

#[test]
fn foreign_capabilities_rejected() {
    let h = Harness::new();
    let other = Harness::new();
    let id = h.create(1_000).unwrap();
    h.ledger.initiate_dispute(&id, &h.payer).unwrap();

    assert!(matches!(
        h.ledger.resolve_dispute(&id, true, &other.arbiter),
        Err(EscrowError::Unauthorized { .. })
    ));
    assert!(matches!(
        h.ledger.set_token_allowed(&other.owner, TOKEN, false),
        Err(EscrowError::Unauthorized { .. })
    ));
    assert!(matches!(
        h.ledger.grant_arbiter(&other.owner),
        Err(EscrowError::Unauthorized { .. })
    ));
    assert_eq!(h.ledger.get_escrow(&id).unwrap().status, EscrowStatus::Disputed);
    assert!(h.ledger.token_binding(TOKEN).unwrap().is_some_and(|b| b.allowed));
}

#[test]
fn rolled_back_steps_emit_no_events() {
    let h = Harness::with_supply_cap(Some(100));
    let before = h.ledger.events().unwrap();
    assert!(h.create(1_000).is_err());
    assert_eq!(h.ledger.events().unwrap(), before);
}

#[test]
fn split_conserved_up_to_large_bound() {
    for total in 1..=100_000u128 {
        let (vendor, deposit) = split_payment(total, 2_000).unwrap();
        assert_eq!(vendor + deposit, total);
    }
}

proptest! {
    #[test]
    fn split_conserved_for_any_total(total in any::<u128>(), bps in 0u16..=10_000) {
        let (vendor, deposit) = split_payment(total, bps).unwrap();
        prop_assert_eq!(vendor.checked_add(deposit), Some(total));
        prop_assert!(vendor <= total);
    }

    #[test]
    fn split_matches_floor_where_product_fits(total in 0u128..=u128::MAX / 10_000, bps in 0u16..=10_000) {
        let (vendor, _) = split_payment(total, bps).unwrap();
        prop_assert_eq!(vendor, total * u128::from(bps) / 10_000);
    }
}
