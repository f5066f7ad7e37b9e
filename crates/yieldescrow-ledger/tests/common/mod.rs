//! Shared harness for the ledger integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::Arc;

use chrono::Duration;
use ed25519_dalek::SigningKey;
use yieldescrow_chain::SimulatedChain;
use yieldescrow_ledger::{ArbiterCap, EscrowLedger, OwnerCap};
use yieldescrow_types::*;

pub const TOKEN: &str = "USDC";
pub const PAYER_FUNDS: Amount = 1_000_000;

pub struct Harness {
    pub ledger: Arc<EscrowLedger<SimulatedChain>>,
    pub owner: OwnerCap,
    pub arbiter: ArbiterCap,
    pub payer_key: SigningKey,
    pub payer: Address,
    pub vendor: Address,
    pub custodian: Address,
    pub beneficiary: Address,
    pub market: MarketDescriptor,
    pub market_id: MarketId,
    next_nonce: Cell<u64>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_supply_cap(None)
    }

    /// Payer funded with `PAYER_FUNDS`, one USDC market bound and allowed.
    pub fn with_supply_cap(supply_cap: Option<Amount>) -> Self {
        let mut chain = SimulatedChain::default();
        let payer_key = random_signing_key();
        let payer = address_of(&payer_key);
        chain.mint(payer, TOKEN, PAYER_FUNDS).unwrap();
        let market = MarketDescriptor::dummy(TOKEN);
        let market_id = chain.create_market(market.clone(), supply_cap).unwrap();

        let config = LedgerConfig::default();
        let custodian = config.custodian;
        let beneficiary = config.platform_beneficiary;
        let (ledger, owner) = EscrowLedger::new(chain, config).unwrap();
        ledger.set_token_market(&owner, TOKEN, market.clone()).unwrap();
        let arbiter = ledger.grant_arbiter(&owner).unwrap();

        Self {
            ledger: Arc::new(ledger),
            owner,
            arbiter,
            payer_key,
            payer,
            vendor: Address::derive("vendor:acme-plumbing"),
            custodian,
            beneficiary,
            market,
            market_id,
            next_nonce: Cell::new(0),
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.ledger.with_host(Clock::now).unwrap()
    }

    /// A fresh permit for `amount` of `token`, valid for ten minutes.
    pub fn permit_for(&self, token: &str, amount: Amount) -> (TransferPermit, PermitSignature) {
        let nonce = self.next_nonce.get();
        self.next_nonce.set(nonce + 1);
        let permit = TransferPermit {
            owner: self.payer,
            spender: self.custodian,
            token: token.to_string(),
            amount,
            nonce,
            deadline: self.now() + Duration::minutes(10),
        };
        let signature = permit.sign(&self.payer_key);
        (permit, signature)
    }

    pub fn create(&self, amount: Amount) -> Result<EscrowId> {
        let (permit, signature) = self.permit_for(TOKEN, amount);
        self.create_with(&permit, &signature, amount)
    }

    pub fn create_with(
        &self,
        permit: &TransferPermit,
        signature: &PermitSignature,
        amount: Amount,
    ) -> Result<EscrowId> {
        self.ledger.create_escrow(
            self.payer,
            self.vendor,
            &permit.token,
            amount,
            "bid:7f3a",
            permit,
            signature,
        )
    }

    pub fn balance(&self, who: &Address) -> Amount {
        self.ledger
            .with_host(|chain| chain.balance_of(TOKEN, who))
            .unwrap()
    }

    pub fn nonce_used(&self, nonce: u64) -> bool {
        self.ledger
            .with_host(|chain| chain.is_nonce_used(&self.payer, nonce))
            .unwrap()
    }

    /// An outside borrower pays `interest` into the market.
    pub fn accrue(&self, interest: Amount) {
        let payer = Address::derive("borrower:interest");
        let market = self.market_id;
        self.ledger
            .with_host_mut(|chain| {
                chain.mint(payer, TOKEN, interest)?;
                chain.accrue_interest(&market, interest, &payer)
            })
            .unwrap();
    }

    /// Supply conservation, vault backing and escrow share coverage.
    pub fn assert_conserved(&self) {
        self.ledger
            .with_host(SimulatedChain::verify_all)
            .unwrap()
            .unwrap();
        self.ledger.verify_position_coverage().unwrap();
    }
}
