//! End-to-end tests for the custody core.
//!
//! These drive the full stack through [`Chain::execute`]: trust creation,
//! key issuance, notary grants, ledger deposits, scribe distribution and
//! withdrawals, followed by a snapshot and event-history round trip. A fungible-token ARN is
//! used so the ledger is exercised independently of the native vault.
//!
//! Each test builds its own chain. No shared state, no ordering dependencies.

use proptest::prelude::*;

use custody_protocol::{
    Address, Amount, Arn, BalanceContext, Chain, Deployment, EventLog, Holdings, KeyRole,
    ProviderHandle, Role, TransferGuarded, WorldState,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Actors {
    owner: Address,
    heir: Address,
    provider: ProviderHandle,
    scribe: ProviderHandle,
    arn: Arn,
}

/// Registers the token vault and the scribe. The vault's token balance lives
/// outside the coin bank, so its holdings are not audited here.
fn actors(chain: &mut Chain) -> Actors {
    let mut register = |label: &str| {
        chain
            .register_provider(Address::derive(label), Holdings::Untracked)
            .expect("fresh provider address")
    };
    Actors {
        owner: Address::derive("owner"),
        heir: Address::derive("heir"),
        provider: register("token-vault"),
        scribe: register("scribe"),
        arn: Arn::fungible(Address::derive("usd-token")),
    }
}

/// Trust 0 with root key 0 held by the owner and beneficiary key 1 held by
/// the heir. The provider is trusted to hold collateral and the scribe to
/// redistribute it.
fn setup() -> (Chain, Actors) {
    let mut chain = Chain::new(Deployment::derive("e2e"));
    let a = actors(&mut chain);
    let ledger = chain.state().deployment().ledger;
    let (provider, scribe) = (a.provider.address(), a.scribe.address());

    chain
        .execute(|tx| {
            tx.create_trust(a.owner, "estate")?;
            tx.create_key(a.owner, 0, "heir", KeyRole::Beneficiary, a.heir, false)?;
            tx.set_trusted_role(a.owner, 0, Role::CollateralProvider, ledger, provider, true)?;
            tx.set_trusted_role(a.owner, 0, Role::Scribe, ledger, scribe, true)
        })
        .expect("setup should commit");

    (chain, a)
}

fn balance(chain: &Chain, context: BalanceContext, provider: Option<Address>, arn: Arn) -> Amount {
    chain
        .state()
        .ledger()
        .balance(context, provider, arn)
        .expect("balance fits")
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn deposit_distribute_withdraw_lifecycle() {
    let (mut chain, a) = setup();
    let ledger = chain.state().deployment().ledger;

    let provider = a.provider.address();

    let deposited = chain
        .execute(|tx| tx.ledger_deposit(&a.provider, ledger, 0, a.arn, 100))
        .unwrap();
    assert_eq!((deposited.key, deposited.trust, deposited.provider), (100, 100, 100));

    let remaining = chain
        .execute(|tx| tx.ledger_distribute(&a.scribe, ledger, provider, a.arn, 0, &[1], &[30]))
        .unwrap();
    assert_eq!(remaining, 70);

    let withdrawn = chain
        .execute(|tx| {
            tx.set_withdrawal_allowance(a.owner, ledger, provider, 1, a.arn, 30)?;
            tx.ledger_withdrawal(&a.provider, ledger, 1, a.arn, 30)
        })
        .unwrap();
    assert_eq!((withdrawn.key, withdrawn.trust, withdrawn.provider), (0, 70, 70));

    assert_eq!(balance(&chain, BalanceContext::Key(0), None, a.arn), 70);
    assert_eq!(balance(&chain, BalanceContext::Key(1), None, a.arn), 0);
    assert_eq!(balance(&chain, BalanceContext::Trust(0), Some(provider), a.arn), 70);
    assert_eq!(balance(&chain, BalanceContext::Ledger, None, a.arn), 70);
    let state = chain.state();
    assert_eq!(
        state.notary().withdrawal_allowance(ledger, provider, 1, a.arn),
        0
    );
    state.audit().expect("books should balance");
}

#[test]
fn failed_step_unwinds_the_whole_transaction() {
    let (mut chain, a) = setup();
    let ledger = chain.state().deployment().ledger;
    let events_before = chain.events().len();

    // The deposit succeeds, the withdrawal has no allowance.
    let result = chain.execute(|tx| {
        tx.ledger_deposit(&a.provider, ledger, 0, a.arn, 50)?;
        tx.ledger_withdrawal(&a.provider, ledger, 0, a.arn, 10)
    });

    assert_eq!(result.unwrap_err().reason(), "UNAPPROVED_AMOUNT");
    assert_eq!(balance(&chain, BalanceContext::Ledger, None, a.arn), 0);
    assert_eq!(chain.events().len(), events_before);
    assert_eq!(chain.state().transactions(), 1);
}

#[test]
fn snapshot_round_trip_resumes_execution() {
    let (mut chain, a) = setup();
    let ledger = chain.state().deployment().ledger;
    chain
        .execute(|tx| tx.ledger_deposit(&a.provider, ledger, 0, a.arn, 25))
        .unwrap();

    let bytes = bincode::serialize(chain.state()).unwrap();
    let restored: WorldState = bincode::deserialize(&bytes).unwrap();
    let history = EventLog::from_records(chain.events().records().to_vec());

    let mut resumed = Chain::resume(restored, history).unwrap();
    assert_eq!(resumed.events().records(), chain.events().records());

    // handles do not carry over; the resumed chain issues its own
    let stale = resumed.execute(|tx| tx.ledger_deposit(&a.provider, ledger, 0, a.arn, 5));
    assert_eq!(stale.unwrap_err().reason(), "INVALID_INPUT");
    let provider = resumed
        .register_provider(a.provider.address(), Holdings::Untracked)
        .unwrap();

    let triple = resumed
        .execute(|tx| tx.ledger_deposit(&provider, ledger, 0, a.arn, 5))
        .unwrap();
    assert_eq!(triple.trust, 30);
    assert_eq!(resumed.state().transactions(), 3);
    assert_eq!(
        resumed.events().records().last().map(|r| r.sequence),
        Some(chain.events().len() as u64)
    );
    resumed.state().audit().unwrap();
}

#[test]
fn revoked_provider_can_no_longer_deposit() {
    let (mut chain, a) = setup();
    let ledger = chain.state().deployment().ledger;

    let provider = a.provider.address();

    chain
        .execute(|tx| {
            tx.set_trusted_role(a.owner, 0, Role::CollateralProvider, ledger, provider, false)
        })
        .unwrap();
    let err = chain
        .execute(|tx| tx.ledger_deposit(&a.provider, ledger, 0, a.arn, 1))
        .unwrap_err();
    assert_eq!(err.reason(), "UNTRUSTED_PROVIDER");
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

const KEY: u64 = 7;
const MINIMUM: u128 = 4;

proptest! {
    /// Arbitrary holder-initiated transfers never change supply and never
    /// push a soulbound holder below its minimum.
    #[test]
    fn transfers_conserve_supply_and_respect_soulbound(
        moves in prop::collection::vec((0usize..3, 0usize..3, 0u128..8), 1..40)
    ) {
        let mut chain = Chain::new(Deployment::derive("prop"));
        let issuer = chain.state().deployment().issuer;
        let holders = [Address::derive("a"), Address::derive("b"), Address::derive("c")];

        chain.execute(|tx| {
            for holder in holders {
                tx.mint_keys(issuer, holder, KEY, 10)?;
            }
            tx.set_soulbound_minimum(issuer, holders[0], KEY, MINIMUM)
        }).unwrap();

        for (from, to, amount) in moves {
            let (from, to) = (holders[from], holders[to]);
            let _ = chain.execute(|tx| tx.transfer_key(from, from, to, KEY, amount));
        }

        let keys = chain.state().keys();
        let supply: u128 = holders.iter().map(|h| keys.balance_of(*h, KEY)).sum();
        prop_assert_eq!(supply, 30);
        prop_assert!(keys.balance_of(holders[0], KEY) >= MINIMUM);
    }
}
