// Ledger throughput benchmarks for the custody protocol.
//
// Covers committed deposits, deposit/withdrawal round trips, the full audit
// over a populated ledger, and the cost of staging a transaction as the
// state and the event history grow.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custody_protocol::{Address, Arn, Chain, Deployment, Holdings, ProviderHandle, Role};

// Ledger-only: the provider's books are not backed by coins.
fn setup(trusts: u64) -> (Chain, ProviderHandle) {
    let mut chain = Chain::new(Deployment::derive("bench"));
    let owner = Address::derive("owner");
    let vault = chain
        .register_provider(Address::derive("vault"), Holdings::Untracked)
        .expect("register vault");
    let (ledger, provider) = (chain.state().deployment().ledger, vault.address());

    chain
        .execute(|tx| {
            for i in 0..trusts {
                let (trust_id, root) = tx.create_trust(owner, &format!("trust-{i}"))?;
                let (role, arn) = (Role::CollateralProvider, Arn::native());
                tx.set_trusted_role(owner, trust_id, role, ledger, provider, true)?;
                tx.set_withdrawal_allowance(owner, ledger, provider, root, arn, u128::MAX)?;
                tx.ledger_deposit(&vault, ledger, root, Arn::native(), 1_000)?;
            }
            Ok(())
        })
        .expect("bench setup");

    (chain, vault)
}

fn bench_deposit(c: &mut Criterion) {
    let (mut chain, vault) = setup(1);
    let ledger = chain.state().deployment().ledger;

    c.bench_function("ledger/deposit", |b| {
        b.iter(|| {
            chain
                .execute(|tx| tx.ledger_deposit(&vault, ledger, 0, Arn::native(), 1))
                .expect("deposit");
        });
    });
}

fn bench_round_trip(c: &mut Criterion) {
    let (mut chain, vault) = setup(1);
    let ledger = chain.state().deployment().ledger;

    c.bench_function("ledger/deposit_withdrawal", |b| {
        b.iter(|| {
            chain
                .execute(|tx| {
                    tx.ledger_deposit(&vault, ledger, 0, Arn::native(), 5)?;
                    tx.ledger_withdrawal(&vault, ledger, 0, Arn::native(), 5)
                })
                .expect("round trip");
        });
    });
}

fn bench_audit(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/audit");

    for trusts in [10u64, 100, 1_000] {
        let (chain, _) = setup(trusts);
        group.throughput(Throughput::Elements(trusts));
        group.bench_with_input(BenchmarkId::from_parameter(trusts), &chain, |b, chain| {
            b.iter(|| chain.state().audit().expect("audit"));
        });
    }

    group.finish();
}

fn bench_staging_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain/noop_transaction");

    for trusts in [10u64, 100, 1_000] {
        let (mut chain, _) = setup(trusts);
        group.bench_with_input(BenchmarkId::from_parameter(trusts), &trusts, |b, _| {
            b.iter(|| chain.execute(|_| Ok(())).expect("noop"));
        });
    }

    group.finish();
}

fn bench_staging_with_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain/noop_after_events");

    for committed in [100u64, 1_000, 10_000] {
        let (mut chain, vault) = setup(1);
        let ledger = chain.state().deployment().ledger;
        for _ in 0..committed {
            chain
                .execute(|tx| tx.ledger_deposit(&vault, ledger, 0, Arn::native(), 1))
                .expect("history");
        }
        group.bench_with_input(BenchmarkId::from_parameter(committed), &committed, |b, _| {
            b.iter(|| chain.execute(|_| Ok(())).expect("noop"));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_deposit,
    bench_round_trip,
    bench_audit,
    bench_staging_cost,
    bench_staging_with_history
);
criterion_main!(benches);
