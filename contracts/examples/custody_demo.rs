//! Terminal walkthrough of a custody lifecycle.
//!
//! Creates a trust, trusts a native vault, deposits, hands a soulbound
//! beneficiary key to an heir, distributes part of the balance to it, and
//! withdraws under a notarized allowance. Each step prints the nested
//! balances and ends with a full audit.
//!
//! Run with:
//!   cargo run -p custody-contracts --example custody_demo

use std::time::Instant;

use custody_contracts::NativeVault;
use custody_protocol::chain::{Chain, Holdings};
use custody_protocol::error::CustodyResult;
use custody_protocol::ledger::BalanceContext;
use custody_protocol::{Address, Arn, Deployment, KeyRole, Role};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn section(title: &str) {
    println!();
    println!("{BOLD}{WHITE}  {title}{RESET}");
    println!("{DIM}  {}{RESET}", "-".repeat(60));
}

fn narrate(text: &str) {
    println!("{DIM}{CYAN}  >> {text}{RESET}");
}

fn ok(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn refused(text: &str, reason: &str) {
    println!("{RED}  [REFUSED] {text}: {BOLD}{reason}{RESET}");
}

fn show(label: &str, value: impl std::fmt::Display) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn balances(chain: &Chain, vault: &NativeVault, keys: &[(&str, u64)]) -> CustodyResult<()> {
    let ledger = chain.state().ledger();
    let (arn, at_vault) = (Arn::native(), Some(vault.address()));
    for (name, key_id) in keys {
        show(
            &format!("key {key_id} ({name})"),
            ledger.balance(BalanceContext::Key(*key_id), at_vault, arn)?,
        );
    }
    show("trust 0", ledger.balance(BalanceContext::Trust(0), None, arn)?);
    show("vault (ledger)", ledger.balance(BalanceContext::Ledger, at_vault, arn)?);
    show("vault (coins)", chain.state().coins().balance_of(vault.address()));
    Ok(())
}

fn main() -> CustodyResult<()> {
    let started = Instant::now();
    let mut chain = Chain::new(Deployment::derive("demo"));
    let vault = NativeVault::install(&mut chain, "demo/native-vault")?;
    let scribe = chain.register_provider(Address::derive("demo/scribe"), Holdings::Untracked)?;
    let (ledger, provider) = (vault.ledger(), vault.address());

    let owner = Address::derive("demo/owner");
    let heir = Address::derive("demo/heir");

    section("1. Trust creation");
    let (trust_id, root) = chain.execute(|tx| {
        tx.faucet(owner, 1_000)?;
        let created = tx.create_trust(owner, "Family Estate")?;
        tx.set_trusted_role(owner, created.0, Role::CollateralProvider, ledger, provider, true)?;
        Ok(created)
    })?;
    narrate("the owner receives the root key and trusts the vault");
    show("trust", trust_id);
    show("root key", root);

    section("2. Deposit");
    chain.execute(|tx| vault.deposit(tx, owner, 100, root))?;
    ok("100 coins deposited against the root key");
    balances(&chain, &vault, &[("root", root)])?;

    section("3. Beneficiary key");
    let heir_key = chain.execute(|tx| {
        tx.create_key(owner, root, "heir", KeyRole::Beneficiary, heir, true)
    })?;
    narrate("one unit minted to the heir and soulbound to them");
    match chain.execute(|tx| tx.transfer_key(heir, heir, owner, heir_key, 1)) {
        Ok(()) => ok("heir passed the key on"),
        Err(err) => refused("heir tries to pass the key on", err.reason()),
    }

    section("4. Distribution");
    chain.execute(|tx| {
        tx.set_trusted_role(owner, trust_id, Role::Scribe, ledger, scribe.address(), true)?;
        tx.ledger_distribute(&scribe, ledger, provider, Arn::native(), root, &[heir_key], &[30])
    })?;
    ok("scribe moved 30 from the root key to the heir key");
    balances(&chain, &vault, &[("root", root), ("heir", heir_key)])?;

    section("5. Withdrawal");
    match chain.execute(|tx| vault.withdrawal(tx, heir, heir_key, 10)) {
        Ok(_) => ok("heir withdrew without an allowance"),
        Err(err) => refused("heir withdraws without an allowance", err.reason()),
    }
    chain.execute(|tx| {
        tx.set_withdrawal_allowance(owner, ledger, provider, heir_key, Arn::native(), 10)
    })?;
    chain.execute(|tx| vault.withdrawal(tx, heir, heir_key, 10))?;
    ok("heir withdrew 10 under a notarized allowance");
    show("heir coins", chain.state().coins().balance_of(heir));
    balances(&chain, &vault, &[("root", root), ("heir", heir_key)])?;

    section("6. Audit");
    chain.state().audit()?;
    chain.state().audit_holdings(provider, Arn::native())?;
    ok("nested balances and physical holdings agree");
    show("committed transactions", chain.state().transactions());
    show("events", chain.events().len());
    println!("{DIM}  [elapsed: {:.2} ms]{RESET}", started.elapsed().as_secs_f64() * 1_000.0);
    println!();

    Ok(())
}
