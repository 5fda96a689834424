// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Rollup Node
//!
//! Entry point for the `rollup-node` binary. Parses CLI arguments, resolves
//! the ledger configuration, initializes logging, applies one state
//! transition per invocation, and writes its circuit witness to disk.
//!
//! - `keygen`   — print a fresh Baby Jubjub key pair
//! - `create`   — create an account         → `create-account/input.json`
//! - `deposit`  — credit an account         → `deposit/input.json`
//! - `withdraw` — debit an account          → `withdraw/input.json`
//! - `transfer` — move value between two    → `transfer/input.json`
//! - `show`     — print an account
//! - `root`     — print the tree root
//! - `resume`   — clear a halt after the operator reconciled the ledger
//! - `demo`     — replay the reference scenario end to end
//! - `version`  — print build version information

mod cli;
mod logging;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use num_bigint::BigUint;

use rollup_protocol::config::LedgerConfig;
use rollup_protocol::crypto::field;
use rollup_protocol::crypto::PrivateKey;
use rollup_protocol::state::{Account, EthAddress, StateEngine};
use rollup_protocol::storage::LedgerDb;
use rollup_protocol::zkp::Witness;

use cli::{Commands, GlobalArgs, RollupNodeCli};

fn main() -> Result<()> {
    let cli = RollupNodeCli::parse();
    let config = resolve_config(&cli.global)?;

    let format = match cli.global.log_format {
        Some(format) => format,
        None => config.logging.format.parse()?,
    };
    logging::init_logging(&config.logging.level, format)?;

    execute(cli.command, &config)
}

/// Load the config file (if any) and apply CLI overrides on top.
fn resolve_config(args: &GlobalArgs) -> Result<LedgerConfig> {
    let mut config = match &args.config {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &args.witness_dir {
        config.witness_dir = dir.clone();
    }
    if let Some(depth) = args.tree_depth {
        config.tree_depth = depth;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_ledger(config: &LedgerConfig) -> Result<(LedgerDb, StateEngine)> {
    let db = LedgerDb::open(&config.data_dir)
        .with_context(|| format!("failed to open database at {}", config.data_dir.display()))?;
    let engine = StateEngine::open(&db, config.tree_depth).context("failed to open ledger")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        depth = config.tree_depth,
        accounts = engine.account_count()?,
        root = %field::to_decimal(&engine.root()),
        halted = engine.is_halted(),
        "ledger opened"
    );
    Ok((db, engine))
}

/// Open the ledger, run `f`, and flush whatever it wrote.
fn with_ledger<R>(config: &LedgerConfig, f: impl FnOnce(&mut StateEngine) -> Result<R>) -> Result<R> {
    let (db, mut engine) = open_ledger(config)?;
    let result = f(&mut engine);
    db.flush().context("failed to flush database")?;
    result
}

fn execute(command: Commands, config: &LedgerConfig) -> Result<()> {
    let depth = config.tree_depth;
    let witness_dir = config.witness_dir.as_path();

    match command {
        Commands::Keygen => keygen(),
        Commands::Version => print_version(),
        Commands::Create(args) => with_ledger(config, |engine| {
            let draft = Account::new(args.eth_addr, args.key.public_key());
            let created = engine.create_account(&draft).context("create failed")?;
            emit(&Witness::created(&created, depth)?, witness_dir)?;
            println!("index {}", created.account.index);
            Ok(())
        })?,
        Commands::Deposit(args) => with_ledger(config, |engine| {
            let change = engine
                .deposit(args.index, &args.amount, &args.key)
                .context("deposit failed")?;
            emit(&Witness::balance_changed(&change, depth)?, witness_dir)?;
            println!("balance {}", change.after.balance);
            Ok(())
        })?,
        Commands::Withdraw(args) => with_ledger(config, |engine| {
            let change = engine
                .withdraw(args.index, &args.amount, &args.key)
                .context("withdraw failed")?;
            emit(&Witness::balance_changed(&change, depth)?, witness_dir)?;
            println!("balance {}", change.after.balance);
            Ok(())
        })?,
        Commands::Transfer(args) => with_ledger(config, |engine| {
            let transfer = engine
                .transfer(args.from, args.to, &args.amount, &args.key)
                .context("transfer failed")?;
            emit(&Witness::transferred(&transfer, depth)?, witness_dir)?;
            println!(
                "sender balance {}, receiver balance {}",
                transfer.sender_after.balance, transfer.receiver_after.balance
            );
            Ok(())
        })?,
        Commands::Show(args) => with_ledger(config, |engine| {
            let account = engine.account(args.index)?;
            let commitment = engine
                .verify_commitment(args.index)
                .context("leaf commitment check failed")?;
            println!("{}", serde_json::to_string_pretty(&account)?);
            println!("commitment {}", field::to_decimal(&commitment));
            Ok(())
        })?,
        Commands::Root => with_ledger(config, |engine| {
            println!("{}", field::to_decimal(&engine.root()));
            Ok(())
        })?,
        Commands::Resume => with_ledger(config, |engine| {
            match engine.halt_reason() {
                Some(reason) => println!("resuming, ledger was halted: {reason}"),
                None => println!("ledger is not halted"),
            }
            engine.resume().context("failed to clear halt marker")?;
            Ok(())
        })?,
        Commands::Demo => with_ledger(config, |engine| demo(engine, depth, witness_dir))?,
    }
    Ok(())
}

fn emit(witness: &Witness, witness_dir: &Path) -> Result<()> {
    let path = witness
        .write_to(witness_dir)
        .with_context(|| format!("failed to write witness under {}", witness_dir.display()))?;
    tracing::info!(kind = witness.kind().dir_name(), path = %path.display(), "witness written");
    Ok(())
}

/// Create A, deposit 100, withdraw 1, create B, transfer 1 from A to B.
fn demo(engine: &mut StateEngine, depth: usize, witness_dir: &Path) -> Result<()> {
    let alice = PrivateKey::generate();
    let bob = PrivateKey::generate();

    let created = engine.create_account(&Account::new(EthAddress::default(), alice.public_key()))?;
    let a = created.account.index;
    emit(&Witness::created(&created, depth)?, witness_dir)?;

    let deposit = engine.deposit(a, &BigUint::from(100u32), &alice)?;
    emit(&Witness::balance_changed(&deposit, depth)?, witness_dir)?;

    let withdraw = engine.withdraw(a, &BigUint::from(1u32), &alice)?;
    emit(&Witness::balance_changed(&withdraw, depth)?, witness_dir)?;

    let b = engine
        .create_account(&Account::new(EthAddress::default(), bob.public_key()))?
        .account
        .index;

    let transfer = engine.transfer(a, b, &BigUint::from(1u32), &alice)?;
    emit(&Witness::transferred(&transfer, depth)?, witness_dir)?;

    let sender = engine.account(a)?;
    let receiver = engine.account(b)?;
    println!("account {a}: balance {} nonce {}", sender.balance, sender.nonce);
    println!("account {b}: balance {} nonce {}", receiver.balance, receiver.nonce);
    println!("root {}", field::to_decimal(&engine.root()));
    println!("witnesses written to {}", witness_dir.display());
    Ok(())
}

/// Prints a fresh private key and its public key to stdout.
fn keygen() {
    let key = PrivateKey::generate();
    let public = key.public_key();
    tracing::info!("generated key pair");
    println!("private key : {}", key.to_hex());
    println!("public ax   : {}", field::to_decimal(&public.x));
    println!("public ay   : {}", field::to_decimal(&public.y));
}

/// Prints version information to stdout.
fn print_version() {
    println!("rollup-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", rollup_protocol::config::PROTOCOL_VERSION);
}
