//! # CLI Interface
//!
//! Defines the command-line argument structure for `rollup-node` using
//! `clap` derive. Every subcommand opens the same ledger database; the
//! global flags decide which one and where witness files go.

use clap::{Args, Parser, Subcommand};
use num_bigint::BigUint;
use std::path::PathBuf;

use rollup_protocol::crypto::PrivateKey;
use rollup_protocol::state::{AccountIndex, EthAddress};

use crate::logging::LogFormat;

/// Rollup account ledger.
///
/// Maintains rollup accounts in a Poseidon sparse Merkle tree and writes a
/// circuit witness (`<witness-dir>/<kind>/input.json`) for every state
/// transition it applies.
#[derive(Parser, Debug)]
#[command(
    name = "rollup-node",
    about = "Rollup account ledger and witness generator",
    version,
    propagate_version = true
)]
pub struct RollupNodeCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand. Each overrides the config file.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to a TOML config file.
    #[arg(long, short = 'c', env = "ROLLUP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory of the sled database.
    #[arg(long, env = "ROLLUP_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Root directory for witness files.
    #[arg(long, env = "ROLLUP_WITNESS_DIR", global = true)]
    pub witness_dir: Option<PathBuf>,

    /// Sparse Merkle tree depth. Must match the circuits and the database.
    #[arg(long, env = "ROLLUP_TREE_DEPTH", global = true)]
    pub tree_depth: Option<usize>,

    /// Log output format.
    #[arg(long, env = "ROLLUP_LOG_FORMAT", value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a Baby Jubjub private key and print it with its public key.
    Keygen,
    /// Create an account owned by an Ethereum address.
    Create(CreateArgs),
    /// Credit an account.
    Deposit(BalanceArgs),
    /// Debit an account.
    Withdraw(BalanceArgs),
    /// Move value between two accounts.
    Transfer(TransferArgs),
    /// Print an account and check its leaf commitment.
    Show(ShowArgs),
    /// Print the current tree root.
    Root,
    /// Clear a halt after the store and the tree have been reconciled.
    Resume,
    /// Replay the reference scenario and write all four witness kinds.
    Demo,
    /// Print version information and exit.
    Version,
}

/// Arguments for `create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Owning Ethereum address, hex with or without `0x`.
    #[arg(long)]
    pub eth_addr: EthAddress,

    /// Hex-encoded private key. Only its public key is stored.
    #[arg(long, env = "ROLLUP_KEY", hide_env_values = true)]
    pub key: PrivateKey,
}

/// Arguments for `deposit` and `withdraw`.
#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// Account index.
    #[arg(long)]
    pub index: AccountIndex,

    /// Amount, as a decimal integer.
    #[arg(long)]
    pub amount: BigUint,

    /// Hex-encoded private key of the account.
    #[arg(long, env = "ROLLUP_KEY", hide_env_values = true)]
    pub key: PrivateKey,
}

/// Arguments for `transfer`.
#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Sender account index.
    #[arg(long)]
    pub from: AccountIndex,

    /// Receiver account index.
    #[arg(long)]
    pub to: AccountIndex,

    /// Amount, as a decimal integer.
    #[arg(long)]
    pub amount: BigUint,

    /// Hex-encoded private key of the sender.
    #[arg(long, env = "ROLLUP_KEY", hide_env_values = true)]
    pub key: PrivateKey,
}

/// Arguments for `show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Account index.
    #[arg(long)]
    pub index: AccountIndex,
}
