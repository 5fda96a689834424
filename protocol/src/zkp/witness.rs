//! # Witness Assembly
//!
//! Packages a completed state transition into the flat JSON object a circom
//! circuit reads as `input.json`.
//!
//! The field names and their order are the external contract. Every number
//! is a base-10 string, sibling paths are arrays of strings with exactly
//! `depth + 1` entries, and `isOld0` is `"1"` or `"0"`.
//!
//! Account values in deposit, withdraw, and transfer witnesses are the
//! **pre-mutation** values: the circuit re-derives the post state itself
//! and checks that it lands on the new root.

use std::fs;
use std::path::{Path, PathBuf};

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WITNESS_FILE_NAME;
use crate::crypto::field;
use crate::error::LedgerResult;
use crate::state::account::Account;
use crate::state::engine::{AccountCreated, BalanceChanged, BalanceOp, TransferApplied};
use crate::storage::TreeProof;

fn dec(element: &Fr) -> String {
    field::to_decimal(element)
}

fn flag(set: bool) -> String {
    let bit = if set { "1" } else { "0" };
    bit.to_string()
}

fn siblings(proof: &TreeProof, depth: usize) -> LedgerResult<Vec<String>> {
    proof.check_shape(depth)?;
    Ok(proof.siblings.iter().map(dec).collect())
}

fn eth_addr(account: &Account) -> String {
    account.eth_addr.to_biguint().to_str_radix(10)
}

// ---------------------------------------------------------------------------
// Create account
// ---------------------------------------------------------------------------

/// Input for the create-account circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountWitness {
    pub balance: String,
    pub nonce: String,
    pub eth_addr: String,
    pub ax: String,
    pub ay: String,
    pub old_state_root: String,
    pub siblings: Vec<String>,
    pub is_old0: String,
    pub old_key: String,
    pub old_value: String,
    pub new_key: String,
}

impl CreateAccountWitness {
    pub fn from_transition(created: &AccountCreated, depth: usize) -> LedgerResult<Self> {
        let account = &created.account;
        let proof = &created.proof;
        Ok(Self {
            balance: account.balance.to_str_radix(10),
            nonce: account.nonce.to_string(),
            eth_addr: eth_addr(account),
            ax: dec(&account.public_key.x),
            ay: dec(&account.public_key.y),
            old_state_root: dec(&proof.old_root),
            siblings: siblings(proof, depth)?,
            is_old0: flag(proof.is_old0),
            old_key: dec(&proof.old_key),
            old_value: dec(&proof.old_value),
            new_key: dec(&proof.new_key),
        })
    }
}

// ---------------------------------------------------------------------------
// Deposit / withdraw
// ---------------------------------------------------------------------------

/// Input for the deposit and withdraw circuits, which share a layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceWitness {
    pub idx: String,
    pub balance: String,
    pub amount: String,
    pub nonce: String,
    pub eth_addr: String,
    pub ax: String,
    pub ay: String,
    pub old_state_root: String,
    pub siblings: Vec<String>,
    pub is_old0: String,
    pub s: String,
    pub r8x: String,
    pub r8y: String,
}

pub type DepositWitness = BalanceWitness;
pub type WithdrawWitness = BalanceWitness;

impl BalanceWitness {
    pub fn from_transition(change: &BalanceChanged, depth: usize) -> LedgerResult<Self> {
        let before = &change.before;
        Ok(Self {
            idx: before.index.to_string(),
            balance: before.balance.to_str_radix(10),
            amount: change.amount.to_str_radix(10),
            nonce: before.nonce.to_string(),
            eth_addr: eth_addr(before),
            ax: dec(&before.public_key.x),
            ay: dec(&before.public_key.y),
            old_state_root: dec(&change.proof.old_root),
            siblings: siblings(&change.proof, depth)?,
            is_old0: flag(change.proof.is_old0),
            s: change.signature.s.to_str_radix(10),
            r8x: dec(&change.signature.r8.x),
            r8y: dec(&change.signature.r8.y),
        })
    }
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// Input for the transfer circuit. The receiver's old root is implied: it
/// is the root the sender's update produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferWitness {
    pub sender_idx: String,
    pub sender_balance: String,
    pub sender_nonce: String,
    pub sender_eth_addr: String,
    pub sender_ax: String,
    pub sender_ay: String,
    pub sender_old_state_root: String,
    pub sender_siblings: Vec<String>,
    pub sender_is_old0: String,
    pub transfer_amount: String,
    pub sender_s: String,
    pub sender_r8x: String,
    pub sender_r8y: String,
    pub receiver_idx: String,
    pub receiver_balance: String,
    pub receiver_nonce: String,
    pub receiver_eth_addr: String,
    pub receiver_ax: String,
    pub receiver_ay: String,
    pub receiver_siblings: Vec<String>,
    pub receiver_is_old0: String,
}

impl TransferWitness {
    pub fn from_transition(transfer: &TransferApplied, depth: usize) -> LedgerResult<Self> {
        let sender = &transfer.sender_before;
        let receiver = &transfer.receiver_before;
        Ok(Self {
            sender_idx: sender.index.to_string(),
            sender_balance: sender.balance.to_str_radix(10),
            sender_nonce: sender.nonce.to_string(),
            sender_eth_addr: eth_addr(sender),
            sender_ax: dec(&sender.public_key.x),
            sender_ay: dec(&sender.public_key.y),
            sender_old_state_root: dec(&transfer.sender_proof.old_root),
            sender_siblings: siblings(&transfer.sender_proof, depth)?,
            sender_is_old0: flag(transfer.sender_proof.is_old0),
            transfer_amount: transfer.amount.to_str_radix(10),
            sender_s: transfer.signature.s.to_str_radix(10),
            sender_r8x: dec(&transfer.signature.r8.x),
            sender_r8y: dec(&transfer.signature.r8.y),
            receiver_idx: receiver.index.to_string(),
            receiver_balance: receiver.balance.to_str_radix(10),
            receiver_nonce: receiver.nonce.to_string(),
            receiver_eth_addr: eth_addr(receiver),
            receiver_ax: dec(&receiver.public_key.x),
            receiver_ay: dec(&receiver.public_key.y),
            receiver_siblings: siblings(&transfer.receiver_proof, depth)?,
            receiver_is_old0: flag(transfer.receiver_proof.is_old0),
        })
    }
}

// ---------------------------------------------------------------------------
// Witness files
// ---------------------------------------------------------------------------

/// Which circuit a witness is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WitnessKind {
    CreateAccount,
    Deposit,
    Withdraw,
    Transfer,
}

impl WitnessKind {
    /// Directory name under the witness root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            WitnessKind::CreateAccount => "create-account",
            WitnessKind::Deposit => "deposit",
            WitnessKind::Withdraw => "withdraw",
            WitnessKind::Transfer => "transfer",
        }
    }
}

/// Any witness record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Witness {
    CreateAccount(CreateAccountWitness),
    Deposit(DepositWitness),
    Withdraw(WithdrawWitness),
    Transfer(TransferWitness),
}

impl Witness {
    pub fn created(created: &AccountCreated, depth: usize) -> LedgerResult<Self> {
        CreateAccountWitness::from_transition(created, depth).map(Witness::CreateAccount)
    }

    pub fn balance_changed(change: &BalanceChanged, depth: usize) -> LedgerResult<Self> {
        let witness = BalanceWitness::from_transition(change, depth)?;
        Ok(match change.op {
            BalanceOp::Deposit => Witness::Deposit(witness),
            BalanceOp::Withdraw => Witness::Withdraw(witness),
        })
    }

    pub fn transferred(transfer: &TransferApplied, depth: usize) -> LedgerResult<Self> {
        TransferWitness::from_transition(transfer, depth).map(Witness::Transfer)
    }

    pub fn kind(&self) -> WitnessKind {
        match self {
            Witness::CreateAccount(_) => WitnessKind::CreateAccount,
            Witness::Deposit(_) => WitnessKind::Deposit,
            Witness::Withdraw(_) => WitnessKind::Withdraw,
            Witness::Transfer(_) => WitnessKind::Transfer,
        }
    }

    /// Write the witness to `<root>/<kind>/input.json`, replacing any
    /// previous file, and return the path written.
    pub fn write_to(&self, root: &Path) -> LedgerResult<PathBuf> {
        let dir = root.join(self.kind().dir_name());
        fs::create_dir_all(&dir)?;
        let path = dir.join(WITNESS_FILE_NAME);
        fs::write(&path, serde_json::to_vec(self)?)?;
        debug!(path = %path.display(), "witness written");
        Ok(path)
    }
}
