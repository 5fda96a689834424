//! End-to-end integration tests for the rollup ledger.
//!
//! These tests drive the public API the way the node binary does: open a
//! database, build a `StateEngine` on top of it, apply transitions, and turn
//! each result into a circuit witness. They check that the pieces compose:
//! account storage, the sparse Merkle tree, signatures, and witness output.
//!
//! Each test owns its own temporary database.

use num_bigint::BigUint;
use num_traits::Zero;

use rollup_protocol::config::TREE_DEPTH;
use rollup_protocol::crypto::{field, verify_poseidon, PrivateKey};
use rollup_protocol::state::encoding;
use rollup_protocol::state::{Account, AccountIndex, EthAddress, StateEngine};
use rollup_protocol::storage::{LedgerDb, TreeOperation};
use rollup_protocol::zkp::{Witness, WitnessKind};
use rollup_protocol::LedgerError;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn amount(value: u64) -> BigUint {
    BigUint::from(value)
}

fn address(byte: u8) -> EthAddress {
    EthAddress([byte; 20])
}

fn temp_engine() -> (LedgerDb, StateEngine) {
    let db = LedgerDb::open_temporary().unwrap();
    let engine = StateEngine::open(&db, TREE_DEPTH).unwrap();
    (db, engine)
}

fn create(engine: &mut StateEngine, key: &PrivateKey, byte: u8) -> AccountIndex {
    engine
        .create_account(&Account::new(address(byte), key.public_key()))
        .unwrap()
        .account
        .index
}

// ---------------------------------------------------------------------------
// Reference scenario
// ---------------------------------------------------------------------------

/// Create A, deposit 100, withdraw 1, create B, transfer 1 from A to B,
/// then attempt an overdraft.
#[test]
fn reference_scenario() {
    let (_db, mut engine) = temp_engine();
    let alice = PrivateKey::generate();
    let bob = PrivateKey::generate();

    let a = create(&mut engine, &alice, 0xaa);
    assert_eq!(a, 1);

    let deposit = engine.deposit(a, &amount(100), &alice).unwrap();
    assert_eq!(deposit.after.balance, amount(100));
    assert_eq!(deposit.after.nonce, 1);

    let withdraw = engine.withdraw(a, &amount(1), &alice).unwrap();
    assert_eq!(withdraw.after.balance, amount(99));
    assert_eq!(withdraw.after.nonce, 2);

    let b = create(&mut engine, &bob, 0xbb);
    assert_eq!(b, 2);

    let transfer = engine.transfer(a, b, &amount(1), &alice).unwrap();
    assert_eq!(transfer.sender_after.balance, amount(98));
    assert_eq!(transfer.sender_after.nonce, 3);
    assert_eq!(transfer.receiver_after.balance, amount(1));
    assert_eq!(transfer.receiver_after.nonce, 0);

    let root = engine.root();
    let err = engine.withdraw(a, &amount(1000), &alice).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    let sender = engine.account(a).unwrap();
    assert_eq!(sender.balance, amount(98));
    assert_eq!(sender.nonce, 3);
    assert_eq!(engine.root(), root);
    assert!(!engine.is_halted());

    engine.verify_commitment(a).unwrap();
    engine.verify_commitment(b).unwrap();
    assert_eq!(engine.store().total_balance().unwrap(), amount(99));
}

// ---------------------------------------------------------------------------
// Ledger properties
// ---------------------------------------------------------------------------

#[test]
fn indices_are_assigned_in_order() {
    let (_db, mut engine) = temp_engine();
    let indices: Vec<_> = (0..5u8)
        .map(|i| create(&mut engine, &PrivateKey::generate(), i))
        .collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(engine.account_count().unwrap(), 5);
}

#[test]
fn nonce_counts_authorized_operations() {
    let (_db, mut engine) = temp_engine();
    let key = PrivateKey::generate();
    let other = PrivateKey::generate();
    let a = create(&mut engine, &key, 1);
    let b = create(&mut engine, &other, 2);

    let mut expected = 0;
    for _ in 0..3 {
        engine.deposit(a, &amount(10), &key).unwrap();
        expected += 1;
        assert_eq!(engine.account(a).unwrap().nonce, expected);
    }
    engine.transfer(a, b, &amount(5), &key).unwrap();
    expected += 1;
    assert_eq!(engine.account(a).unwrap().nonce, expected);

    // Rejections leave the nonce where it was.
    assert!(engine.withdraw(a, &amount(1_000), &key).is_err());
    assert!(engine.deposit(a, &amount(1), &other).is_err());
    assert!(engine.deposit(a, &BigUint::zero(), &key).is_err());
    assert_eq!(engine.account(a).unwrap().nonce, expected);
}

#[test]
fn every_leaf_matches_its_account() {
    let (_db, mut engine) = temp_engine();
    let keys: Vec<_> = (0..4).map(|_| PrivateKey::generate()).collect();
    let indices: Vec<_> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| create(&mut engine, key, i as u8))
        .collect();

    for (key, &index) in keys.iter().zip(&indices) {
        engine.deposit(index, &amount(50), key).unwrap();
    }
    engine
        .transfer(indices[0], indices[3], &amount(20), &keys[0])
        .unwrap();
    engine.withdraw(indices[2], &amount(7), &keys[2]).unwrap();

    for &index in &indices {
        let account = engine.account(index).unwrap();
        let commitment = engine.verify_commitment(index).unwrap();
        assert_eq!(commitment, encoding::commitment(&account).unwrap());
    }
    assert_eq!(engine.store().total_balance().unwrap(), amount(193));
}

#[test]
fn transfer_proofs_chain_and_signature_verifies() {
    let (_db, mut engine) = temp_engine();
    let alice = PrivateKey::generate();
    let bob = PrivateKey::generate();
    let a = create(&mut engine, &alice, 1);
    let b = create(&mut engine, &bob, 2);
    engine.deposit(a, &amount(40), &alice).unwrap();

    let root_before = engine.root();
    let transfer = engine.transfer(a, b, &amount(15), &alice).unwrap();

    assert_eq!(transfer.sender_proof.operation, TreeOperation::Update);
    assert_eq!(transfer.receiver_proof.operation, TreeOperation::Update);
    assert_eq!(transfer.sender_proof.old_root, root_before);
    assert_eq!(transfer.receiver_proof.old_root, transfer.sender_proof.new_root);
    assert_eq!(transfer.receiver_proof.new_root, engine.root());
    assert!(!transfer.sender_proof.is_old0);
    assert!(!transfer.receiver_proof.is_old0);
    assert_eq!(transfer.sender_proof.siblings.len(), TREE_DEPTH + 1);
    assert_eq!(transfer.receiver_proof.siblings.len(), TREE_DEPTH + 1);

    let pre = encoding::commitment(&transfer.sender_before).unwrap();
    assert_eq!(transfer.sender_proof.old_value, pre);
    let digest = encoding::transaction_digest(pre, &amount(15)).unwrap();
    assert!(verify_poseidon(&alice.public_key(), digest, &transfer.signature));
    assert!(!verify_poseidon(&bob.public_key(), digest, &transfer.signature));
}

#[test]
fn wrong_key_cannot_move_funds() {
    let (_db, mut engine) = temp_engine();
    let alice = PrivateKey::generate();
    let mallory = PrivateKey::generate();
    let a = create(&mut engine, &alice, 1);
    let m = create(&mut engine, &mallory, 2);
    engine.deposit(a, &amount(10), &alice).unwrap();

    let root = engine.root();
    let err = engine.transfer(a, m, &amount(10), &mallory).unwrap_err();
    assert!(matches!(err, LedgerError::UnauthorizedSigner(index) if index == a));
    assert_eq!(engine.root(), root);
    assert_eq!(engine.account(a).unwrap().balance, amount(10));
}

// ---------------------------------------------------------------------------
// Witnesses
// ---------------------------------------------------------------------------

#[test]
fn witnesses_are_written_per_kind() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, mut engine) = temp_engine();
    let alice = PrivateKey::generate();
    let bob = PrivateKey::generate();

    let created = engine
        .create_account(&Account::new(address(0xaa), alice.public_key()))
        .unwrap();
    let a = created.account.index;
    let b = create(&mut engine, &bob, 0xbb);
    let deposit = engine.deposit(a, &amount(100), &alice).unwrap();
    let withdraw = engine.withdraw(a, &amount(1), &alice).unwrap();
    let transfer = engine.transfer(a, b, &amount(1), &alice).unwrap();

    let witnesses = [
        Witness::created(&created, TREE_DEPTH).unwrap(),
        Witness::balance_changed(&deposit, TREE_DEPTH).unwrap(),
        Witness::balance_changed(&withdraw, TREE_DEPTH).unwrap(),
        Witness::transferred(&transfer, TREE_DEPTH).unwrap(),
    ];
    let kinds: Vec<_> = witnesses.iter().map(Witness::kind).collect();
    assert_eq!(
        kinds,
        vec![
            WitnessKind::CreateAccount,
            WitnessKind::Deposit,
            WitnessKind::Withdraw,
            WitnessKind::Transfer
        ]
    );

    for witness in &witnesses {
        let path = witness.write_to(dir.path()).unwrap();
        assert_eq!(
            path,
            dir.path().join(witness.kind().dir_name()).join("input.json")
        );
    }

    // The transfer witness carries pre-transfer values for both parties.
    let raw = std::fs::read_to_string(dir.path().join("transfer").join("input.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["senderIdx"], a.to_string());
    assert_eq!(json["senderBalance"], "99");
    assert_eq!(json["senderNonce"], "2");
    assert_eq!(json["receiverIdx"], b.to_string());
    assert_eq!(json["receiverBalance"], "0");
    assert_eq!(json["transferAmount"], "1");
    assert_eq!(json["senderIsOld0"], "0");
    assert_eq!(
        json["senderOldStateRoot"],
        field::to_decimal(&transfer.sender_proof.old_root)
    );
    assert_eq!(
        json["senderSiblings"].as_array().unwrap().len(),
        TREE_DEPTH + 1
    );
    assert_eq!(
        json["receiverSiblings"].as_array().unwrap().len(),
        TREE_DEPTH + 1
    );

    let raw = std::fs::read_to_string(dir.path().join("create-account").join("input.json"))
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["balance"], "0");
    assert_eq!(json["nonce"], "0");
    assert_eq!(json["isOld0"], "1");
    assert_eq!(json["newKey"], "1");
    assert_eq!(json["ax"], field::to_decimal(&alice.public_key().x));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let alice = PrivateKey::generate();
    let bob = PrivateKey::generate();

    let (a, b, root) = {
        let db = LedgerDb::open(&path).unwrap();
        let mut engine = StateEngine::open(&db, TREE_DEPTH).unwrap();
        let a = create(&mut engine, &alice, 1);
        let b = create(&mut engine, &bob, 2);
        engine.deposit(a, &amount(30), &alice).unwrap();
        engine.transfer(a, b, &amount(12), &alice).unwrap();
        db.flush().unwrap();
        (a, b, engine.root())
    };

    let db = LedgerDb::open(&path).unwrap();
    let mut engine = StateEngine::open(&db, TREE_DEPTH).unwrap();
    assert_eq!(engine.root(), root);
    assert_eq!(engine.account_count().unwrap(), 2);
    assert_eq!(engine.account(a).unwrap().balance, amount(18));
    assert_eq!(engine.account(b).unwrap().balance, amount(12));
    engine.verify_commitment(a).unwrap();
    engine.verify_commitment(b).unwrap();

    // Index assignment continues from the persisted counter.
    let c = create(&mut engine, &PrivateKey::generate(), 3);
    assert_eq!(c, 3);
}

#[test]
fn reopen_with_other_depth_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    {
        let db = LedgerDb::open(&path).unwrap();
        let mut engine = StateEngine::open(&db, TREE_DEPTH).unwrap();
        create(&mut engine, &PrivateKey::generate(), 1);
        db.flush().unwrap();
    }

    let db = LedgerDb::open(&path).unwrap();
    assert!(StateEngine::open(&db, TREE_DEPTH + 2).is_err());
}
