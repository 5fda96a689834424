//! # State Transition Engine
//!
//! The only component that mutates the ledger. Every operation follows the
//! same shape:
//!
//! ```text
//! validate ─► sign (pre-state) ─► mutate in memory ─► persist ─► re-commit ─► prove
//! ```
//!
//! Everything up to and including the in-memory mutation is side-effect
//! free. A request rejected there (unknown account, zero amount, overdraft,
//! wrong signer, a balance that would overflow the field) leaves both the
//! account store and the tree exactly as they were.
//!
//! Before anything is written, the leaf of every account about to change
//! must still hold the commitment of its stored record. A mismatch is an
//! `InvariantViolation` and nothing is written.
//!
//! Persistence is one atomic sled batch. After it lands the tree is
//! updated, and from that moment a failure means the store and the tree
//! disagree. The engine then **halts**: every further mutating call returns
//! `Halted` until an operator has looked at the database and called
//! [`StateEngine::resume`]. The halt is recorded in the database, so an
//! engine opened later on the same data comes up halted too.
//!
//! ## Signatures
//!
//! Deposit, withdraw, and transfer are signed by the debited account's key
//! over `Poseidon(pre_commitment, amount)`. The key is never held by the
//! engine; callers hand in a [`TransactionSigner`] per call. The signature
//! is verified before anything is written, so a signer that signs with the
//! wrong key is caught as `UnauthorizedSigner`.

use std::sync::Arc;

use ark_bn254::Fr;
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use super::account::{Account, AccountIndex};
use super::encoding;
use crate::config::account_capacity;
use crate::crypto::field;
use crate::crypto::signatures::{verify_poseidon, Signature, TransactionSigner};
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{AccountStore, AuthenticatedTree, LedgerDb, SparseMerkleTree, TreeProof};

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Which way a single-account balance change goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceOp {
    Deposit,
    Withdraw,
}

impl BalanceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceOp::Deposit => "deposit",
            BalanceOp::Withdraw => "withdraw",
        }
    }
}

/// Result of `create_account`.
#[derive(Clone, Debug)]
pub struct AccountCreated {
    /// The stored account, index assigned.
    pub account: Account,
    /// Insert proof for its leaf.
    pub proof: TreeProof,
}

/// Result of `deposit` or `withdraw`.
#[derive(Clone, Debug)]
pub struct BalanceChanged {
    pub op: BalanceOp,
    /// Snapshot before the change. This is what the circuit sees.
    pub before: Account,
    pub after: Account,
    pub amount: BigUint,
    pub proof: TreeProof,
    pub signature: Signature,
}

/// Result of `transfer`.
#[derive(Clone, Debug)]
pub struct TransferApplied {
    pub sender_before: Account,
    pub sender_after: Account,
    pub receiver_before: Account,
    pub receiver_after: Account,
    pub amount: BigUint,
    /// Tree update for the sender, applied first.
    pub sender_proof: TreeProof,
    /// Tree update for the receiver. Its old root is the sender proof's new root.
    pub receiver_proof: TreeProof,
    /// The sender's signature. The receiver does not sign.
    pub signature: Signature,
}

/// A fully validated change, ready to persist.
struct Planned {
    before: Account,
    after: Account,
    pre_commitment: Fr,
    post_commitment: Fr,
}

// ---------------------------------------------------------------------------
// StateEngine
// ---------------------------------------------------------------------------

/// Applies state transitions to one account store and one tree.
#[derive(Debug)]
pub struct StateEngine<T: AuthenticatedTree = SparseMerkleTree> {
    store: AccountStore,
    tree: T,
    halted: Option<String>,
}

impl StateEngine<SparseMerkleTree> {
    /// Open the engine on a database with the sled-backed tree.
    pub fn open(db: &LedgerDb, depth: usize) -> LedgerResult<Self> {
        let store = AccountStore::new(db);
        let tree = SparseMerkleTree::open(db, depth)?;
        Self::new(store, tree)
    }
}

impl<T: AuthenticatedTree> StateEngine<T> {
    /// Build an engine from its two collaborators.
    ///
    /// Comes up halted if the store carries a halt marker.
    pub fn new(store: AccountStore, tree: T) -> LedgerResult<Self> {
        let halted = store.halt_reason()?;
        if let Some(reason) = &halted {
            warn!(reason = %reason, "ledger opened in halted state");
        }
        Ok(Self {
            store,
            tree,
            halted,
        })
    }

    // -- Mutations ----------------------------------------------------------

    /// Create an account from a blank draft.
    ///
    /// The draft must have zero balance and zero nonce. Its index is ignored
    /// and replaced with the next free one.
    pub fn create_account(&mut self, draft: &Account) -> LedgerResult<AccountCreated> {
        self.ensure_running()?;
        if let Err(e) = self.check_draft(draft) {
            return Err(self.refuse("create_account", e));
        }

        let (index, account) = self.store.create_account(draft)?;

        let proof = self.after_persist("create_account", |tree| {
            let commitment = encoding::commitment(&account)?;
            let proof = tree.insert(index, commitment)?;
            proof.check_shape(tree.depth())?;
            Ok(proof)
        })?;

        info!(
            index,
            eth_addr = %account.eth_addr,
            root = %field::to_decimal(&proof.new_root),
            "account created"
        );
        Ok(AccountCreated { account, proof })
    }

    /// Credit `amount` to an account. Signed by the account's own key.
    pub fn deposit<S>(
        &mut self,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<BalanceChanged>
    where
        S: TransactionSigner + ?Sized,
    {
        self.change_balance(BalanceOp::Deposit, index, amount, signer)
    }

    /// Debit `amount` from an account. Signed by the account's own key.
    pub fn withdraw<S>(
        &mut self,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<BalanceChanged>
    where
        S: TransactionSigner + ?Sized,
    {
        self.change_balance(BalanceOp::Withdraw, index, amount, signer)
    }

    /// Move `amount` from `sender` to `receiver`, signed by the sender.
    ///
    /// Both records are persisted in one batch. The tree is updated for the
    /// sender first and the receiver second, so the two proofs chain.
    pub fn transfer<S>(
        &mut self,
        sender: AccountIndex,
        receiver: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<TransferApplied>
    where
        S: TransactionSigner + ?Sized,
    {
        self.ensure_running()?;
        let (debit, credit, signature) = match self.plan_transfer(sender, receiver, amount, signer)
        {
            Ok(plan) => plan,
            Err(e) => return Err(self.refuse("transfer", e)),
        };

        self.store
            .update_accounts(&[debit.after.clone(), credit.after.clone()])?;

        let (sender_proof, receiver_proof) = self.after_persist("transfer", |tree| {
            let sender_proof = update_leaf(tree, &debit)?;
            let receiver_proof = update_leaf(tree, &credit)?;
            if receiver_proof.old_root != sender_proof.new_root {
                return Err(LedgerError::InvariantViolation(
                    "receiver proof does not chain from sender proof".to_string(),
                ));
            }
            Ok((sender_proof, receiver_proof))
        })?;

        info!(
            sender,
            receiver,
            amount = %amount,
            root = %field::to_decimal(&receiver_proof.new_root),
            "transfer applied"
        );
        Ok(TransferApplied {
            sender_before: debit.before,
            sender_after: debit.after,
            receiver_before: credit.before,
            receiver_after: credit.after,
            amount: amount.clone(),
            sender_proof,
            receiver_proof,
            signature,
        })
    }

    // -- Halt control -------------------------------------------------------

    /// `true` once a post-persistence failure stopped the engine.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Why the engine halted, if it did.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Accept writes again after an operator has reconciled the store and
    /// the tree. Clears the persisted halt marker.
    pub fn resume(&mut self) -> LedgerResult<()> {
        self.store.clear_halt()?;
        if let Some(reason) = self.halted.take() {
            warn!(reason = %reason, "ledger resumed by operator");
        }
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Load an account.
    pub fn account(&self, index: AccountIndex) -> LedgerResult<Account> {
        self.store.get_account(index)
    }

    /// Current tree root.
    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    /// Tree depth the engine was opened with.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    /// Number of accounts created so far.
    pub fn account_count(&self) -> LedgerResult<u64> {
        self.store.account_count()
    }

    /// The account store, for read-only inspection.
    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Recompute an account's commitment and compare it with its leaf.
    ///
    /// Returns the commitment when they match. A mismatch is an
    /// `InvariantViolation` and halts the engine.
    pub fn verify_commitment(&mut self, index: AccountIndex) -> LedgerResult<Fr> {
        let checked = self
            .store
            .commitment(index)
            .and_then(|expected| self.check_leaf(index, expected).map(|()| expected));
        checked.map_err(|e| self.refuse("verify_commitment", e))
    }

    // -- Internals ----------------------------------------------------------

    fn ensure_running(&self) -> LedgerResult<()> {
        match &self.halted {
            Some(reason) => Err(LedgerError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Stop accepting writes, in memory and in the store.
    fn halt(&mut self, reason: String) {
        error!(reason = %reason, "halting ledger");
        if let Err(e) = self.store.set_halt(&reason) {
            error!(error = %e, "could not persist halt marker");
        }
        self.halted = Some(reason);
    }

    /// Log a failed request. Integrity errors also halt the engine.
    fn refuse(&mut self, op: &'static str, err: LedgerError) -> LedgerError {
        if err.is_fatal() {
            self.halt(format!("{op}: {err}"));
        } else {
            warn!(op, error = %err, "request rejected");
        }
        err
    }

    /// Run the tree half of a write. Any error here leaves the store ahead
    /// of the tree, so it halts the engine.
    fn after_persist<R>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut T) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        f(&mut self.tree).map_err(|e| {
            self.halt(format!("{op} failed after persistence: {e}"));
            e
        })
    }

    /// The leaf at `index` must hold `expected`.
    fn check_leaf(&self, index: AccountIndex, expected: Fr) -> LedgerResult<()> {
        match self.tree.get(index)? {
            Some(leaf) if leaf == expected => Ok(()),
            Some(_) => Err(LedgerError::InvariantViolation(format!(
                "leaf {index} does not match the stored account"
            ))),
            None => Err(LedgerError::InvariantViolation(format!(
                "account {index} has no tree leaf"
            ))),
        }
    }

    fn check_draft(&self, draft: &Account) -> LedgerResult<()> {
        if !draft.is_blank() {
            return Err(LedgerError::InvalidDraft(
                "new accounts start with zero balance and zero nonce".to_string(),
            ));
        }
        if !draft.public_key.is_on_curve() {
            return Err(LedgerError::InvalidDraft(
                "public key is not a Baby Jubjub point".to_string(),
            ));
        }
        let index = self.store.last_index()? + 1;
        let capacity = account_capacity(self.tree.depth());
        if index > capacity {
            return Err(LedgerError::CapacityExceeded { index, capacity });
        }
        if self.tree.get(index)?.is_some() {
            return Err(LedgerError::InvariantViolation(format!(
                "next index {index} already has a tree leaf"
            )));
        }
        Ok(())
    }

    fn change_balance<S>(
        &mut self,
        op: BalanceOp,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<BalanceChanged>
    where
        S: TransactionSigner + ?Sized,
    {
        self.ensure_running()?;
        let (plan, signature) = match self.plan_balance_change(op, index, amount, signer) {
            Ok(plan) => plan,
            Err(e) => return Err(self.refuse(op.as_str(), e)),
        };

        self.store.update_account(&plan.after)?;

        let proof = self.after_persist(op.as_str(), |tree| update_leaf(tree, &plan))?;

        info!(
            op = op.as_str(),
            index,
            amount = %amount,
            balance = %plan.after.balance,
            nonce = plan.after.nonce,
            root = %field::to_decimal(&proof.new_root),
            "balance changed"
        );
        Ok(BalanceChanged {
            op,
            before: plan.before,
            after: plan.after,
            amount: amount.clone(),
            proof,
            signature,
        })
    }

    fn plan_balance_change<S>(
        &self,
        op: BalanceOp,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<(Planned, Signature)>
    where
        S: TransactionSigner + ?Sized,
    {
        check_amount(amount)?;
        let before = self.store.get_account(index)?;
        let pre_commitment = encoding::commitment(&before)?;
        self.check_leaf(index, pre_commitment)?;
        let signature = authorize(&before, pre_commitment, amount, signer)?;

        let mut after = before.clone();
        match op {
            BalanceOp::Deposit => after.balance += amount,
            BalanceOp::Withdraw => {
                debit(&mut after, amount)?;
            }
        }
        after.nonce = bump_nonce(after.nonce)?;
        let post_commitment = encoding::commitment(&after)?;

        Ok((
            Planned {
                before,
                after,
                pre_commitment,
                post_commitment,
            },
            signature,
        ))
    }

    fn plan_transfer<S>(
        &self,
        sender: AccountIndex,
        receiver: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<(Planned, Planned, Signature)>
    where
        S: TransactionSigner + ?Sized,
    {
        if sender == receiver {
            return Err(LedgerError::SelfTransfer(sender));
        }
        check_amount(amount)?;

        let sender_before = self.store.get_account(sender)?;
        let receiver_before = self.store.get_account(receiver)?;

        let sender_pre = encoding::commitment(&sender_before)?;
        let receiver_pre = encoding::commitment(&receiver_before)?;
        self.check_leaf(sender, sender_pre)?;
        self.check_leaf(receiver, receiver_pre)?;
        let signature = authorize(&sender_before, sender_pre, amount, signer)?;

        let mut sender_after = sender_before.clone();
        debit(&mut sender_after, amount)?;
        sender_after.nonce = bump_nonce(sender_after.nonce)?;

        let mut receiver_after = receiver_before.clone();
        receiver_after.balance += amount;

        let debit_plan = Planned {
            post_commitment: encoding::commitment(&sender_after)?,
            before: sender_before,
            after: sender_after,
            pre_commitment: sender_pre,
        };
        let credit_plan = Planned {
            pre_commitment: receiver_pre,
            post_commitment: encoding::commitment(&receiver_after)?,
            before: receiver_before,
            after: receiver_after,
        };
        Ok((debit_plan, credit_plan, signature))
    }
}

/// Update one leaf and check the proof against the planned change.
fn update_leaf<T: AuthenticatedTree>(tree: &mut T, plan: &Planned) -> LedgerResult<TreeProof> {
    let index = plan.after.index;
    let proof = tree.update(index, plan.post_commitment)?;
    proof.check_shape(tree.depth())?;
    if proof.old_value != plan.pre_commitment {
        return Err(LedgerError::InvariantViolation(format!(
            "leaf {index} did not hold the commitment the signature covers"
        )));
    }
    Ok(proof)
}

fn check_amount(amount: &BigUint) -> LedgerResult<()> {
    if amount.is_zero() {
        return Err(LedgerError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }
    encoding::checked_field("amount", amount)?;
    Ok(())
}

fn debit(account: &mut Account, amount: &BigUint) -> LedgerResult<()> {
    if amount > &account.balance {
        return Err(LedgerError::InsufficientBalance {
            index: account.index,
            balance: account.balance.clone(),
            requested: amount.clone(),
        });
    }
    account.balance -= amount;
    Ok(())
}

fn bump_nonce(nonce: u64) -> LedgerResult<u64> {
    nonce
        .checked_add(1)
        .ok_or_else(|| LedgerError::FieldOverflow {
            what: "nonce",
            value: BigUint::from(nonce) + 1u32,
        })
}

/// Check the signer owns `account`, then have it sign the digest and
/// verify the result.
fn authorize<S>(
    account: &Account,
    pre_commitment: Fr,
    amount: &BigUint,
    signer: &S,
) -> LedgerResult<Signature>
where
    S: TransactionSigner + ?Sized,
{
    if signer.public_key() != account.public_key {
        return Err(LedgerError::UnauthorizedSigner(account.index));
    }
    let digest = encoding::transaction_digest(pre_commitment, amount)?;
    let signature = signer.sign(digest)?;
    if !verify_poseidon(&account.public_key, digest, &signature) {
        return Err(LedgerError::UnauthorizedSigner(account.index));
    }
    Ok(signature)
}

// ---------------------------------------------------------------------------
// SharedLedger
// ---------------------------------------------------------------------------

/// A clonable handle that serialises all access to one engine.
///
/// The mutex covers the whole read → mutate → persist → tree update
/// sequence, both accounts of a transfer included. There is one lock per
/// tree, so no lock ordering to get wrong.
#[derive(Debug)]
pub struct SharedLedger<T: AuthenticatedTree = SparseMerkleTree> {
    inner: Arc<Mutex<StateEngine<T>>>,
}

impl<T: AuthenticatedTree> Clone for SharedLedger<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: AuthenticatedTree> SharedLedger<T> {
    pub fn new(engine: StateEngine<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Exclusive access for a sequence of calls that must not interleave.
    pub fn lock(&self) -> MutexGuard<'_, StateEngine<T>> {
        self.inner.lock()
    }

    pub fn create_account(&self, draft: &Account) -> LedgerResult<AccountCreated> {
        self.inner.lock().create_account(draft)
    }

    pub fn deposit<S>(
        &self,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<BalanceChanged>
    where
        S: TransactionSigner + ?Sized,
    {
        self.inner.lock().deposit(index, amount, signer)
    }

    pub fn withdraw<S>(
        &self,
        index: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<BalanceChanged>
    where
        S: TransactionSigner + ?Sized,
    {
        self.inner.lock().withdraw(index, amount, signer)
    }

    pub fn transfer<S>(
        &self,
        sender: AccountIndex,
        receiver: AccountIndex,
        amount: &BigUint,
        signer: &S,
    ) -> LedgerResult<TransferApplied>
    where
        S: TransactionSigner + ?Sized,
    {
        self.inner.lock().transfer(sender, receiver, amount, signer)
    }

    pub fn account(&self, index: AccountIndex) -> LedgerResult<Account> {
        self.inner.lock().account(index)
    }

    pub fn root(&self) -> Fr {
        self.inner.lock().root()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
