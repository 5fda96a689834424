//! # Account Store
//!
//! Owns account records. Nothing else in the crate writes to the `state`
//! tree.
//!
//! ## Key layout
//!
//! Indices are encoded as unsigned LEB128 varints inside a fixed 8-byte
//! slot (zero padded):
//!
//! ```text
//! "l"                     -> varint(last_index)        8 bytes
//! "h"                     -> utf8(halt reason)         only while halted
//! 'a' ++ varint(index)    -> json(Account)             9-byte key
//! ```
//!
//! The counter and the record of a new account are written in one atomic
//! batch, so the counter never points past a record that does not exist.

use ark_bn254::Fr;
use num_bigint::BigUint;
use sled::{Batch, Tree};
use tracing::debug;

use crate::config::{INDEX_SLOT_WIDTH, KEY_HALT, KEY_LATEST_INDEX, PREFIX_ACCOUNT};
use crate::error::{LedgerError, LedgerResult};
use crate::state::account::{Account, AccountIndex};
use crate::state::encoding;

use super::db::LedgerDb;

// ---------------------------------------------------------------------------
// Index encoding
// ---------------------------------------------------------------------------

/// Encode `index` as an unsigned LEB128 varint in a zero-padded slot.
pub(crate) fn encode_index(index: AccountIndex) -> LedgerResult<[u8; INDEX_SLOT_WIDTH]> {
    let mut slot = [0u8; INDEX_SLOT_WIDTH];
    let mut value = index;
    let mut i = 0;
    loop {
        if i == INDEX_SLOT_WIDTH {
            return Err(LedgerError::InvariantViolation(format!(
                "index {index} does not fit in a {INDEX_SLOT_WIDTH}-byte varint slot"
            )));
        }
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            slot[i] = byte;
            return Ok(slot);
        }
        slot[i] = byte | 0x80;
        i += 1;
    }
}

/// Decode a varint written by [`encode_index`]. Trailing padding is ignored.
pub(crate) fn decode_index(bytes: &[u8]) -> LedgerResult<AccountIndex> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(INDEX_SLOT_WIDTH) {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(LedgerError::Serialization(
        "unterminated varint in index slot".to_string(),
    ))
}

/// Storage key of an account record.
pub(crate) fn account_key(index: AccountIndex) -> LedgerResult<[u8; 1 + INDEX_SLOT_WIDTH]> {
    let mut key = [0u8; 1 + INDEX_SLOT_WIDTH];
    key[0] = PREFIX_ACCOUNT;
    key[1..].copy_from_slice(&encode_index(index)?);
    Ok(key)
}

// ---------------------------------------------------------------------------
// AccountStore
// ---------------------------------------------------------------------------

/// Persistent, index-addressed account records.
#[derive(Debug, Clone)]
pub struct AccountStore {
    tree: Tree,
}

impl AccountStore {
    /// Bind the store to a database's account tree.
    pub fn new(db: &LedgerDb) -> Self {
        Self {
            tree: db.accounts_tree().clone(),
        }
    }

    /// Last assigned index, or `0` if no account was ever created.
    pub fn last_index(&self) -> LedgerResult<AccountIndex> {
        match self.tree.get(KEY_LATEST_INDEX)? {
            Some(bytes) => decode_index(&bytes),
            None => Ok(0),
        }
    }

    /// Persist a new account under the next index.
    ///
    /// Whatever index the draft carries is replaced. Returns the assigned
    /// index and the stored record.
    pub fn create_account(&self, draft: &Account) -> LedgerResult<(AccountIndex, Account)> {
        let index = self.last_index()? + 1;
        let mut account = draft.clone();
        account.index = index;

        let mut batch = Batch::default();
        batch.insert(&account_key(index)?[..], serde_json::to_vec(&account)?);
        batch.insert(KEY_LATEST_INDEX, &encode_index(index)?[..]);
        self.tree.apply_batch(batch)?;

        debug!(index, "account record created");
        Ok((index, account))
    }

    /// Load an account. `NotFound` if the index was never assigned.
    pub fn get_account(&self, index: AccountIndex) -> LedgerResult<Account> {
        match self.tree.get(account_key(index)?)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(LedgerError::NotFound(format!("account {index}"))),
        }
    }

    /// Overwrite an existing account record.
    pub fn update_account(&self, account: &Account) -> LedgerResult<()> {
        self.update_accounts(std::slice::from_ref(account))
    }

    /// Overwrite several existing records in one atomic batch.
    ///
    /// Every index must already exist; if one does not, nothing is written.
    pub fn update_accounts(&self, accounts: &[Account]) -> LedgerResult<()> {
        let mut batch = Batch::default();
        for account in accounts {
            let key = account_key(account.index)?;
            if !self.tree.contains_key(key)? {
                return Err(LedgerError::NotFound(format!("account {}", account.index)));
            }
            batch.insert(&key[..], serde_json::to_vec(account)?);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    /// Number of accounts created so far.
    pub fn account_count(&self) -> LedgerResult<u64> {
        self.last_index()
    }

    /// Leaf commitment of a stored account.
    pub fn commitment(&self, index: AccountIndex) -> LedgerResult<Fr> {
        encoding::commitment(&self.get_account(index)?)
    }

    // -- Halt marker --------------------------------------------------------

    /// The recorded halt reason, if the ledger is halted.
    pub fn halt_reason(&self) -> LedgerResult<Option<String>> {
        Ok(self
            .tree
            .get(KEY_HALT)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Record a halt. Flushed before returning so it survives a crash.
    pub fn set_halt(&self, reason: &str) -> LedgerResult<()> {
        self.tree.insert(KEY_HALT, reason.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    /// Remove the halt marker.
    pub fn clear_halt(&self) -> LedgerResult<()> {
        self.tree.remove(KEY_HALT)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Sum of all balances. Used by consistency checks and the CLI.
    pub fn total_balance(&self) -> LedgerResult<BigUint> {
        let mut total = BigUint::default();
        for index in 1..=self.last_index()? {
            total += self.get_account(index)?.balance;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;
    use crate::state::account::EthAddress;

    fn store() -> AccountStore {
        AccountStore::new(&LedgerDb::open_temporary().unwrap())
    }

    fn draft(seed: u8) -> Account {
        let key = PrivateKey::from_bytes([seed; 32]);
        Account::new(EthAddress([seed; 20]), key.public_key())
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(encode_index(0).unwrap(), [0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_index(1).unwrap(), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_index(127).unwrap(), [0x7F, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_index(128).unwrap(), [0x80, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_index(300).unwrap(), [0xAC, 0x02, 0, 0, 0, 0, 0, 0]);

        for index in [0u64, 1, 127, 128, 300, 1 << 31, (1 << 56) - 1] {
            assert_eq!(decode_index(&encode_index(index).unwrap()).unwrap(), index);
        }
    }

    #[test]
    fn varint_slot_overflow_is_an_error() {
        assert!(encode_index(1 << 56).is_err());
        assert!(decode_index(&[0xFF; 8]).is_err());
    }

    #[test]
    fn account_key_layout() {
        let key = account_key(2).unwrap();
        assert_eq!(key.len(), 9);
        assert_eq!(key[0], b'a');
        assert_eq!(key[1], 2);
    }

    #[test]
    fn empty_store() {
        let store = store();
        assert_eq!(store.last_index().unwrap(), 0);
        assert_eq!(store.account_count().unwrap(), 0);
        assert!(matches!(store.get_account(1), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn indices_are_sequential_from_one() {
        let store = store();
        for expected in 1..=5u64 {
            let (index, account) = store.create_account(&draft(expected as u8)).unwrap();
            assert_eq!(index, expected);
            assert_eq!(account.index, expected);
        }
        assert_eq!(store.last_index().unwrap(), 5);
        assert_eq!(store.get_account(3).unwrap().eth_addr, EthAddress([3; 20]));
    }

    #[test]
    fn draft_index_is_ignored() {
        let store = store();
        let mut d = draft(1);
        d.index = 42;
        let (index, _) = store.create_account(&d).unwrap();
        assert_eq!(index, 1);
        assert!(store.get_account(42).is_err());
    }

    #[test]
    fn update_existing_account() {
        let store = store();
        let (_, mut account) = store.create_account(&draft(1)).unwrap();
        account.balance = BigUint::from(500u32);
        account.nonce = 1;
        store.update_account(&account).unwrap();
        assert_eq!(store.get_account(1).unwrap(), account);
    }

    #[test]
    fn update_missing_account_fails() {
        let store = store();
        let mut account = draft(1);
        account.index = 7;
        assert!(matches!(
            store.update_account(&account),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn batch_update_is_all_or_nothing() {
        let store = store();
        let (_, mut a) = store.create_account(&draft(1)).unwrap();
        a.balance = BigUint::from(10u32);
        let mut ghost = draft(2);
        ghost.index = 9;

        assert!(store.update_accounts(&[a.clone(), ghost]).is_err());
        assert_eq!(store.get_account(1).unwrap().balance, BigUint::default());

        let (_, mut b) = store.create_account(&draft(2)).unwrap();
        b.balance = BigUint::from(5u32);
        store.update_accounts(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(store.total_balance().unwrap(), BigUint::from(15u32));
    }

    #[test]
    fn commitment_matches_encoder() {
        let store = store();
        let (index, account) = store.create_account(&draft(1)).unwrap();
        assert_eq!(
            store.commitment(index).unwrap(),
            encoding::commitment(&account).unwrap()
        );
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            let store = AccountStore::new(&db);
            store.create_account(&draft(1)).unwrap();
            store.create_account(&draft(2)).unwrap();
            db.flush().unwrap();
        }
        let db = LedgerDb::open(dir.path()).unwrap();
        let store = AccountStore::new(&db);
        assert_eq!(store.last_index().unwrap(), 2);
        assert_eq!(store.get_account(2).unwrap().eth_addr, EthAddress([2; 20]));
    }

    #[test]
    fn halt_marker_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            let store = AccountStore::new(&db);
            assert_eq!(store.halt_reason().unwrap(), None);
            store.set_halt("deposit failed after persistence").unwrap();
        }
        let db = LedgerDb::open(dir.path()).unwrap();
        let store = AccountStore::new(&db);
        assert_eq!(
            store.halt_reason().unwrap().as_deref(),
            Some("deposit failed after persistence")
        );
        store.clear_halt().unwrap();
        assert_eq!(store.halt_reason().unwrap(), None);
        assert_eq!(store.last_index().unwrap(), 0);
    }
}
