//! Transactional record store.
//!
//! The engine treats persistence as a collaborator: anything that can hand out
//! an account's records under a per-account lock and commit them atomically
//! works. `MemoryStore` is the in-process implementation used by the
//! simulator and the tests.

use crate::account::Account;
use crate::checkpoint::Checkpoint;
use crate::conditional::{ConditionalOrder, ConditionalOrderId};
use crate::position::Position;
use crate::types::{AccountId, Symbol};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything owned by one account. The unit of locking and of atomic commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBook {
    pub account: Account,
    pub positions: BTreeMap<Symbol, Position>,
    pub conditional_orders: Vec<ConditionalOrder>,
    pub checkpoints: Vec<Checkpoint>,
    next_conditional_id: u64,
}

impl AccountBook {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            positions: BTreeMap::new(),
            conditional_orders: Vec::new(),
            checkpoints: Vec::new(),
            next_conditional_id: 1,
        }
    }

    pub fn next_conditional_id(&mut self) -> ConditionalOrderId {
        let id = ConditionalOrderId(self.next_conditional_id);
        self.next_conditional_id += 1;
        id
    }

    pub fn cancel_conditionals(&mut self, symbol: &Symbol) -> usize {
        let before = self.conditional_orders.len();
        self.conditional_orders.retain(|o| &o.symbol != symbol);
        before - self.conditional_orders.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Account {0:?} not found")]
    NotFound(AccountId),

    #[error("Account {0:?} already exists")]
    Duplicate(AccountId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait AccountStore: Send + Sync {
    fn next_account_id(&self) -> AccountId;

    fn insert(&self, book: AccountBook) -> Result<(), StoreError>;

    /// Read-only copy of an account's records.
    fn snapshot(&self, id: AccountId) -> Result<AccountBook, StoreError>;

    /// Run `f` against the account's records while holding the account lock.
    /// Changes are committed only if `f` returns `Ok`; on `Err` nothing is written.
    fn transact<T, E, F>(&self, id: AccountId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut AccountBook) -> Result<T, E>,
        E: From<StoreError>;

    fn account_ids(&self) -> Vec<AccountId>;

    /// Persisted manual price offset. Zero until an operator sets it.
    fn price_offset(&self) -> Result<Decimal, StoreError>;

    fn set_price_offset(&self, offset: Decimal) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    books: DashMap<AccountId, Arc<Mutex<AccountBook>>>,
    price_offset: RwLock<Decimal>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: AccountId) -> Result<Arc<Mutex<AccountBook>>, StoreError> {
        // clone the Arc out so the map shard lock is released before the account lock is taken
        self.books
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::NotFound(id))
    }
}

impl AccountStore for MemoryStore {
    fn next_account_id(&self) -> AccountId {
        AccountId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, book: AccountBook) -> Result<(), StoreError> {
        let id = book.account.id;
        match self.books.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Duplicate(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(book)));
                Ok(())
            }
        }
    }

    fn snapshot(&self, id: AccountId) -> Result<AccountBook, StoreError> {
        let slot = self.slot(id)?;
        let book = slot.lock().clone();
        Ok(book)
    }

    fn transact<T, E, F>(&self, id: AccountId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut AccountBook) -> Result<T, E>,
        E: From<StoreError>,
    {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }

    fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.books.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    fn price_offset(&self) -> Result<Decimal, StoreError> {
        Ok(*self.price_offset.read())
    }

    fn set_price_offset(&self, offset: Decimal) -> Result<(), StoreError> {
        *self.price_offset.write() = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountKind, AccountStatus, DrawdownRule};
    use crate::types::{Leverage, Quote, Timestamp, UserId};
    use rust_decimal_macros::dec;

    fn book(id: u64) -> AccountBook {
        AccountBook::new(Account {
            id: AccountId(id),
            owner: UserId::new("u"),
            kind: AccountKind::Evaluation,
            created_at: Timestamp::from_millis(0),
            size_base: Quote::new(dec!(1000)),
            virtual_balance: Quote::new(dec!(1000)),
            high_water_mark: Quote::new(dec!(1000)),
            leverage: Leverage::new(dec!(10)).unwrap(),
            max_drawdown: DrawdownRule::Absolute(Quote::new(dec!(100))),
            daily_loss: Quote::zero(),
            num_checkpoints: 1,
            checkpoint_interval_hours: 1,
            profit_target_percent: dec!(8),
            current_checkpoint: 1,
            status: AccountStatus::Active,
            failure_reason: None,
            status_changed_at: None,
            margin_requirement: None,
            maintenance_margin: None,
            source_account: None,
            funded_account: None,
        })
    }

    #[test]
    fn transact_commits_on_ok() {
        let store = MemoryStore::new();
        store.insert(book(1)).unwrap();

        store
            .transact(AccountId(1), |b| -> Result<(), StoreError> {
                b.account.virtual_balance = Quote::new(dec!(1100));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.snapshot(AccountId(1)).unwrap().account.virtual_balance.value(), dec!(1100));
    }

    #[test]
    fn transact_discards_on_err() {
        let store = MemoryStore::new();
        store.insert(book(1)).unwrap();

        let result = store.transact(AccountId(1), |b| -> Result<(), StoreError> {
            b.account.virtual_balance = Quote::new(dec!(1));
            Err(StoreError::Unavailable("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.snapshot(AccountId(1)).unwrap().account.virtual_balance.value(), dec!(1000));
    }

    #[test]
    fn duplicate_and_missing_accounts() {
        let store = MemoryStore::new();
        store.insert(book(1)).unwrap();
        assert_eq!(store.insert(book(1)), Err(StoreError::Duplicate(AccountId(1))));
        assert!(matches!(store.snapshot(AccountId(2)), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn price_offset_defaults_to_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.price_offset().unwrap(), Decimal::ZERO);
        store.set_price_offset(dec!(-250)).unwrap();
        assert_eq!(store.price_offset().unwrap(), dec!(-250));
    }

    #[test]
    fn ids_are_sequential() {
        let store = MemoryStore::new();
        assert_eq!(store.next_account_id(), AccountId(1));
        assert_eq!(store.next_account_id(), AccountId(2));
    }
}
