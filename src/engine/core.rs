// 8.0 engine/core.rs: main engine. owns the store, the oracle, the clock and the audit log.
// every public method takes &self; per-account serialization is the store's job.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::account::{Account, AccountParams};
use crate::checkpoint::Checkpoint;
use crate::clock::Clock;
use crate::config::PlatformConfig;
use crate::events::{AccountOpenedEvent, Event, EventLog, EventPayload, PriceOffsetChangedEvent};
use crate::lifecycle::build_evaluation_account;
use crate::price_feed::{OracleError, PriceOracle, PriceQuote};
use crate::store::{AccountBook, AccountStore};
use crate::types::{AccountId, Price, Symbol, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/** 8.1: main engine struct */
pub struct Engine<S: AccountStore> {
    pub(super) store: S,
    pub(super) oracle: PriceOracle,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    pub(super) events: Mutex<EventLog>,
}

impl<S: AccountStore> Engine<S> {
    pub fn new(store: S, oracle: PriceOracle, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let events = Mutex::new(EventLog::new(config.max_events));
        Self {
            store,
            oracle,
            clock,
            config,
            events,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.config.platform
    }

    /// Entry point for the purchase flow: a fresh evaluation account.
    pub fn open_account(&self, params: AccountParams) -> Result<Account, EngineError> {
        let now = self.now();
        let id = self.store.next_account_id();
        let account = build_evaluation_account(id, params, &self.config.platform.evaluation, now)?;

        self.store.insert(AccountBook::new(account.clone()))?;

        tracing::info!(
            account_id = %id,
            size = %account.size_base,
            checkpoints = account.num_checkpoints,
            "evaluation account opened"
        );
        self.record(
            now,
            vec![EventPayload::AccountOpened(AccountOpenedEvent {
                account_id: id,
                size_base: account.size_base,
                num_checkpoints: account.num_checkpoints,
            })],
        );

        Ok(account)
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        Ok(self.store.snapshot(account_id)?.account)
    }

    pub fn get_checkpoints(&self, account_id: AccountId) -> Result<Vec<Checkpoint>, EngineError> {
        let mut checkpoints = self.store.snapshot(account_id)?.checkpoints;
        checkpoints.sort_by_key(|c| c.checkpoint_number);
        Ok(checkpoints)
    }

    pub fn price_offset(&self) -> Result<Decimal, EngineError> {
        Ok(self.store.price_offset()?)
    }

    /// Admin surface: shift every price the engine resolves by `offset`.
    pub fn set_price_offset(&self, offset: Decimal) -> Result<(), EngineError> {
        let old_offset = self.store.price_offset()?;
        self.store.set_price_offset(offset)?;

        tracing::info!(%old_offset, new_offset = %offset, "price offset changed");
        self.record(
            self.now(),
            vec![EventPayload::PriceOffsetChanged(PriceOffsetChangedEvent {
                old_offset,
                new_offset: offset,
            })],
        );
        Ok(())
    }

    /// Effective price for `symbol`: first healthy source plus the persisted offset.
    /// Every consumer in the engine goes through here.
    pub fn get_price(&self, symbol: &Symbol) -> Result<PriceQuote, EngineError> {
        let offset = self.store.price_offset()?;
        self.oracle.quote(symbol, offset, self.now()).map_err(|err| {
            let symbol = self.oracle.canonical(symbol.as_str());
            if let OracleError::NonPositive { offset, .. } = &err {
                tracing::warn!(%symbol, %offset, "offset pushes price non-positive");
            }
            EngineError::OracleUnavailable { symbol }
        })
    }

    /// One price per symbol, fetched before any account lock is taken.
    /// Symbols that can't be priced are left out and returned separately.
    pub(super) fn price_snapshot<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a Symbol>,
    ) -> (BTreeMap<Symbol, Price>, Vec<Symbol>) {
        let unique: BTreeSet<&Symbol> = symbols.into_iter().collect();
        let mut prices = BTreeMap::new();
        let mut unpriced = Vec::new();

        for symbol in unique {
            match self.get_price(symbol) {
                Ok(quote) => {
                    prices.insert(symbol.clone(), quote.price);
                }
                Err(err) => {
                    tracing::warn!(%symbol, error = %err, "skipping symbol this cycle");
                    unpriced.push(symbol.clone());
                }
            }
        }

        (prices, unpriced)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.lock().recent(count)
    }

    pub fn events_for(&self, account_id: AccountId) -> Vec<Event> {
        self.events
            .lock()
            .events()
            .into_iter()
            .filter(|e| e.payload.account_id() == Some(account_id))
            .collect()
    }

    /// Append events produced by a committed operation.
    pub(super) fn record(&self, timestamp: Timestamp, payloads: Vec<EventPayload>) {
        if payloads.is_empty() {
            return;
        }
        let mut log = self.events.lock();
        for payload in payloads {
            log.record(timestamp, payload);
        }
    }
}

impl<S: AccountStore + std::fmt::Debug> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("oracle", &self.oracle)
            .field("config", &self.config)
            .finish()
    }
}
