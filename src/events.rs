// 11.0: every state change produces an event. used for the audit trail and for
// manual follow-up (a ProvisioningFailed event is the operator's work queue).
// events are only recorded after the account transaction that produced them commits.

use crate::account::{AccountStatus, FailureReason};
use crate::types::{AccountId, Price, Quote, Side, SignedSize, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Ledger events
    OrderApplied(OrderAppliedEvent),
    PositionOpened(PositionOpenedEvent),
    PositionUpdated(PositionUpdatedEvent),
    PositionClosed(PositionClosedEvent),
    ConditionalPlaced(ConditionalPlacedEvent),
    ConditionalCancelled(ConditionalCancelledEvent),

    // Risk events
    ForcedClose(ForcedCloseEvent),

    // Evaluation events
    CheckpointEvaluated(CheckpointEvaluatedEvent),
    AccountTransitioned(AccountTransitionedEvent),

    // Lifecycle events
    AccountOpened(AccountOpenedEvent),
    FundedAccountProvisioned(FundedAccountProvisionedEvent),
    ProvisioningFailed(ProvisioningFailedEvent),

    // Admin events
    PriceOffsetChanged(PriceOffsetChangedEvent),
}

impl EventPayload {
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            EventPayload::OrderApplied(e) => Some(e.account_id),
            EventPayload::PositionOpened(e) => Some(e.account_id),
            EventPayload::PositionUpdated(e) => Some(e.account_id),
            EventPayload::PositionClosed(e) => Some(e.account_id),
            EventPayload::ConditionalPlaced(e) => Some(e.account_id),
            EventPayload::ConditionalCancelled(e) => Some(e.account_id),
            EventPayload::ForcedClose(e) => Some(e.account_id),
            EventPayload::CheckpointEvaluated(e) => Some(e.account_id),
            EventPayload::AccountTransitioned(e) => Some(e.account_id),
            EventPayload::AccountOpened(e) => Some(e.account_id),
            EventPayload::FundedAccountProvisioned(e) => Some(e.evaluation_account),
            EventPayload::ProvisioningFailed(e) => Some(e.evaluation_account),
            EventPayload::PriceOffsetChanged(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAppliedEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub size: Decimal,
    pub fill_price: Price,
    pub fee: Quote,
    pub realized_pnl: Quote,
    pub new_balance: Quote,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Price,
    pub margin_used: Quote,
    pub leverage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub old_size: SignedSize,
    pub new_size: SignedSize,
    pub old_entry_price: Price,
    pub new_entry_price: Price,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub exit_price: Price,
    pub realized_pnl: Quote,
    pub margin_released: Quote,
    pub close_reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    UserClosed,
    Flipped,
    TakeProfit,
    StopLoss,
    AutoClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalPlacedEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalCancelledEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedCloseEvent {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub reason: CloseReason,
    pub mark_price: Price,
    pub pnl_ratio: Decimal,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEvaluatedEvent {
    pub account_id: AccountId,
    pub checkpoint_number: u32,
    pub required_balance: Quote,
    pub checkpoint_balance: Quote,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTransitionedEvent {
    pub account_id: AccountId,
    pub from: AccountStatus,
    pub to: AccountStatus,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOpenedEvent {
    pub account_id: AccountId,
    pub size_base: Quote,
    pub num_checkpoints: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedAccountProvisionedEvent {
    pub evaluation_account: AccountId,
    pub funded_account: AccountId,
    pub notional: Quote,
    pub margin_requirement: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningFailedEvent {
    pub evaluation_account: AccountId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOffsetChangedEvent {
    pub old_offset: Decimal,
    pub new_offset: Decimal,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

/// Bounded in-memory audit log. Oldest events are dropped past `capacity`.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = self.next_id();
        self.emit(Event::new(id, timestamp, payload));
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl EventEmitter for EventLog {
    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn offset_changed(n: i64) -> EventPayload {
        EventPayload::PriceOffsetChanged(PriceOffsetChangedEvent {
            old_offset: Decimal::ZERO,
            new_offset: Decimal::from(n),
        })
    }

    #[test]
    fn event_log_records_in_order() {
        let mut log = EventLog::new(10);
        let first = log.record(Timestamp::from_millis(1000), offset_changed(1));
        let second = log.record(Timestamp::from_millis(1001), offset_changed(2));

        assert!(first < second);
        assert_eq!(log.len(), 2);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn event_log_is_bounded() {
        let mut log = EventLog::new(3);
        for n in 0..5 {
            log.record(Timestamp::from_millis(n), offset_changed(n));
        }

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, EventId(3));
        assert_eq!(log.recent(1)[0].id, EventId(5));
    }

    #[test]
    fn payload_knows_its_account() {
        let forced = EventPayload::ForcedClose(ForcedCloseEvent {
            account_id: AccountId(42),
            symbol: Symbol::new("BTC"),
            reason: CloseReason::AutoClose,
            mark_price: Price::new_unchecked(dec!(47500)),
            pnl_ratio: dec!(-0.06),
            realized_pnl: Quote::new(dec!(-6.5)),
        });

        assert_eq!(forced.account_id(), Some(AccountId(42)));
        assert_eq!(offset_changed(1).account_id(), None);
    }
}
