//! Position queries and the fill routine shared by user orders and forced closes.

use super::core::Engine;
use super::results::EngineError;
use crate::config::LedgerConfig;
use crate::events::{
    CloseReason, ConditionalCancelledEvent, EventPayload, PositionClosedEvent, PositionOpenedEvent,
    PositionUpdatedEvent,
};
use crate::position::{increase_position, reduce_position, taker_fee, ClosedPosition, Position};
use crate::store::{AccountBook, AccountStore};
use crate::types::{AccountId, Price, Quote, Side, Symbol, Timestamp};
use rust_decimal::Decimal;

impl<S: AccountStore> Engine<S> {
    /// Open positions for an account, ordered by symbol.
    pub fn get_positions(&self, account_id: AccountId) -> Result<Vec<Position>, EngineError> {
        let book = self.store.snapshot(account_id)?;
        Ok(book.positions.into_values().collect())
    }

    pub fn get_position(&self, account_id: AccountId, symbol: &Symbol) -> Result<Option<Position>, EngineError> {
        let symbol = self.oracle.canonical(symbol.as_str());
        let mut book = self.store.snapshot(account_id)?;
        Ok(book.positions.remove(&symbol))
    }
}

pub(super) struct FillOutcome {
    pub position: Option<Position>,
    pub fee: Quote,
    /// Signed balance change from this fill.
    pub realized_pnl: Quote,
    pub closed: Option<ClosedPosition>,
}

/// Applies one fill of `size` in direction `side` to the position for `symbol` and
/// books the balance change. The caller has already validated size, price and
/// reduce-only constraints.
#[allow(clippy::too_many_arguments)]
pub(super) fn apply_fill(
    book: &mut AccountBook,
    symbol: &Symbol,
    side: Side,
    size: Decimal,
    price: Price,
    ledger: &LedgerConfig,
    close_reason: CloseReason,
    now: Timestamp,
    events: &mut Vec<EventPayload>,
) -> FillOutcome {
    let account_id = book.account.id;
    let existing = book.positions.get(symbol).cloned();

    let outcome = match existing {
        None => open_leg(book, symbol, side, size, price, ledger, now, events),

        Some(position) if position.side() == Some(side) => {
            let fee = taker_fee(size, price, ledger.taker_fee_rate);
            let updated = increase_position(&position, size, price, fee, now);

            events.push(EventPayload::PositionUpdated(PositionUpdatedEvent {
                account_id,
                symbol: symbol.clone(),
                old_size: position.size,
                new_size: updated.size,
                old_entry_price: position.avg_entry_price,
                new_entry_price: updated.avg_entry_price,
                realized_pnl: fee.negate(),
            }));
            book.positions.insert(symbol.clone(), updated.clone());

            FillOutcome {
                position: Some(updated),
                fee,
                realized_pnl: fee.negate(),
                closed: None,
            }
        }

        Some(position) => {
            let held = position.size.abs();
            if size - held <= ledger.dust_size {
                // reduce or exact close
                let close_size = size.min(held);
                let fee = taker_fee(close_size, price, ledger.taker_fee_rate);
                let update = reduce_position(&position, close_size, price, fee, ledger.dust_size, now);

                match &update.new_position {
                    Some(remaining) => {
                        events.push(EventPayload::PositionUpdated(PositionUpdatedEvent {
                            account_id,
                            symbol: symbol.clone(),
                            old_size: position.size,
                            new_size: remaining.size,
                            old_entry_price: position.avg_entry_price,
                            new_entry_price: remaining.avg_entry_price,
                            realized_pnl: update.realized_pnl,
                        }));
                        book.positions.insert(symbol.clone(), remaining.clone());
                    }
                    None => {
                        remove_flat(book, symbol, &position, price, update.realized_pnl, update.margin_released, close_reason, events);
                    }
                }

                FillOutcome {
                    position: update.new_position,
                    fee,
                    realized_pnl: update.realized_pnl,
                    closed: update.closed,
                }
            } else {
                // flip: flatten the held leg, open the remainder the other way
                let close_fee = taker_fee(held, price, ledger.taker_fee_rate);
                let update = reduce_position(&position, held, price, close_fee, ledger.dust_size, now);
                remove_flat(book, symbol, &position, price, update.realized_pnl, update.margin_released, CloseReason::Flipped, events);

                let opened = open_leg(book, symbol, side, size - held, price, ledger, now, events);

                FillOutcome {
                    position: opened.position,
                    fee: close_fee.add(opened.fee),
                    realized_pnl: update.realized_pnl.add(opened.realized_pnl),
                    closed: update.closed,
                }
            }
        }
    };

    book.account.apply_balance_delta(outcome.realized_pnl);
    outcome
}

#[allow(clippy::too_many_arguments)]
fn open_leg(
    book: &mut AccountBook,
    symbol: &Symbol,
    side: Side,
    size: Decimal,
    price: Price,
    ledger: &LedgerConfig,
    now: Timestamp,
    events: &mut Vec<EventPayload>,
) -> FillOutcome {
    let fee = taker_fee(size, price, ledger.taker_fee_rate);
    let position = Position::open(symbol.clone(), side, size, price, book.account.leverage, fee, now);

    events.push(EventPayload::PositionOpened(PositionOpenedEvent {
        account_id: book.account.id,
        symbol: symbol.clone(),
        side,
        size,
        entry_price: price,
        margin_used: position.margin_used,
        leverage: position.leverage.value(),
    }));
    book.positions.insert(symbol.clone(), position.clone());

    FillOutcome {
        position: Some(position),
        fee,
        realized_pnl: fee.negate(),
        closed: None,
    }
}

// flat positions are deleted along with the conditional orders protecting them
#[allow(clippy::too_many_arguments)]
fn remove_flat(
    book: &mut AccountBook,
    symbol: &Symbol,
    position: &Position,
    exit_price: Price,
    realized_pnl: Quote,
    margin_released: Quote,
    close_reason: CloseReason,
    events: &mut Vec<EventPayload>,
) {
    let account_id = book.account.id;
    book.positions.remove(symbol);

    events.push(EventPayload::PositionClosed(PositionClosedEvent {
        account_id,
        symbol: symbol.clone(),
        side: position.side().unwrap_or(Side::Long),
        exit_price,
        realized_pnl,
        margin_released,
        close_reason,
    }));

    let cancelled = book.cancel_conditionals(symbol);
    if cancelled > 0 {
        events.push(EventPayload::ConditionalCancelled(ConditionalCancelledEvent {
            account_id,
            symbol: symbol.clone(),
            count: cancelled,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountKind, AccountStatus, DrawdownRule};
    use crate::types::{Leverage, UserId};
    use rust_decimal_macros::dec;

    fn book() -> AccountBook {
        AccountBook::new(Account {
            id: AccountId(1),
            owner: UserId::new("u"),
            kind: AccountKind::Evaluation,
            created_at: Timestamp::from_millis(0),
            size_base: Quote::new(dec!(10000)),
            virtual_balance: Quote::new(dec!(10000)),
            high_water_mark: Quote::new(dec!(10000)),
            leverage: Leverage::new(dec!(10)).unwrap(),
            max_drawdown: DrawdownRule::Absolute(Quote::new(dec!(1000))),
            daily_loss: Quote::zero(),
            num_checkpoints: 1,
            checkpoint_interval_hours: 24,
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

    fn ledger() -> LedgerConfig {
        LedgerConfig {
            taker_fee_rate: dec!(0.001),
            dust_size: dec!(0.00000001),
            ..LedgerConfig::default()
        }
    }

    fn fill(book: &mut AccountBook, side: Side, size: Decimal, price: Decimal) -> FillOutcome {
        let mut events = Vec::new();
        apply_fill(
            book,
            &Symbol::new("BTC"),
            side,
            size,
            Price::new_unchecked(price),
            &ledger(),
            CloseReason::UserClosed,
            Timestamp::from_millis(1),
            &mut events,
        )
    }

    #[test]
    fn open_then_flip() {
        let mut book = book();
        let opened = fill(&mut book, Side::Long, dec!(1), dec!(100));
        assert_eq!(opened.realized_pnl.value(), dec!(-0.1));

        let flipped = fill(&mut book, Side::Short, dec!(1.5), dec!(110));
        // 10 gross, fees 0.11 + 0.055
        assert_eq!(flipped.realized_pnl.value(), dec!(9.835));
        assert_eq!(flipped.fee.value(), dec!(0.165));

        let short = flipped.position.unwrap();
        assert_eq!(short.size.value(), dec!(-0.5));
        assert_eq!(short.avg_entry_price.value(), dec!(110));
        assert_eq!(flipped.closed.unwrap().side, Side::Long);

        assert_eq!(book.account.virtual_balance.value(), dec!(10000) - dec!(0.1) + dec!(9.835));
    }

    #[test]
    fn round_trip_costs_two_fees() {
        let mut book = book();
        fill(&mut book, Side::Short, dec!(2), dec!(50));
        let closed = fill(&mut book, Side::Long, dec!(2), dec!(50));

        assert!(book.positions.is_empty());
        assert_eq!(closed.closed.unwrap().realized_pnl.value(), dec!(-0.2));
        assert_eq!(book.account.virtual_balance.value(), dec!(9999.8));
    }
}
