//! Order placement against the position ledger.
//!
//! Orders fill immediately: there is no book and no counterparty. Limit orders
//! fill at the caller's price, market orders at the oracle's, and either price
//! is resolved before the account lock is taken.

use super::core::Engine;
use super::positions::apply_fill;
use super::results::{EngineError, OrderRequest, OrderResult, OrderType};
use crate::conditional::{validate_bracket, ConditionalOrder};
use crate::config::LedgerConfig;
use crate::events::{CloseReason, ConditionalCancelledEvent, ConditionalPlacedEvent, EventPayload, OrderAppliedEvent};
use crate::store::{AccountBook, AccountStore};
use crate::types::{Price, Symbol, Timestamp};
use rust_decimal::Decimal;

fn positive_price(value: Decimal, what: &str) -> Result<Price, EngineError> {
    Price::new(value).ok_or_else(|| EngineError::invalid_order(format!("{what} must be positive, got {value}")))
}

/// `size × price`, rejected when it overflows or exceeds the ledger cap.
fn checked_notional(size: Decimal, price: Price, ledger: &LedgerConfig) -> Result<Decimal, EngineError> {
    size.checked_mul(price.value())
        .filter(|notional| *notional <= ledger.max_notional)
        .ok_or_else(|| {
            EngineError::invalid_order(format!(
                "notional out of range: {size} at {price} exceeds {}",
                ledger.max_notional
            ))
        })
}

impl<S: AccountStore> Engine<S> {
    /// Apply a simulated order to an account's ledger.
    pub fn place_order(&self, request: OrderRequest) -> Result<OrderResult, EngineError> {
        if request.size <= Decimal::ZERO {
            return Err(EngineError::invalid_order(format!("size must be positive, got {}", request.size)));
        }
        let quoted = request.price.map(|p| positive_price(p, "price")).transpose()?;
        let take_profit = request.tp_price.map(|p| positive_price(p, "take-profit")).transpose()?;
        let stop_loss = request.sl_price.map(|p| positive_price(p, "stop-loss")).transpose()?;

        let symbol = self.oracle.canonical(request.symbol.as_str());
        if symbol.as_str().is_empty() {
            return Err(EngineError::invalid_order(format!("unknown symbol {:?}", request.symbol.as_str())));
        }
        match (request.order_type, quoted) {
            (OrderType::Limit, None) => return Err(EngineError::invalid_order("limit orders require a price")),
            (OrderType::Market, Some(_)) => {
                return Err(EngineError::invalid_order(
                    "market orders fill at the oracle price; use a limit order to set the price",
                ))
            }
            _ => {}
        }

        // fail fast before touching the oracle; re-checked under the lock
        let account = self.get_account(request.account_id)?;
        if !account.is_tradable() {
            return Err(EngineError::AccountNotTradable {
                account_id: account.id,
                status: account.status,
            });
        }

        let (fill_price, price_source) = match quoted {
            Some(price) => (price, "limit".to_string()),
            None => {
                let quote = self.get_price(&symbol)?;
                (quote.price, quote.source)
            }
        };
        checked_notional(request.size, fill_price, &self.config.platform.ledger)?;

        let now = self.now();
        let mut events = Vec::new();

        let result = self.store.transact(request.account_id, |book| {
            self.apply_order(book, &request, &symbol, fill_price, take_profit, stop_loss, now, &mut events)
        });

        match result {
            Ok(mut result) => {
                result.price_source = price_source;
                tracing::info!(
                    account_id = %result.account_id,
                    symbol = %result.symbol,
                    side = %result.side,
                    size = %result.filled_size,
                    price = %result.fill_price,
                    realized_pnl = %result.realized_pnl,
                    balance = %result.new_balance,
                    "order applied"
                );
                self.record(now, events);
                Ok(result)
            }
            Err(err) => {
                tracing::debug!(account_id = %request.account_id, %symbol, error = %err, "order rejected");
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_order(
        &self,
        book: &mut AccountBook,
        request: &OrderRequest,
        symbol: &Symbol,
        fill_price: Price,
        take_profit: Option<Price>,
        stop_loss: Option<Price>,
        now: Timestamp,
        events: &mut Vec<EventPayload>,
    ) -> Result<OrderResult, EngineError> {
        let account_id = book.account.id;
        if !book.account.is_tradable() {
            return Err(EngineError::AccountNotTradable {
                account_id,
                status: book.account.status,
            });
        }

        let ledger = &self.config.platform.ledger;
        let side = request.side();
        let held = book.positions.get(symbol).map(|p| (p.side(), p.size.abs(), p.avg_entry_price));

        let mut size = request.size;
        if request.reduce_only {
            let Some((held_side, held_size, _)) = held else {
                return Err(EngineError::ReduceWithNoPosition {
                    account_id,
                    symbol: symbol.clone(),
                });
            };
            if held_side == Some(side) {
                return Err(EngineError::invalid_order("reduce-only order would increase the position"));
            }
            // never flips
            size = size.min(held_size);
        }

        // side of the position this order leaves behind, if it opens or adds
        let opens_side = match held {
            None => true,
            Some((held_side, _, _)) if held_side == Some(side) => true,
            Some((_, held_size, _)) => !request.reduce_only && size - held_size > ledger.dust_size,
        };

        if let Some((held_side, held_size, entry)) = held {
            if held_side == Some(side) {
                let combined = checked_notional(held_size, entry, ledger)?
                    .checked_add(checked_notional(size, fill_price, ledger)?)
                    .filter(|n| *n <= ledger.max_notional);
                if combined.is_none() {
                    return Err(EngineError::invalid_order(format!(
                        "position notional would exceed {}",
                        ledger.max_notional
                    )));
                }
            }
        }

        let has_bracket = take_profit.is_some() || stop_loss.is_some();
        if has_bracket {
            if !opens_side {
                return Err(EngineError::invalid_order(
                    "take-profit and stop-loss only attach to orders that open or add to a position",
                ));
            }
            validate_bracket(side, fill_price, take_profit, stop_loss).map_err(EngineError::invalid_order)?;
        }

        let outcome = apply_fill(book, symbol, side, size, fill_price, ledger, CloseReason::UserClosed, now, events);

        let mut placed = Vec::new();
        if has_bracket {
            // a new bracket replaces whatever protected the position before
            let cancelled = book.cancel_conditionals(symbol);
            if cancelled > 0 {
                events.push(EventPayload::ConditionalCancelled(ConditionalCancelledEvent {
                    account_id,
                    symbol: symbol.clone(),
                    count: cancelled,
                }));
            }

            if let Some(price) = take_profit {
                let id = book.next_conditional_id();
                placed.push(ConditionalOrder::take_profit(id, symbol.clone(), side, price, now));
            }
            if let Some(price) = stop_loss {
                let id = book.next_conditional_id();
                placed.push(ConditionalOrder::stop_loss(id, symbol.clone(), side, price, now));
            }
            book.conditional_orders.extend(placed.iter().cloned());

            events.push(EventPayload::ConditionalPlaced(ConditionalPlacedEvent {
                account_id,
                symbol: symbol.clone(),
                take_profit,
                stop_loss,
            }));
        }

        events.push(EventPayload::OrderApplied(OrderAppliedEvent {
            account_id,
            symbol: symbol.clone(),
            side,
            size,
            fill_price,
            fee: outcome.fee,
            realized_pnl: outcome.realized_pnl,
            new_balance: book.account.virtual_balance,
            reduce_only: request.reduce_only,
        }));

        Ok(OrderResult {
            account_id,
            symbol: symbol.clone(),
            side,
            filled_size: size,
            fill_price,
            price_source: String::new(),
            fee: outcome.fee,
            realized_pnl: outcome.realized_pnl,
            new_balance: book.account.virtual_balance,
            position: outcome.position,
            closed: outcome.closed,
            conditional_orders: placed,
        })
    }
}

