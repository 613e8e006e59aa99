//! Risk watchdog: marks open positions and force-closes the ones that tripped.

use super::core::Engine;
use super::positions::apply_fill;
use super::results::{EngineError, RefreshSummary};
use crate::config::{LedgerConfig, RiskConfig};
use crate::events::{EventPayload, ForcedCloseEvent};
use crate::risk::{check_position, CloseTrigger};
use crate::store::{AccountBook, AccountStore};
use crate::types::{AccountId, Price, Symbol, Timestamp};
use std::collections::BTreeMap;

impl<S: AccountStore> Engine<S> {
    /// Mark every open position of an account and apply forced closes.
    /// Price problems never fail the call: unpriced symbols are skipped this cycle.
    pub fn refresh_positions(&self, account_id: AccountId) -> Result<RefreshSummary, EngineError> {
        let book = self.store.snapshot(account_id)?;
        if !book.account.is_tradable() || book.positions.is_empty() {
            return Ok(RefreshSummary::default());
        }

        let (prices, unpriced) = self.price_snapshot(book.positions.keys());
        let now = self.now();
        let mut events = Vec::new();

        let mut summary = self.store.transact(account_id, |book| -> Result<RefreshSummary, EngineError> {
            Ok(run_watchdog(book, &prices, &self.config.platform.ledger, &self.config.platform.risk, now, &mut events))
        })?;
        summary.unpriced = unpriced;

        self.record(now, events);
        Ok(summary)
    }
}

/// Runs one watchdog pass over `book` using a fixed price per symbol.
pub(super) fn run_watchdog(
    book: &mut AccountBook,
    prices: &BTreeMap<Symbol, Price>,
    ledger: &LedgerConfig,
    risk: &RiskConfig,
    now: Timestamp,
    events: &mut Vec<EventPayload>,
) -> RefreshSummary {
    let mut summary = RefreshSummary::default();
    if !book.account.is_tradable() {
        return summary;
    }

    let account_id = book.account.id;
    let symbols: Vec<Symbol> = book.positions.keys().cloned().collect();

    for symbol in symbols {
        let Some(&mark_price) = prices.get(&symbol) else {
            continue;
        };
        let Some(mut position) = book.positions.get(&symbol).cloned() else {
            continue;
        };
        let Some(held_side) = position.side() else {
            continue;
        };

        let unrealized = position.unrealized_pnl_at(mark_price);
        if unrealized != position.unrealized_pnl {
            position.mark(mark_price, now);
        }

        match check_position(&position, &book.conditional_orders, mark_price, risk) {
            Some(trigger) => {
                let pnl_ratio = position.pnl_ratio();
                let outcome = apply_fill(
                    book,
                    &symbol,
                    held_side.opposite(),
                    position.size.abs(),
                    mark_price,
                    ledger,
                    trigger.reason(),
                    now,
                    events,
                );

                tracing::info!(
                    %account_id,
                    %symbol,
                    reason = ?trigger.reason(),
                    price = %mark_price,
                    %pnl_ratio,
                    realized_pnl = %outcome.realized_pnl,
                    "forced close"
                );
                if let CloseTrigger::AutoClose { .. } = trigger {
                    tracing::warn!(%account_id, %symbol, %pnl_ratio, "position auto-closed on loss threshold");
                }

                events.push(EventPayload::ForcedClose(ForcedCloseEvent {
                    account_id,
                    symbol: symbol.clone(),
                    reason: trigger.reason(),
                    mark_price,
                    pnl_ratio,
                    realized_pnl: outcome.realized_pnl,
                }));

                summary.closed += 1;
                summary.closed_positions.extend(outcome.closed);
            }
            None => {
                book.positions.insert(symbol, position);
                summary.updated += 1;
            }
        }
    }

    summary
}
