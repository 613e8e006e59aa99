//! Per-position risk checks run by the watchdog.
//!
//! A position is force-closed when one of its resting conditional orders is
//! crossed or when its loss against posted margin falls past the auto-close
//! ratio. The check is pure; the engine applies the close.

use crate::conditional::{first_triggered, ConditionalKind, ConditionalOrder, ConditionalOrderId};
use crate::config::RiskConfig;
use crate::events::CloseReason;
use crate::position::Position;
use crate::types::Price;
use rust_decimal::Decimal;

/// Why the watchdog closes a position. First match wins, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    TakeProfit { order_id: ConditionalOrderId, trigger_price: Price },
    StopLoss { order_id: ConditionalOrderId, trigger_price: Price },
    /// `unrealized / margin_used` fell strictly below the configured ratio.
    AutoClose { pnl_ratio: Decimal },
}

impl CloseTrigger {
    pub fn reason(&self) -> CloseReason {
        match self {
            CloseTrigger::TakeProfit { .. } => CloseReason::TakeProfit,
            CloseTrigger::StopLoss { .. } => CloseReason::StopLoss,
            CloseTrigger::AutoClose { .. } => CloseReason::AutoClose,
        }
    }
}

/// `position` must already be marked at `mark_price`.
pub fn check_position(
    position: &Position,
    conditional_orders: &[ConditionalOrder],
    mark_price: Price,
    config: &RiskConfig,
) -> Option<CloseTrigger> {
    if let Some(order) = first_triggered(conditional_orders, &position.symbol, mark_price) {
        return Some(match order.kind {
            ConditionalKind::TakeProfit => CloseTrigger::TakeProfit {
                order_id: order.id,
                trigger_price: order.trigger_price,
            },
            ConditionalKind::StopLoss => CloseTrigger::StopLoss {
                order_id: order.id,
                trigger_price: order.trigger_price,
            },
        });
    }

    let pnl_ratio = position.pnl_ratio();
    if pnl_ratio < config.auto_close_ratio {
        return Some(CloseTrigger::AutoClose { pnl_ratio });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Leverage, Quote, Side, Symbol, Timestamp};
    use rust_decimal_macros::dec;

    fn long_at_100() -> Position {
        // margin 100: 10 units @ 100, 10x
        Position::open(
            Symbol::new("BTC"),
            Side::Long,
            dec!(10),
            Price::new_unchecked(dec!(100)),
            Leverage::new(dec!(10)).unwrap(),
            Quote::zero(),
            Timestamp::from_millis(0),
        )
    }

    fn marked(mut position: Position, price: Decimal) -> (Position, Price) {
        let mark = Price::new_unchecked(price);
        position.mark(mark, Timestamp::from_millis(1));
        (position, mark)
    }

    #[test]
    fn auto_close_below_ratio() {
        // -6 on 100 margin
        let (pos, mark) = marked(long_at_100(), dec!(99.4));
        let trigger = check_position(&pos, &[], mark, &RiskConfig::default());
        assert_eq!(trigger, Some(CloseTrigger::AutoClose { pnl_ratio: dec!(-0.06) }));
    }

    #[test]
    fn exactly_at_ratio_stays_open() {
        let (pos, mark) = marked(long_at_100(), dec!(99.5));
        assert_eq!(pos.pnl_ratio(), dec!(-0.05));
        assert_eq!(check_position(&pos, &[], mark, &RiskConfig::default()), None);
    }

    #[test]
    fn stop_loss_beats_auto_close() {
        let (pos, mark) = marked(long_at_100(), dec!(99));
        let orders = vec![ConditionalOrder::stop_loss(
            ConditionalOrderId(7),
            Symbol::new("BTC"),
            Side::Long,
            Price::new_unchecked(dec!(99.2)),
            Timestamp::from_millis(0),
        )];

        let trigger = check_position(&pos, &orders, mark, &RiskConfig::default()).unwrap();
        assert_eq!(trigger.reason(), CloseReason::StopLoss);
    }

    #[test]
    fn take_profit_fires_on_favorable_move() {
        let (pos, mark) = marked(long_at_100(), dec!(103));
        let orders = vec![ConditionalOrder::take_profit(
            ConditionalOrderId(1),
            Symbol::new("BTC"),
            Side::Long,
            Price::new_unchecked(dec!(102)),
            Timestamp::from_millis(0),
        )];

        assert!(matches!(
            check_position(&pos, &orders, mark, &RiskConfig::default()),
            Some(CloseTrigger::TakeProfit { order_id: ConditionalOrderId(1), .. })
        ));
    }
}
