//! Resting take-profit and stop-loss legs.
//!
//! A leg is placed together with the order that opens or adds to a position and
//! waits until the watchdog marks the symbol across its trigger. Legs always
//! flatten the whole position, so they carry no size of their own.

use crate::types::{Price, Side, Symbol, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-account sequence number of a resting leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionalOrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalKind {
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub id: ConditionalOrderId,
    pub symbol: Symbol,
    pub kind: ConditionalKind,
    /// Side of the position being protected. The close trades the other way.
    pub position_side: Side,
    pub trigger_price: Price,
    pub created_at: Timestamp,
}

impl ConditionalOrder {
    pub fn take_profit(id: ConditionalOrderId, symbol: Symbol, position_side: Side, trigger: Price, at: Timestamp) -> Self {
        Self::leg(id, symbol, ConditionalKind::TakeProfit, position_side, trigger, at)
    }

    pub fn stop_loss(id: ConditionalOrderId, symbol: Symbol, position_side: Side, trigger: Price, at: Timestamp) -> Self {
        Self::leg(id, symbol, ConditionalKind::StopLoss, position_side, trigger, at)
    }

    fn leg(
        id: ConditionalOrderId,
        symbol: Symbol,
        kind: ConditionalKind,
        position_side: Side,
        trigger_price: Price,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            symbol,
            kind,
            position_side,
            trigger_price,
            created_at,
        }
    }

    /// True once `price` has reached the trigger. Touching it counts.
    pub fn is_crossed(&self, price: Price) -> bool {
        crossed(self.kind, self.position_side, self.trigger_price, price)
    }
}

// tp on a long and sl on a short fire from below, the other two from above
fn crossed(kind: ConditionalKind, position_side: Side, trigger: Price, price: Price) -> bool {
    match (kind, position_side) {
        (ConditionalKind::TakeProfit, Side::Long) | (ConditionalKind::StopLoss, Side::Short) => price >= trigger,
        (ConditionalKind::TakeProfit, Side::Short) | (ConditionalKind::StopLoss, Side::Long) => price <= trigger,
    }
}

/// A bracket is valid when neither leg would fire at the fill price itself.
pub fn validate_bracket(
    position_side: Side,
    fill_price: Price,
    take_profit: Option<Price>,
    stop_loss: Option<Price>,
) -> Result<(), &'static str> {
    if take_profit.is_some_and(|tp| crossed(ConditionalKind::TakeProfit, position_side, tp, fill_price)) {
        return Err("take-profit must be on the profitable side of the fill price");
    }
    if stop_loss.is_some_and(|sl| crossed(ConditionalKind::StopLoss, position_side, sl, fill_price)) {
        return Err("stop-loss must be on the losing side of the fill price");
    }
    Ok(())
}

/// First leg on `symbol` crossed at `price`. Take-profits are looked at before stop-losses.
pub fn first_triggered<'a>(orders: &'a [ConditionalOrder], symbol: &Symbol, price: Price) -> Option<&'a ConditionalOrder> {
    let mut crossed_legs = orders.iter().filter(|o| &o.symbol == symbol && o.is_crossed(price));
    let first = crossed_legs.next()?;
    if first.kind == ConditionalKind::TakeProfit {
        return Some(first);
    }
    crossed_legs
        .find(|o| o.kind == ConditionalKind::TakeProfit)
        .or(Some(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: rust_decimal::Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn leg(id: u64, symbol: &str, kind: ConditionalKind, side: Side, trigger: Price) -> ConditionalOrder {
        let id = ConditionalOrderId(id);
        let symbol = Symbol::new(symbol);
        let at = Timestamp::from_millis(0);
        match kind {
            ConditionalKind::TakeProfit => ConditionalOrder::take_profit(id, symbol, side, trigger, at),
            ConditionalKind::StopLoss => ConditionalOrder::stop_loss(id, symbol, side, trigger, at),
        }
    }

    #[test]
    fn long_stop_fires_at_or_below() {
        let sl = leg(1, "BTC", ConditionalKind::StopLoss, Side::Long, px(dec!(48000)));
        assert!(!sl.is_crossed(px(dec!(50000))));
        assert!(sl.is_crossed(px(dec!(48000))));
        assert!(sl.is_crossed(px(dec!(47000))));
    }

    #[test]
    fn short_take_profit_fires_at_or_below() {
        let tp = leg(1, "BTC", ConditionalKind::TakeProfit, Side::Short, px(dec!(45000)));
        assert!(!tp.is_crossed(px(dec!(45000.01))));
        assert!(tp.is_crossed(px(dec!(45000))));
    }

    #[test]
    fn bracket_must_not_fire_at_fill() {
        let fill = px(dec!(100));
        let above = Some(px(dec!(110)));
        let below = Some(px(dec!(90)));

        assert!(validate_bracket(Side::Long, fill, above, below).is_ok());
        assert!(validate_bracket(Side::Short, fill, below, above).is_ok());
        assert!(validate_bracket(Side::Long, fill, below, None).is_err());
        assert!(validate_bracket(Side::Short, fill, None, below).is_err());
        // a trigger at the fill price would fire on the next pass
        assert!(validate_bracket(Side::Long, fill, None, Some(fill)).is_err());
    }

    #[test]
    fn take_profit_preferred_when_both_crossed() {
        // contrived: both legs are crossed at 100
        let orders = vec![
            leg(1, "BTC", ConditionalKind::StopLoss, Side::Long, px(dec!(101))),
            leg(2, "BTC", ConditionalKind::TakeProfit, Side::Long, px(dec!(99))),
        ];

        let hit = first_triggered(&orders, &Symbol::new("BTC"), px(dec!(100))).unwrap();
        assert_eq!(hit.id, ConditionalOrderId(2));
        assert!(first_triggered(&orders, &Symbol::new("ETH"), px(dec!(100))).is_none());
    }
}
