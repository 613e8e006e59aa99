// 4.0: open position tracking. pnl = size * (mark - entry).
// 4.1 has open/increase/reduce logic at the bottom. flips are a full reduce followed by an open.
// realized_pnl on a position is cumulative and net of every fee the position paid, opens included.

use crate::types::{Leverage, Price, Quote, Side, SignedSize, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub size: SignedSize,
    pub avg_entry_price: Price,
    pub leverage: Leverage,
    pub margin_used: Quote,
    pub unrealized_pnl: Quote,
    pub realized_pnl: Quote,
    pub fees_accrued: Quote,
    pub opened_at: Timestamp,
    pub last_update_ts: Timestamp,
}

impl Position {
    pub fn open(
        symbol: Symbol,
        side: Side,
        size: Decimal,
        entry_price: Price,
        leverage: Leverage,
        fee: Quote,
        timestamp: Timestamp,
    ) -> Self {
        let size = SignedSize::from_side(side, size);
        let notional = Quote::new(size.abs() * entry_price.value());
        Self {
            symbol,
            size,
            avg_entry_price: entry_price,
            leverage,
            margin_used: leverage.margin_for(notional),
            unrealized_pnl: Quote::zero(),
            realized_pnl: fee.negate(),
            fees_accrued: fee,
            opened_at: timestamp,
            last_update_ts: timestamp,
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.size.side()
    }

    // 4.1: paper gains/losses based on current price
    pub fn unrealized_pnl_at(&self, mark_price: Price) -> Quote {
        calculate_unrealized_pnl(self.size, self.avg_entry_price, mark_price)
    }

    /// unrealized / margin. zero when no margin is posted.
    pub fn pnl_ratio(&self) -> Decimal {
        if self.margin_used.value().is_zero() {
            Decimal::ZERO
        } else {
            self.unrealized_pnl.value() / self.margin_used.value()
        }
    }

    pub fn mark(&mut self, mark_price: Price, timestamp: Timestamp) {
        self.unrealized_pnl = self.unrealized_pnl_at(mark_price);
        self.last_update_ts = timestamp;
    }
}

// 4.2: the pnl formula. size * (mark - entry)
pub fn calculate_unrealized_pnl(size: SignedSize, entry_price: Price, mark_price: Price) -> Quote {
    let pnl = size.value() * (mark_price.value() - entry_price.value());
    Quote::new(pnl)
}

// long: (exit - entry) * closed. short: (entry - exit) * closed. same thing with a signed size.
pub fn calculate_realized_pnl(close_size: SignedSize, entry_price: Price, exit_price: Price) -> Quote {
    let pnl = close_size.value() * (exit_price.value() - entry_price.value());
    Quote::new(pnl)
}

pub fn taker_fee(size: Decimal, price: Price, fee_rate: Decimal) -> Quote {
    Quote::new(size.abs() * price.value() * fee_rate)
}

/// Final state of a leg that was flattened. Returned to callers and written to the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: Symbol,
    pub side: Side,
    pub closed_size: Decimal,
    pub entry_price: Price,
    pub exit_price: Price,
    // lifetime result of the position, net of all its fees
    pub realized_pnl: Quote,
    pub fees_accrued: Quote,
    pub opened_at: Timestamp,
    pub closed_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub new_position: Option<Position>,
    pub closed_size: Decimal,
    // this fill only: gross pnl on the closed size minus the close fee
    pub realized_pnl: Quote,
    pub margin_released: Quote,
    pub closed: Option<ClosedPosition>,
}

// 4.3: adds to existing position. notional-weighted entry, fee debited into realized
pub fn increase_position(
    position: &Position,
    add_size: Decimal,
    fill_price: Price,
    fee: Quote,
    timestamp: Timestamp,
) -> Position {
    debug_assert!(add_size > Decimal::ZERO, "increase amount must be positive");

    let old_abs = position.size.abs();
    let new_abs = old_abs + add_size;
    let side = position.side().unwrap_or(Side::Long);

    let weighted_sum = old_abs * position.avg_entry_price.value() + add_size * fill_price.value();
    let new_entry = Price::new_unchecked(weighted_sum / new_abs);

    let added_notional = Quote::new(add_size * fill_price.value());

    Position {
        symbol: position.symbol.clone(),
        size: SignedSize::from_side(side, new_abs),
        avg_entry_price: new_entry,
        leverage: position.leverage,
        margin_used: position.margin_used.add(position.leverage.margin_for(added_notional)),
        unrealized_pnl: position.unrealized_pnl,
        realized_pnl: position.realized_pnl.sub(fee),
        fees_accrued: position.fees_accrued.add(fee),
        opened_at: position.opened_at,
        last_update_ts: timestamp,
    }
}

// 4.4: shrinks a position. entry price never changes on a reduce.
// remaining size at or below `dust` counts as flat and the position is gone.
pub fn reduce_position(
    position: &Position,
    reduce_amount: Decimal,
    fill_price: Price,
    fee: Quote,
    dust: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    debug_assert!(reduce_amount > Decimal::ZERO, "reduce amount must be positive");

    let position_abs = position.size.abs();
    let closed_size = reduce_amount.min(position_abs);
    let side = position.side().unwrap_or(Side::Long);

    let close_signed = SignedSize::from_side(side, closed_size);
    let gross = calculate_realized_pnl(close_signed, position.avg_entry_price, fill_price);
    let realized = gross.sub(fee);

    let remaining_abs = position_abs - closed_size;
    let lifetime_realized = position.realized_pnl.add(realized);
    let fees_accrued = position.fees_accrued.add(fee);

    if remaining_abs <= dust {
        return PositionUpdate {
            new_position: None,
            closed_size,
            realized_pnl: realized,
            margin_released: position.margin_used,
            closed: Some(ClosedPosition {
                symbol: position.symbol.clone(),
                side,
                closed_size,
                entry_price: position.avg_entry_price,
                exit_price: fill_price,
                realized_pnl: lifetime_realized,
                fees_accrued,
                opened_at: position.opened_at,
                closed_at: timestamp,
            }),
        };
    }

    // margin released proportionally
    let released = position.margin_used.mul(closed_size / position_abs);
    let remaining_size = SignedSize::from_side(side, remaining_abs);

    let new_position = Position {
        symbol: position.symbol.clone(),
        size: remaining_size,
        avg_entry_price: position.avg_entry_price,
        leverage: position.leverage,
        margin_used: position.margin_used.sub(released),
        unrealized_pnl: calculate_unrealized_pnl(remaining_size, position.avg_entry_price, fill_price),
        realized_pnl: lifetime_realized,
        fees_accrued,
        opened_at: position.opened_at,
        last_update_ts: timestamp,
    };

    PositionUpdate {
        new_position: Some(new_position),
        closed_size,
        realized_pnl: realized,
        margin_released: released,
        closed: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    fn test_position() -> Position {
        // 1 BTC long @ 50000, 10x, no fee
        Position::open(
            btc(),
            Side::Long,
            dec!(1),
            Price::new_unchecked(dec!(50000)),
            Leverage::new(dec!(10)).unwrap(),
            Quote::zero(),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn open_sets_margin_and_fee() {
        let pos = Position::open(
            btc(),
            Side::Short,
            dec!(2),
            Price::new_unchecked(dec!(100)),
            Leverage::new(dec!(20)).unwrap(),
            Quote::new(dec!(0.07)),
            Timestamp::from_millis(0),
        );
        assert_eq!(pos.size.value(), dec!(-2));
        assert_eq!(pos.margin_used.value(), dec!(10));
        assert_eq!(pos.realized_pnl.value(), dec!(-0.07));
        assert_eq!(pos.fees_accrued.value(), dec!(0.07));
    }

    #[test]
    fn unrealized_pnl_long_profit() {
        let pos = test_position();
        let pnl = pos.unrealized_pnl_at(Price::new_unchecked(dec!(52000)));
        assert_eq!(pnl.value(), dec!(2000));
    }

    #[test]
    fn unrealized_pnl_short_profit() {
        let pos = Position::open(
            btc(),
            Side::Short,
            dec!(1),
            Price::new_unchecked(dec!(50000)),
            Leverage::new(dec!(10)).unwrap(),
            Quote::zero(),
            Timestamp::from_millis(0),
        );
        let pnl = pos.unrealized_pnl_at(Price::new_unchecked(dec!(48000)));
        assert_eq!(pnl.value(), dec!(2000)); // short profits when price drops
    }

    #[test]
    fn pnl_ratio_against_margin() {
        let mut pos = test_position(); // margin 5000
        pos.mark(Price::new_unchecked(dec!(49750)), Timestamp::from_millis(1));
        assert_eq!(pos.unrealized_pnl.value(), dec!(-250));
        assert_eq!(pos.pnl_ratio(), dec!(-0.05));
    }

    #[test]
    fn increase_position_averaging() {
        let pos = test_position();
        let new_pos = increase_position(
            &pos,
            dec!(1),
            Price::new_unchecked(dec!(52000)),
            Quote::new(dec!(5)),
            Timestamp::from_millis(1000),
        );

        assert_eq!(new_pos.size.value(), dec!(2));
        // (1 * 50000 + 1 * 52000) / 2
        assert_eq!(new_pos.avg_entry_price.value(), dec!(51000));
        assert_eq!(new_pos.margin_used.value(), dec!(10200));
        assert_eq!(new_pos.realized_pnl.value(), dec!(-5));
    }

    #[test]
    fn reduce_position_partial() {
        let pos = increase_position(
            &test_position(),
            dec!(1),
            Price::new_unchecked(dec!(50000)),
            Quote::zero(),
            Timestamp::from_millis(0),
        );

        let update = reduce_position(
            &pos,
            dec!(1),
            Price::new_unchecked(dec!(52000)),
            Quote::new(dec!(2)),
            dec!(0.00000001),
            Timestamp::from_millis(1000),
        );

        let new_pos = update.new_position.unwrap();
        assert_eq!(new_pos.size.value(), dec!(1));
        assert_eq!(new_pos.avg_entry_price.value(), dec!(50000)); // entry unchanged
        assert_eq!(new_pos.margin_used.value(), dec!(5000));
        assert_eq!(update.realized_pnl.value(), dec!(1998)); // 2000 - fee
        assert_eq!(new_pos.realized_pnl.value(), dec!(1998));
        assert!(update.closed.is_none());
    }

    #[test]
    fn reduce_position_full_close() {
        let pos = test_position();
        let update = reduce_position(
            &pos,
            dec!(1),
            Price::new_unchecked(dec!(49000)),
            Quote::zero(),
            dec!(0.00000001),
            Timestamp::from_millis(1000),
        );

        assert!(update.new_position.is_none());
        assert_eq!(update.realized_pnl.value(), dec!(-1000));
        let closed = update.closed.unwrap();
        assert_eq!(closed.side, Side::Long);
        assert_eq!(closed.exit_price.value(), dec!(49000));
        assert_eq!(update.margin_released.value(), dec!(5000));
    }

    #[test]
    fn reduce_leaving_dust_closes() {
        let pos = test_position();
        let update = reduce_position(
            &pos,
            dec!(0.999999999),
            Price::new_unchecked(dec!(50000)),
            Quote::zero(),
            dec!(0.00000001),
            Timestamp::from_millis(1),
        );
        assert!(update.new_position.is_none());
    }

    #[test]
    fn taker_fee_on_notional() {
        let fee = taker_fee(dec!(1.5), Price::new_unchecked(dec!(110)), dec!(0.001));
        assert_eq!(fee.value(), dec!(0.165));
    }
}
