// 8.0.2: request, result and error types for engine operations.

use crate::account::{AccountStatus, FailureReason};
use crate::checkpoint::Checkpoint;
use crate::conditional::ConditionalOrder;
use crate::lifecycle::LifecycleError;
use crate::position::{ClosedPosition, Position};
use crate::store::StoreError;
use crate::types::{AccountId, Price, Quote, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Fills at the oracle price at call time, unless the caller quotes a price.
    Market,
    /// Fills immediately at the supplied price. There is no resting book.
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub is_buy: bool,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub reduce_only: bool,
    pub tp_price: Option<Decimal>,
    pub sl_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(account_id: AccountId, symbol: &str, is_buy: bool, size: Decimal) -> Self {
        Self {
            account_id,
            symbol: Symbol::new(symbol),
            is_buy,
            size,
            price: None,
            order_type: OrderType::Market,
            reduce_only: false,
            tp_price: None,
            sl_price: None,
        }
    }

    pub fn limit(account_id: AccountId, symbol: &str, is_buy: bool, size: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(account_id, symbol, is_buy, size)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.tp_price = Some(price);
        self
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.sl_price = Some(price);
        self
    }

    pub fn side(&self) -> Side {
        Side::from_is_buy(self.is_buy)
    }
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub filled_size: Decimal,
    pub fill_price: Price,
    pub price_source: String,
    pub fee: Quote,
    /// Balance change caused by this fill: realized pnl net of fees, `-fee` for opens and adds.
    pub realized_pnl: Quote,
    pub new_balance: Quote,
    /// Position after the fill. None when the order flattened it.
    pub position: Option<Position>,
    /// Set when a leg was flattened, including the closed leg of a flip.
    pub closed: Option<ClosedPosition>,
    pub conditional_orders: Vec<ConditionalOrder>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub closed: usize,
    pub closed_positions: Vec<ClosedPosition>,
    /// Symbols skipped this cycle because no price could be resolved.
    pub unpriced: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub struct CheckpointEvaluationResult {
    pub account_id: AccountId,
    pub status: AccountStatus,
    pub failure_reason: Option<FailureReason>,
    pub current_checkpoint: u32,
    pub virtual_balance: Quote,
    pub high_water_mark: Quote,
    pub checkpoints: Vec<Checkpoint>,
    pub refresh: RefreshSummary,
    /// Funded account provisioned by this evaluation, if any.
    pub funded_account: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("Account {account_id} is {status} and cannot trade")]
    AccountNotTradable { account_id: AccountId, status: AccountStatus },

    #[error("Account {account_id} has no {symbol} position to reduce")]
    ReduceWithNoPosition { account_id: AccountId, symbol: Symbol },

    #[error("No price available for {symbol}")]
    OracleUnavailable { symbol: Symbol },

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        EngineError::InvalidOrder { reason: reason.into() }
    }

    /// Only a missing price is worth retrying. Everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::OracleUnavailable { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::AccountNotFound(id),
            other => EngineError::Store(other),
        }
    }
}
