//! Evaluation and funded accounts.
//!
//! Both kinds share one record shape and one rule set. The only behavioral
//! difference is how the drawdown limit is expressed: evaluation accounts carry
//! an absolute currency amount, funded accounts a ratio of the high-water mark.

use crate::types::{AccountId, Leverage, Quote, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Evaluation,
    Funded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Passed,
    Failed,
    Expired,
}

impl AccountStatus {
    /// Passed and failed never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountStatus::Passed | AccountStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Active => "active",
            AccountStatus::Passed => "passed",
            AccountStatus::Failed => "failed",
            AccountStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Why an account ended up `failed`. A business outcome, not an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Drawdown,
    CheckpointMissed,
}

/// Aggregate drawdown limit, measured from the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "limit")]
pub enum DrawdownRule {
    /// Breached when `hwm - balance > limit`.
    Absolute(Quote),
    /// Breached when `(hwm - balance) / hwm > limit`.
    Relative(Decimal),
}

impl DrawdownRule {
    pub fn is_breached(&self, high_water_mark: Quote, balance: Quote) -> bool {
        let drawdown = high_water_mark.sub(balance);
        if drawdown.value() <= Decimal::ZERO {
            return false;
        }
        match self {
            DrawdownRule::Absolute(limit) => drawdown > *limit,
            DrawdownRule::Relative(ratio) => {
                if high_water_mark.value() <= Decimal::ZERO {
                    return true;
                }
                drawdown.value() / high_water_mark.value() > *ratio
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub kind: AccountKind,
    pub created_at: Timestamp,

    pub size_base: Quote,
    pub virtual_balance: Quote,
    pub high_water_mark: Quote,

    pub leverage: Leverage,
    pub max_drawdown: DrawdownRule,
    // reserved. never enforced beyond the aggregate drawdown check
    pub daily_loss: Quote,

    pub num_checkpoints: u32,
    pub checkpoint_interval_hours: u64,
    pub profit_target_percent: Decimal,
    pub current_checkpoint: u32,

    pub status: AccountStatus,
    pub failure_reason: Option<FailureReason>,
    pub status_changed_at: Option<Timestamp>,

    // funded only: platform margin figures derived at provisioning
    pub margin_requirement: Option<Quote>,
    pub maintenance_margin: Option<Quote>,

    // evaluation -> funded link, both directions
    pub source_account: Option<AccountId>,
    pub funded_account: Option<AccountId>,
}

/// What the purchase flow hands over when an evaluation account is bought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountParams {
    pub owner: UserId,
    pub size_base: Quote,
    pub leverage: Option<Leverage>,
    pub max_drawdown: Option<Quote>,
    pub daily_loss: Option<Quote>,
    pub num_checkpoints: Option<u32>,
    pub checkpoint_interval_hours: Option<u64>,
    pub profit_target_percent: Option<Decimal>,
}

impl AccountParams {
    pub fn new(owner: UserId, size_base: Quote) -> Self {
        Self {
            owner,
            size_base,
            leverage: None,
            max_drawdown: None,
            daily_loss: None,
            num_checkpoints: None,
            checkpoint_interval_hours: None,
            profit_target_percent: None,
        }
    }

    pub fn with_checkpoints(mut self, count: u32, interval_hours: u64, target_percent: Decimal) -> Self {
        self.num_checkpoints = Some(count);
        self.checkpoint_interval_hours = Some(interval_hours);
        self.profit_target_percent = Some(target_percent);
        self
    }

    pub fn with_max_drawdown(mut self, amount: Quote) -> Self {
        self.max_drawdown = Some(amount);
        self
    }

    pub fn with_leverage(mut self, leverage: Leverage) -> Self {
        self.leverage = Some(leverage);
        self
    }
}

impl Account {
    pub fn is_tradable(&self) -> bool {
        self.status.is_active()
    }

    /// Deadline of checkpoint `number`: `number × interval` hours after creation.
    pub fn checkpoint_deadline(&self, number: u32) -> Timestamp {
        self.created_at
            .plus_hours(u64::from(number).saturating_mul(self.checkpoint_interval_hours))
    }

    /// Apply a signed balance change and keep the high-water mark monotonic.
    pub fn apply_balance_delta(&mut self, delta: Quote) {
        self.virtual_balance = self.virtual_balance.add(delta);
        self.refresh_high_water_mark();
    }

    pub fn refresh_high_water_mark(&mut self) {
        self.high_water_mark = self.high_water_mark.max(self.virtual_balance);
    }

    pub fn drawdown(&self) -> Quote {
        self.high_water_mark.sub(self.virtual_balance)
    }

    pub fn mark_passed(&mut self, at: Timestamp) {
        self.status = AccountStatus::Passed;
        self.status_changed_at = Some(at);
    }

    pub fn mark_failed(&mut self, reason: FailureReason, at: Timestamp) {
        self.status = AccountStatus::Failed;
        self.failure_reason = Some(reason);
        self.status_changed_at = Some(at);
    }
}

/// The fields an account must expose to be run through the checkpoint state machine.
pub trait EvaluableAccount {
    fn status(&self) -> AccountStatus;
    fn size_base(&self) -> Quote;
    fn virtual_balance(&self) -> Quote;
    fn high_water_mark(&self) -> Quote;
    fn drawdown_rule(&self) -> DrawdownRule;
    fn num_checkpoints(&self) -> u32;
    fn current_checkpoint(&self) -> u32;
    fn profit_target_percent(&self) -> Decimal;
    fn checkpoint_deadline(&self, number: u32) -> Timestamp;
}

impl EvaluableAccount for Account {
    fn status(&self) -> AccountStatus {
        self.status
    }

    fn size_base(&self) -> Quote {
        self.size_base
    }

    fn virtual_balance(&self) -> Quote {
        self.virtual_balance
    }

    fn high_water_mark(&self) -> Quote {
        self.high_water_mark
    }

    fn drawdown_rule(&self) -> DrawdownRule {
        self.max_drawdown
    }

    fn num_checkpoints(&self) -> u32 {
        self.num_checkpoints
    }

    fn current_checkpoint(&self) -> u32 {
        self.current_checkpoint
    }

    fn profit_target_percent(&self) -> Decimal {
        self.profit_target_percent
    }

    fn checkpoint_deadline(&self, number: u32) -> Timestamp {
        Account::checkpoint_deadline(self, number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_account() -> Account {
        Account {
            id: AccountId(1),
            owner: UserId::new("trader"),
            kind: AccountKind::Evaluation,
            created_at: Timestamp::from_millis(0),
            size_base: Quote::new(dec!(5000)),
            virtual_balance: Quote::new(dec!(5000)),
            high_water_mark: Quote::new(dec!(5000)),
            leverage: Leverage::new(dec!(20)).unwrap(),
            max_drawdown: DrawdownRule::Absolute(Quote::new(dec!(500))),
            daily_loss: Quote::new(dec!(250)),
            num_checkpoints: 3,
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
        }
    }

    #[test]
    fn high_water_mark_only_rises() {
        let mut account = test_account();
        account.apply_balance_delta(Quote::new(dec!(300)));
        assert_eq!(account.high_water_mark.value(), dec!(5300));

        account.apply_balance_delta(Quote::new(dec!(-800)));
        assert_eq!(account.virtual_balance.value(), dec!(4500));
        assert_eq!(account.high_water_mark.value(), dec!(5300));
        assert_eq!(account.drawdown().value(), dec!(800));
    }

    #[test]
    fn absolute_drawdown_rule() {
        let rule = DrawdownRule::Absolute(Quote::new(dec!(500)));
        let hwm = Quote::new(dec!(5300));
        assert!(!rule.is_breached(hwm, Quote::new(dec!(4800))));
        assert!(rule.is_breached(hwm, Quote::new(dec!(4799))));
    }

    #[test]
    fn relative_drawdown_rule() {
        let rule = DrawdownRule::Relative(dec!(0.1));
        let hwm = Quote::new(dec!(10000));
        assert!(!rule.is_breached(hwm, Quote::new(dec!(9000))));
        assert!(rule.is_breached(hwm, Quote::new(dec!(8999))));
        assert!(!rule.is_breached(hwm, Quote::new(dec!(12000))));
    }

    #[test]
    fn checkpoint_deadlines() {
        let account = test_account();
        assert_eq!(account.checkpoint_deadline(1).as_millis(), 24 * 3_600_000);
        assert_eq!(account.checkpoint_deadline(3).as_millis(), 72 * 3_600_000);
    }

    #[test]
    fn terminal_statuses() {
        assert!(AccountStatus::Passed.is_terminal());
        assert!(AccountStatus::Failed.is_terminal());
        assert!(!AccountStatus::Expired.is_terminal());
        assert!(!AccountStatus::Expired.is_active());
    }
}
