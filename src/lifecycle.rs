// 7.0: account lifecycle. builds evaluation accounts for the purchase flow and
// derives the funded account that replaces a passed evaluation.
// both functions are pure; the engine owns ids, time and persistence.

use crate::account::{Account, AccountKind, AccountParams, AccountStatus, DrawdownRule};
use crate::config::{EvaluationDefaults, FundedAccountConfig};
use crate::types::{AccountId, Leverage, Quote, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid account parameters: {0}")]
    InvalidParams(&'static str),

    #[error("Account {0} is not an evaluation account")]
    NotEvaluation(AccountId),

    #[error("Account {account_id} is {status}, only passed evaluations provision")]
    NotPassed { account_id: AccountId, status: AccountStatus },

    #[error("Invalid funded account configuration: {0}")]
    InvalidConfig(&'static str),
}

// 7.1: evaluation account from purchase parameters, gaps filled from defaults
pub fn build_evaluation_account(
    id: AccountId,
    params: AccountParams,
    defaults: &EvaluationDefaults,
    now: Timestamp,
) -> Result<Account, LifecycleError> {
    if params.size_base.value() <= Decimal::ZERO {
        return Err(LifecycleError::InvalidParams("account size must be positive"));
    }

    let leverage = match params.leverage {
        Some(leverage) => leverage,
        None => Leverage::new(defaults.leverage).ok_or(LifecycleError::InvalidParams("default leverage below 1x"))?,
    };

    let num_checkpoints = params.num_checkpoints.unwrap_or(defaults.num_checkpoints);
    if num_checkpoints == 0 {
        return Err(LifecycleError::InvalidParams("at least one checkpoint is required"));
    }

    let checkpoint_interval_hours = params
        .checkpoint_interval_hours
        .unwrap_or(defaults.checkpoint_interval_hours);
    if checkpoint_interval_hours == 0 {
        return Err(LifecycleError::InvalidParams("checkpoint interval must be positive"));
    }

    let profit_target_percent = params
        .profit_target_percent
        .unwrap_or(defaults.profit_target_percent);
    if profit_target_percent < Decimal::ZERO {
        return Err(LifecycleError::InvalidParams("profit target cannot be negative"));
    }

    let percent_of_size = |percent: Decimal| params.size_base.mul(percent / dec!(100));
    let max_drawdown = params
        .max_drawdown
        .unwrap_or_else(|| percent_of_size(defaults.max_drawdown_percent));
    if max_drawdown.value() <= Decimal::ZERO {
        return Err(LifecycleError::InvalidParams("max drawdown must be positive"));
    }
    let daily_loss = params
        .daily_loss
        .unwrap_or_else(|| percent_of_size(defaults.daily_loss_percent));

    Ok(Account {
        id,
        owner: params.owner,
        kind: AccountKind::Evaluation,
        created_at: now,
        size_base: params.size_base,
        virtual_balance: params.size_base,
        high_water_mark: params.size_base,
        leverage,
        max_drawdown: DrawdownRule::Absolute(max_drawdown),
        daily_loss,
        num_checkpoints,
        checkpoint_interval_hours,
        profit_target_percent,
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

// 7.2: funded account for a passed evaluation.
// notional = evaluation size. drawdown becomes a ratio of the high-water mark.
pub fn derive_funded_account(
    evaluation: &Account,
    id: AccountId,
    config: &FundedAccountConfig,
    now: Timestamp,
) -> Result<Account, LifecycleError> {
    if evaluation.kind != AccountKind::Evaluation {
        return Err(LifecycleError::NotEvaluation(evaluation.id));
    }
    if evaluation.status != AccountStatus::Passed {
        return Err(LifecycleError::NotPassed {
            account_id: evaluation.id,
            status: evaluation.status,
        });
    }

    let leverage =
        Leverage::new(config.user_leverage).ok_or(LifecycleError::InvalidConfig("user leverage below 1x"))?;
    if config.effective_leverage <= Decimal::ZERO {
        return Err(LifecycleError::InvalidConfig("effective leverage must be positive"));
    }

    let notional = evaluation.size_base;
    let margin_requirement = Quote::new(notional.value() / config.effective_leverage);
    let maintenance_margin = margin_requirement.mul(config.maintenance_margin_fraction);

    let max_drawdown = match evaluation.max_drawdown {
        DrawdownRule::Absolute(limit) if !notional.is_zero() => DrawdownRule::Relative(limit.value() / notional.value()),
        DrawdownRule::Absolute(_) => return Err(LifecycleError::InvalidParams("evaluation size is zero")),
        relative @ DrawdownRule::Relative(_) => relative,
    };

    Ok(Account {
        id,
        owner: evaluation.owner.clone(),
        kind: AccountKind::Funded,
        created_at: now,
        size_base: notional,
        virtual_balance: notional,
        high_water_mark: notional,
        leverage,
        max_drawdown,
        daily_loss: evaluation.daily_loss,
        num_checkpoints: evaluation.num_checkpoints,
        checkpoint_interval_hours: evaluation.checkpoint_interval_hours,
        profit_target_percent: evaluation.profit_target_percent,
        current_checkpoint: 1,
        status: AccountStatus::Active,
        failure_reason: None,
        status_changed_at: None,
        margin_requirement: Some(margin_requirement),
        maintenance_margin: Some(maintenance_margin),
        source_account: Some(evaluation.id),
        funded_account: None,
    })
}
