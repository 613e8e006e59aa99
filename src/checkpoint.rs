// 5.0: checkpoint state machine. active -> (advance)* -> passed, or active -> failed.
// decide() is pure: it reads an account and its checkpoint history and says what should happen.
// the engine applies the decision inside the account's transaction.

use crate::account::{AccountStatus, EvaluableAccount};
use crate::types::{Quote, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Audit row for one checkpoint index. Once `checkpoint_passed` is set the row never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_number: u32,
    pub required_balance: Quote,
    pub checkpoint_balance: Quote,
    pub checkpoint_passed: Option<bool>,
    pub deadline: Timestamp,
    pub evaluated_at: Timestamp,
}

impl Checkpoint {
    pub fn is_final(&self) -> bool {
        self.checkpoint_passed.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointDecision {
    /// Account is not active. Nothing to evaluate.
    Inactive,
    /// Drawdown limit breached. Takes priority over any target result.
    DrawdownBreached { drawdown: Quote },
    /// Deadline not reached and not the final checkpoint.
    NotDue { required: Quote, deadline: Timestamp },
    /// Final checkpoint checked early, target not met yet, deadline still ahead.
    Pending { required: Quote, deadline: Timestamp },
    Passed { required: Quote, deadline: Timestamp, final_checkpoint: bool },
    Missed { required: Quote, deadline: Timestamp },
}

// 5.1: previous * (1 + target / 100)
pub fn required_balance(previous_balance: Quote, profit_target_percent: Decimal) -> Quote {
    previous_balance.mul(Decimal::ONE + profit_target_percent / dec!(100))
}

/// Balance recorded at the previous passed checkpoint, or the starting size for checkpoint 1.
pub fn previous_checkpoint_balance<A: EvaluableAccount>(account: &A, history: &[Checkpoint]) -> Quote {
    let current = account.current_checkpoint();
    if current <= 1 {
        return account.size_base();
    }
    history
        .iter()
        .find(|c| c.checkpoint_number == current - 1 && c.checkpoint_passed == Some(true))
        .map(|c| c.checkpoint_balance)
        .unwrap_or_else(|| account.size_base())
}

// 5.2: one step of the state machine
pub fn decide<A: EvaluableAccount>(account: &A, history: &[Checkpoint], now: Timestamp) -> CheckpointDecision {
    if account.status() != AccountStatus::Active {
        return CheckpointDecision::Inactive;
    }

    let hwm = account.high_water_mark();
    let balance = account.virtual_balance();
    if account.drawdown_rule().is_breached(hwm, balance) {
        return CheckpointDecision::DrawdownBreached {
            drawdown: hwm.sub(balance),
        };
    }

    let number = account.current_checkpoint();
    let deadline = account.checkpoint_deadline(number);
    let deadline_reached = now >= deadline;
    let final_checkpoint = number >= account.num_checkpoints();

    let previous = previous_checkpoint_balance(account, history);
    let required = required_balance(previous, account.profit_target_percent());

    if !deadline_reached && !final_checkpoint {
        return CheckpointDecision::NotDue { required, deadline };
    }

    if balance >= required {
        CheckpointDecision::Passed {
            required,
            deadline,
            final_checkpoint,
        }
    } else if deadline_reached {
        CheckpointDecision::Missed { required, deadline }
    } else {
        CheckpointDecision::Pending { required, deadline }
    }
}

/// Create or refresh the open row for `number`. Finalized rows are left alone.
pub fn upsert_pending(
    history: &mut Vec<Checkpoint>,
    number: u32,
    required: Quote,
    balance: Quote,
    deadline: Timestamp,
    now: Timestamp,
) {
    match history.iter_mut().find(|c| c.checkpoint_number == number) {
        Some(row) if row.is_final() => {}
        Some(row) => {
            row.required_balance = required;
            row.checkpoint_balance = balance;
            row.evaluated_at = now;
        }
        None => history.push(Checkpoint {
            checkpoint_number: number,
            required_balance: required,
            checkpoint_balance: balance,
            checkpoint_passed: None,
            deadline,
            evaluated_at: now,
        }),
    }
}

/// Set the outcome for `number`. Returns false if the row was already final.
pub fn finalize(
    history: &mut Vec<Checkpoint>,
    number: u32,
    passed: bool,
    required: Quote,
    balance: Quote,
    deadline: Timestamp,
    now: Timestamp,
) -> bool {
    upsert_pending(history, number, required, balance, deadline, now);
    match history.iter_mut().find(|c| c.checkpoint_number == number) {
        Some(row) if !row.is_final() => {
            row.checkpoint_passed = Some(passed);
            true
        }
        _ => false,
    }
}
