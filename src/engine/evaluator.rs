//! Checkpoint evaluation.
//!
//! One evaluation is one atomic unit per account: mark positions, then step the
//! checkpoint state machine until it reports a no-op or a terminal status. An
//! account that was not evaluated for several intervals catches up in one call.

use super::core::Engine;
use super::results::{CheckpointEvaluationResult, EngineError, RefreshSummary};
use super::watchdog::run_watchdog;
use crate::account::{AccountKind, AccountStatus, FailureReason};
use crate::checkpoint::{decide, finalize, upsert_pending, CheckpointDecision};
use crate::events::{AccountTransitionedEvent, CheckpointEvaluatedEvent, EventPayload};
use crate::store::{AccountBook, AccountStore};
use crate::types::{AccountId, Quote, Timestamp};

impl<S: AccountStore> Engine<S> {
    pub fn evaluate_account(&self, account_id: AccountId) -> Result<CheckpointEvaluationResult, EngineError> {
        let snapshot = self.store.snapshot(account_id)?;
        if !snapshot.account.status.is_active() {
            return Ok(result_from(&snapshot, RefreshSummary::default(), None));
        }

        // best effort: an unavailable oracle only skips marking
        let (prices, unpriced) = self.price_snapshot(snapshot.positions.keys());
        let now = self.now();
        let mut events = Vec::new();

        let (mut result, passed_now, kind) = self.store.transact(account_id, |book| -> Result<_, EngineError> {
            let mut refresh = run_watchdog(
                book,
                &prices,
                &self.config.platform.ledger,
                &self.config.platform.risk,
                now,
                &mut events,
            );
            refresh.unpriced = unpriced.clone();

            let from = book.account.status;
            step_checkpoints(book, now, &mut events);
            let to = book.account.status;

            if from != to {
                tracing::info!(
                    %account_id,
                    %from,
                    %to,
                    reason = ?book.account.failure_reason,
                    balance = %book.account.virtual_balance,
                    hwm = %book.account.high_water_mark,
                    "account transitioned"
                );
                events.push(EventPayload::AccountTransitioned(AccountTransitionedEvent {
                    account_id,
                    from,
                    to,
                    failure_reason: book.account.failure_reason,
                }));
            }

            let passed_now = from != to && to == AccountStatus::Passed;
            Ok((result_from(book, refresh, None), passed_now, book.account.kind))
        })?;

        self.record(now, events);

        if passed_now {
            if kind == AccountKind::Evaluation {
                // provisioning runs after the pass is committed: a failure here never undoes it
                if let Ok(funded) = self.retry_provisioning(account_id) {
                    result.funded_account = Some(funded.id);
                }
            } else {
                tracing::info!(%account_id, "funded account passed its checkpoints");
            }
        }

        Ok(result)
    }

    /// Evaluate every active account in the store. Per-account errors are logged and skipped.
    pub fn evaluate_all(&self) -> Vec<CheckpointEvaluationResult> {
        let mut results = Vec::new();
        for account_id in self.store.account_ids() {
            match self.evaluate_account(account_id) {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(%account_id, error = %err, "evaluation failed"),
            }
        }
        results
    }
}

fn result_from(book: &AccountBook, refresh: RefreshSummary, funded_account: Option<AccountId>) -> CheckpointEvaluationResult {
    let mut checkpoints = book.checkpoints.clone();
    checkpoints.sort_by_key(|c| c.checkpoint_number);
    CheckpointEvaluationResult {
        account_id: book.account.id,
        status: book.account.status,
        failure_reason: book.account.failure_reason,
        current_checkpoint: book.account.current_checkpoint,
        virtual_balance: book.account.virtual_balance,
        high_water_mark: book.account.high_water_mark,
        checkpoints,
        refresh,
        funded_account: funded_account.or(book.account.funded_account),
    }
}

// 5.3: apply decisions until nothing changes. each pass either stops or advances current_checkpoint,
// which is bounded by num_checkpoints, so the loop terminates.
fn step_checkpoints(book: &mut AccountBook, now: Timestamp, events: &mut Vec<EventPayload>) {
    let account_id = book.account.id;

    loop {
        let decision = decide(&book.account, &book.checkpoints, now);
        let number = book.account.current_checkpoint;
        let balance = book.account.virtual_balance;

        match decision {
            CheckpointDecision::Inactive => return,

            CheckpointDecision::DrawdownBreached { drawdown } => {
                tracing::warn!(
                    %account_id,
                    %drawdown,
                    hwm = %book.account.high_water_mark,
                    %balance,
                    "drawdown limit breached"
                );
                book.account.mark_failed(FailureReason::Drawdown, now);
                return;
            }

            CheckpointDecision::NotDue { required, deadline } | CheckpointDecision::Pending { required, deadline } => {
                upsert_pending(&mut book.checkpoints, number, required, balance, deadline, now);
                return;
            }

            CheckpointDecision::Passed {
                required,
                deadline,
                final_checkpoint,
            } => {
                if finalize(&mut book.checkpoints, number, true, required, balance, deadline, now) {
                    record_checkpoint(events, account_id, number, required, balance, true);
                }
                if final_checkpoint {
                    book.account.mark_passed(now);
                    return;
                }
                book.account.current_checkpoint += 1;
            }

            CheckpointDecision::Missed { required, deadline } => {
                if finalize(&mut book.checkpoints, number, false, required, balance, deadline, now) {
                    record_checkpoint(events, account_id, number, required, balance, false);
                }
                book.account.mark_failed(FailureReason::CheckpointMissed, now);
                return;
            }
        }
    }
}

fn record_checkpoint(
    events: &mut Vec<EventPayload>,
    account_id: AccountId,
    checkpoint_number: u32,
    required_balance: Quote,
    checkpoint_balance: Quote,
    passed: bool,
) {
    tracing::info!(
        %account_id,
        checkpoint = checkpoint_number,
        required = %required_balance,
        balance = %checkpoint_balance,
        passed,
        "checkpoint evaluated"
    );
    events.push(EventPayload::CheckpointEvaluated(CheckpointEvaluatedEvent {
        account_id,
        checkpoint_number,
        required_balance,
        checkpoint_balance,
        passed,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, DrawdownRule};
    use crate::types::{Leverage, UserId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn book(num_checkpoints: u32, balance: Decimal) -> AccountBook {
        AccountBook::new(Account {
            id: AccountId(1),
            owner: UserId::new("u"),
            kind: AccountKind::Evaluation,
            created_at: Timestamp::from_millis(0),
            size_base: Quote::new(dec!(5000)),
            virtual_balance: Quote::new(balance),
            high_water_mark: Quote::new(balance.max(dec!(5000))),
            leverage: Leverage::new(dec!(20)).unwrap(),
            max_drawdown: DrawdownRule::Absolute(Quote::new(dec!(500))),
            daily_loss: Quote::zero(),
            num_checkpoints,
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

    fn hours(h: u64) -> Timestamp {
        Timestamp::from_millis(0).plus_hours(h)
    }

    #[test]
    fn catches_up_over_missed_intervals() {
        // 3 checkpoints, both deadlines 1 and 2 are behind us. 6000 clears 5400 but not 6480
        let mut book = book(3, dec!(6000));
        let mut events = Vec::new();
        step_checkpoints(&mut book, hours(50), &mut events);

        assert_eq!(book.account.status, AccountStatus::Failed);
        assert_eq!(book.account.failure_reason, Some(FailureReason::CheckpointMissed));
        assert_eq!(book.account.current_checkpoint, 2);

        let outcomes: Vec<_> = book.checkpoints.iter().map(|c| c.checkpoint_passed).collect();
        assert_eq!(outcomes, vec![Some(true), Some(false)]);
        // second target compounds from the balance recorded at the first, not from the first target
        assert_eq!(book.checkpoints[1].required_balance.value(), dec!(6480));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn advances_without_failing_when_next_deadline_is_ahead() {
        let mut book = book(3, dec!(5500));
        let mut events = Vec::new();
        step_checkpoints(&mut book, hours(30), &mut events);

        assert_eq!(book.account.status, AccountStatus::Active);
        assert_eq!(book.account.current_checkpoint, 2);
        assert_eq!(book.checkpoints.len(), 2);
        assert_eq!(book.checkpoints[1].checkpoint_passed, None);
    }

    #[test]
    fn pending_row_before_deadline() {
        let mut book = book(3, dec!(5100));
        let mut events = Vec::new();
        step_checkpoints(&mut book, hours(1), &mut events);

        assert_eq!(book.account.status, AccountStatus::Active);
        assert_eq!(book.checkpoints.len(), 1);
        assert_eq!(book.checkpoints[0].checkpoint_passed, None);
        assert!(events.is_empty());
    }

    #[test]
    fn eager_final_pass() {
        let mut book = book(1, dec!(5400));
        let mut events = Vec::new();
        step_checkpoints(&mut book, hours(1), &mut events);

        assert_eq!(book.account.status, AccountStatus::Passed);
        assert_eq!(book.account.status_changed_at, Some(hours(1)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn drawdown_wins_over_target() {
        let mut book = book(1, dec!(5400));
        book.account.high_water_mark = Quote::new(dec!(6000));
        let mut events = Vec::new();
        step_checkpoints(&mut book, hours(48), &mut events);

        assert_eq!(book.account.status, AccountStatus::Failed);
        assert_eq!(book.account.failure_reason, Some(FailureReason::Drawdown));
        assert!(book.checkpoints.is_empty());
    }
}
