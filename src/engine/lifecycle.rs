//! Funded account provisioning for passed evaluations.

use super::core::Engine;
use super::results::EngineError;
use crate::account::Account;
use crate::events::{EventPayload, FundedAccountProvisionedEvent, ProvisioningFailedEvent};
use crate::lifecycle::derive_funded_account;
use crate::store::{AccountBook, AccountStore};
use crate::types::{AccountId, Quote};

enum Provisioned {
    Existing(AccountId),
    New(Account),
}

impl<S: AccountStore> Engine<S> {
    /// Provision the funded account for a passed evaluation and link the two.
    /// Idempotent: an evaluation that already has a funded account returns it.
    pub fn on_passed(&self, evaluation_id: AccountId) -> Result<Account, EngineError> {
        let now = self.now();
        let funded_config = &self.config.platform.funded;

        let provisioned = self.store.transact(evaluation_id, |book| -> Result<Provisioned, EngineError> {
            if let Some(existing) = book.account.funded_account {
                return Ok(Provisioned::Existing(existing));
            }

            let funded_id = self.store.next_account_id();
            let funded = derive_funded_account(&book.account, funded_id, funded_config, now)?;

            // the funded record lands before the link; if the insert fails the evaluation is untouched
            self.store.insert(AccountBook::new(funded.clone()))?;
            book.account.funded_account = Some(funded_id);
            Ok(Provisioned::New(funded))
        })?;

        let funded = match provisioned {
            Provisioned::New(funded) => funded,
            Provisioned::Existing(existing) => return self.get_account(existing),
        };

        let margin_requirement = funded.margin_requirement.unwrap_or_else(Quote::zero);
        tracing::info!(
            evaluation_account = %evaluation_id,
            funded_account = %funded.id,
            notional = %funded.size_base,
            %margin_requirement,
            "funded account provisioned"
        );
        self.record(
            now,
            vec![EventPayload::FundedAccountProvisioned(FundedAccountProvisionedEvent {
                evaluation_account: evaluation_id,
                funded_account: funded.id,
                notional: funded.size_base,
                margin_requirement,
            })],
        );

        Ok(funded)
    }

    /// Operator entry point, also used right after a pass. A failure is logged and
    /// recorded for manual follow-up; the evaluation stays `passed` either way.
    pub fn retry_provisioning(&self, evaluation_id: AccountId) -> Result<Account, EngineError> {
        self.on_passed(evaluation_id).map_err(|err| {
            tracing::error!(
                evaluation_account = %evaluation_id,
                error = %err,
                "funded account provisioning failed, needs manual follow-up"
            );
            self.record(
                self.now(),
                vec![EventPayload::ProvisioningFailed(ProvisioningFailedEvent {
                    evaluation_account: evaluation_id,
                    reason: err.to_string(),
                })],
            );
            err
        })
    }
}
