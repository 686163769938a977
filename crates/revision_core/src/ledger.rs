//! crates/revision_core/src/ledger.rs
//!
//! The usage ledger: a credit-metered gate in front of every AI-backed
//! action. Spendable credits are reserved through the repository's atomic
//! check-and-deduct; per-day allowances are computed by summing the day's
//! ledger entries, so they reset at midnight UTC without any reset job.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::domain::{MeteredAction, UsageRecord};
use crate::error::PracticeError;
use crate::ports::{DebitOutcome, RepositoryService};

/// Per-action pricing and allowance configuration. Costs are deliberately
/// configuration rather than derived values.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    /// Credits charged for one grading run.
    pub grading_cost: u32,
    /// Credits recorded per chat message.
    pub chat_cost: u32,
    /// Free-tier balance granted when a user's account is lazily created.
    pub default_balance: u32,
    /// Maximum chat messages per UTC day.
    pub chat_daily_cap: u32,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            grading_cost: 5,
            chat_cost: 1,
            default_balance: 50,
            chat_daily_cap: 20,
        }
    }
}

/// Tracks per-user consumption and enforces quotas before metered actions.
#[derive(Clone)]
pub struct UsageLedger {
    repo: Arc<dyn RepositoryService>,
    policy: CreditPolicy,
}

impl UsageLedger {
    pub fn new(repo: Arc<dyn RepositoryService>, policy: CreditPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &CreditPolicy {
        &self.policy
    }

    fn cost_of(&self, action: MeteredAction) -> u32 {
        match action {
            MeteredAction::GradeSubmission => self.policy.grading_cost,
            MeteredAction::ChatMessage => self.policy.chat_cost,
        }
    }

    /// Reserves the credits for `action`, appending the ledger entry in the
    /// same storage transaction as the deduction.
    ///
    /// The allowance lookup fails open: a user without an account gets one
    /// with the free-tier balance. The reserve itself fails closed once that
    /// balance is exhausted, returning `QuotaExceeded` without any charge.
    pub async fn reserve(
        &self,
        user_id: Uuid,
        action: MeteredAction,
        session_id: Option<Uuid>,
    ) -> Result<(), PracticeError> {
        let cost = self.cost_of(action);
        self.repo
            .get_or_create_credit_account(user_id, self.policy.default_balance)
            .await?;

        let record = UsageRecord::new(user_id, action, cost, session_id);
        match self.repo.deduct_credits(user_id, cost, record).await? {
            DebitOutcome::Granted => {
                info!(%user_id, %action, cost, "Reserved credits for metered action.");
                Ok(())
            }
            DebitOutcome::Denied => Err(PracticeError::QuotaExceeded(action)),
        }
    }

    /// Checks the coarser count-per-day allowance for `action` without
    /// reserving anything. Used for lighter-weight actions (chat messages)
    /// that are capped per UTC day rather than priced against a balance.
    pub async fn check_daily_allowance(
        &self,
        user_id: Uuid,
        action: MeteredAction,
    ) -> Result<(), PracticeError> {
        let cap = match action {
            MeteredAction::ChatMessage => self.policy.chat_daily_cap * self.policy.chat_cost,
            MeteredAction::GradeSubmission => {
                // Grading is balance-metered, not day-capped.
                return Ok(());
            }
        };

        let spent = self
            .repo
            .sum_usage_since(user_id, action, start_of_utc_day(Utc::now()))
            .await?;
        if spent >= cap {
            return Err(PracticeError::QuotaExceeded(action));
        }
        Ok(())
    }

    /// Appends a ledger entry for an allowance-gated action that succeeded.
    pub async fn record(
        &self,
        user_id: Uuid,
        action: MeteredAction,
        session_id: Option<Uuid>,
    ) -> Result<(), PracticeError> {
        let record = UsageRecord::new(user_id, action, self.cost_of(action), session_id);
        self.repo.insert_usage_record(record).await?;
        Ok(())
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(now.date_naive().and_time(NaiveTime::MIN), Utc)
}
