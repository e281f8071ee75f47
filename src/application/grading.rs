use crate::application::settings::SettingsService;
use crate::domain::grade::{recompute_grade, reset_monthly_usage};
use crate::domain::ports::DynUserStore;
use crate::domain::settings::SystemSettings;
use crate::domain::user::{Grade, HistoryActor, User};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Counts from one pass over the user population.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingReport {
    pub users: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub failed: usize,
}

impl GradingReport {
    fn record(&mut self, before: Grade, after: Grade) {
        self.users += 1;
        match (before, after) {
            (Grade::Basic, Grade::Platinum) => self.promoted += 1,
            (Grade::Platinum, Grade::Basic) => self.demoted += 1,
            _ => {}
        }
    }
}

/// Monthly quota rollover and tier maintenance.
///
/// Each user is updated independently through the store's atomic modify, so
/// users are processed concurrently and in no particular order.
#[derive(Clone)]
pub struct GradingService {
    users: DynUserStore,
    settings: SettingsService,
}

impl GradingService {
    pub fn new(users: DynUserStore, settings: SettingsService) -> Self {
        Self { users, settings }
    }

    /// Closes the period for every user, then recomputes automatic grades.
    pub async fn run_monthly(&self) -> Result<GradingReport> {
        let settings = self.settings.effective().await?;
        let report = self.for_each_user(settings, true).await?;
        info!(
            users = report.users,
            promoted = report.promoted,
            demoted = report.demoted,
            failed = report.failed,
            "Monthly rollover finished"
        );
        Ok(report)
    }

    /// Recomputes automatic grades without touching usage counters.
    pub async fn recompute_all(&self) -> Result<GradingReport> {
        let settings = self.settings.effective().await?;
        self.for_each_user(settings, false).await
    }

    async fn for_each_user(&self, settings: SystemSettings, reset: bool) -> Result<GradingReport> {
        let users = self.users.all().await?;
        let now = Utc::now();
        let mut tasks = JoinSet::new();
        for user in users {
            let store = self.users.clone();
            tasks.spawn(async move {
                let before = user.grade;
                let result = store
                    .modify(&user.uid, &|u: &mut User| {
                        roll_user(u, &settings, reset, now);
                        Ok(())
                    })
                    .await;
                (user.uid, before, result)
            });
        }

        let mut report = GradingReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (uid, before, result) = joined.map_err(|e| PaymentError::internal(e.to_string()))?;
            match result {
                Ok(updated) => report.record(before, updated.grade),
                // Removed since the snapshot was taken.
                Err(PaymentError::NotFound { .. }) => {}
                Err(e) => {
                    error!(uid, error = %e, "Failed to update user during grading");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Pins a user to `grade` and copies the tier's fee rate and limit.
    pub async fn set_manual_grade(
        &self,
        operator_id: &str,
        uid: &str,
        grade: Grade,
        memo: Option<String>,
    ) -> Result<User> {
        let settings = self.settings.effective().await?;
        let tier = settings.grade_settings.tier(grade);
        let now = Utc::now();
        let memo = memo.unwrap_or_else(|| format!("Set manually by {operator_id}"));
        let user = self
            .users
            .modify(uid, &|u: &mut User| {
                u.apply_grade(grade, tier, HistoryActor::Admin, Some(memo.clone()), now);
                u.is_grade_manual = true;
                Ok(())
            })
            .await?;
        info!(uid, operator_id, %grade, "Grade assigned manually");
        Ok(user)
    }

    /// Returns a user to automatic grading.
    pub async fn clear_manual_grade(&self, uid: &str) -> Result<User> {
        let now = Utc::now();
        self.users
            .modify(uid, &|u: &mut User| {
                u.is_grade_manual = false;
                u.updated_at = now;
                Ok(())
            })
            .await
    }
}

fn roll_user(user: &mut User, settings: &SystemSettings, reset: bool, now: DateTime<Utc>) {
    if reset {
        reset_monthly_usage(user, now);
    }
    recompute_grade(user, settings, now);
}
