use super::money::{FeeRate, Money};
use super::settings::TierSettings;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
    PendingVerification,
    Withdrawn,
}

/// Tier that determines a user's fee rate and monthly limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Basic,
    Platinum,
    B2b,
    Employee,
}

impl Grade {
    pub fn label(&self) -> &'static str {
        match self {
            Grade::Basic => "Basic",
            Grade::Platinum => "Platinum",
            Grade::B2b => "B2B",
            Grade::Employee => "Employee",
        }
    }

    /// Tiers assigned administratively and never recomputed automatically.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Grade::B2b | Grade::Employee)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryActor {
    Member,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryField {
    Signup,
    Status,
    Grade,
    FeeRate,
    MonthlyLimit,
}

/// One entry of the append-only account history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHistoryEntry {
    pub field: HistoryField,
    pub prev_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: HistoryActor,
    pub memo: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An account holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub status: UserStatus,
    pub grade: Grade,
    pub fee_rate: FeeRate,
    /// Exempts the account from automatic grade recomputation.
    pub is_grade_manual: bool,
    pub monthly_limit: Money,
    pub used_amount: Money,
    pub last_month_payment_amount: Money,
    pub total_payment_amount: Money,
    pub total_deal_count: u64,
    pub history: Vec<UserHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates an active account on the given tier.
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        email: Option<String>,
        phone: impl Into<String>,
        grade: Grade,
        tier: TierSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            email,
            phone: phone.into(),
            status: UserStatus::Active,
            grade,
            fee_rate: tier.fee_rate,
            is_grade_manual: false,
            monthly_limit: tier.monthly_limit,
            used_amount: Money::ZERO,
            last_month_payment_amount: Money::ZERO,
            total_payment_amount: Money::ZERO,
            total_deal_count: 0,
            history: vec![UserHistoryEntry {
                field: HistoryField::Signup,
                prev_value: None,
                new_value: Some(grade.label().to_string()),
                actor: HistoryActor::Member,
                memo: None,
                timestamp: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_limit(&self) -> Money {
        self.monthly_limit.saturating_sub(self.used_amount)
    }

    /// Rejects accounts that may not open or pay for deals.
    pub fn ensure_can_transact(&self) -> Result<(), PaymentError> {
        match self.status {
            UserStatus::Active => Ok(()),
            UserStatus::Suspended => Err(PaymentError::Forbidden(
                "Account is suspended".to_string(),
            )),
            UserStatus::Withdrawn => Err(PaymentError::Forbidden(
                "Account has been withdrawn".to_string(),
            )),
            UserStatus::Pending | UserStatus::PendingVerification => Err(
                PaymentError::Forbidden("Account is not verified yet".to_string()),
            ),
        }
    }

    /// Checks the advisory monthly limit for an additional spend.
    pub fn ensure_within_limit(&self, amount: Money) -> Result<(), PaymentError> {
        let remaining = self.remaining_limit();
        if amount > remaining {
            return Err(PaymentError::Validation(format!(
                "Monthly limit exceeded, remaining limit: {remaining}"
            )));
        }
        Ok(())
    }

    /// Adds a settled payment to the usage counters.
    pub fn record_payment(&mut self, amount: Money, now: DateTime<Utc>) {
        self.used_amount += amount;
        self.total_payment_amount += amount;
        self.total_deal_count += 1;
        self.updated_at = now;
    }

    /// Moves to `grade` with the tier's fee rate and limit, appending the grade
    /// entry first and fee/limit entries only when the value changes.
    pub fn apply_grade(
        &mut self,
        grade: Grade,
        tier: TierSettings,
        actor: HistoryActor,
        memo: Option<String>,
        now: DateTime<Utc>,
    ) {
        let tier_memo = format!("{} tier applied", grade.label());
        self.history.push(UserHistoryEntry {
            field: HistoryField::Grade,
            prev_value: Some(self.grade.label().to_string()),
            new_value: Some(grade.label().to_string()),
            actor,
            memo,
            timestamp: now,
        });
        if self.fee_rate != tier.fee_rate {
            self.history.push(UserHistoryEntry {
                field: HistoryField::FeeRate,
                prev_value: Some(self.fee_rate.to_string()),
                new_value: Some(tier.fee_rate.to_string()),
                actor,
                memo: Some(tier_memo.clone()),
                timestamp: now,
            });
        }
        if self.monthly_limit != tier.monthly_limit {
            self.history.push(UserHistoryEntry {
                field: HistoryField::MonthlyLimit,
                prev_value: Some(self.monthly_limit.to_string()),
                new_value: Some(tier.monthly_limit.to_string()),
                actor,
                memo: Some(tier_memo),
                timestamp: now,
            });
        }
        self.grade = grade;
        self.fee_rate = tier.fee_rate;
        self.monthly_limit = tier.monthly_limit;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::GradeSettings;
    use rust_decimal_macros::dec;

    fn basic_user() -> User {
        let settings = GradeSettings::default();
        User::new(
            "U1",
            "Kim Minsu",
            Some("minsu@example.com".to_string()),
            "010-1234-5678",
            Grade::Basic,
            settings.basic,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_user_takes_tier_settings() {
        let user = basic_user();
        assert_eq!(user.fee_rate.percent(), dec!(4.0));
        assert_eq!(user.monthly_limit, Money::new(dec!(10_000_000)));
        assert_eq!(user.history.len(), 1);
        assert_eq!(user.history[0].field, HistoryField::Signup);
    }

    #[test]
    fn test_limit_check() {
        let mut user = basic_user();
        user.used_amount = Money::new(dec!(9_500_000));
        assert!(user.ensure_within_limit(Money::new(dec!(500_000))).is_ok());
        let err = user
            .ensure_within_limit(Money::new(dec!(500_001)))
            .unwrap_err();
        assert!(err.to_string().contains("500000"));
    }

    #[test]
    fn test_suspended_user_cannot_transact() {
        let mut user = basic_user();
        user.status = UserStatus::Suspended;
        assert!(matches!(
            user.ensure_can_transact(),
            Err(PaymentError::Forbidden(_))
        ));
    }

    #[test]
    fn test_apply_grade_history_order() {
        let mut user = basic_user();
        let settings = GradeSettings::default();
        user.apply_grade(
            Grade::Platinum,
            settings.platinum,
            HistoryActor::System,
            None,
            Utc::now(),
        );
        let fields: Vec<_> = user.history.iter().skip(1).map(|h| h.field).collect();
        assert_eq!(
            fields,
            vec![
                HistoryField::Grade,
                HistoryField::FeeRate,
                HistoryField::MonthlyLimit
            ]
        );
        assert_eq!(user.grade, Grade::Platinum);
        assert_eq!(user.fee_rate.percent(), dec!(3.5));
    }

    #[test]
    fn test_record_payment_updates_counters() {
        let mut user = basic_user();
        user.record_payment(Money::new(dec!(1_055_000)), Utc::now());
        assert_eq!(user.used_amount, Money::new(dec!(1_055_000)));
        assert_eq!(user.total_payment_amount, Money::new(dec!(1_055_000)));
        assert_eq!(user.total_deal_count, 1);
    }
}
