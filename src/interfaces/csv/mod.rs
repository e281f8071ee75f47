//! Flat CSV form of user accounts for the batch CLI.

pub mod user_reader;
pub mod user_writer;

use crate::domain::money::{FeeRate, Money};
use crate::domain::settings::TierSettings;
use crate::domain::user::{Grade, User, UserStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CSV row. Column order is the header order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: String,
    pub status: UserStatus,
    pub grade: Grade,
    pub fee_rate: FeeRate,
    pub is_grade_manual: bool,
    pub monthly_limit: Money,
    pub used_amount: Money,
    pub last_month_payment_amount: Money,
}

impl UserRecord {
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        let tier = TierSettings {
            fee_rate: self.fee_rate,
            monthly_limit: self.monthly_limit,
        };
        let mut user = User::new(
            self.uid,
            self.name,
            self.email.filter(|e| !e.is_empty()),
            self.phone,
            self.grade,
            tier,
            now,
        );
        user.status = self.status;
        user.is_grade_manual = self.is_grade_manual;
        user.used_amount = self.used_amount;
        user.last_month_payment_amount = self.last_month_payment_amount;
        user
    }
}

impl From<&User> for UserRecord {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            status: user.status,
            grade: user.grade,
            fee_rate: user.fee_rate,
            is_grade_manual: user.is_grade_manual,
            monthly_limit: user.monthly_limit,
            used_amount: user.used_amount,
            last_month_payment_amount: user.last_month_payment_amount,
        }
    }
}
