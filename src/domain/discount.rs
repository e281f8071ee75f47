use super::money::{Amount, Money};
use super::pricing::DiscountValue;
use super::user::{Grade, User};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the user types a code or the discount is granted as a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Code,
    Coupon,
}

/// A promotional rule, reusable or single-use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    pub name: String,
    /// Redeemable code, stored uppercase.
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    #[serde(flatten)]
    pub value: DiscountValue,
    pub min_amount: Money,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub can_stack: bool,
    pub is_reusable: bool,
    pub is_used: bool,
    pub is_active: bool,
    pub usage_count: u64,
    /// Restricts use to these tiers when non-empty.
    #[serde(default)]
    pub allowed_grades: Vec<Grade>,
    /// Restricts use to these users when non-empty.
    #[serde(default)]
    pub target_user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Discount {
    /// Normalizes a user-entered code for lookup.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Validates that this discount may be applied to `principal` for `user`.
    pub fn check_eligibility(
        &self,
        principal: Amount,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.is_active {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} is not active",
                self.id
            )));
        }
        if now < self.starts_at {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} is not valid yet",
                self.id
            )));
        }
        if now > self.expires_at {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} has expired",
                self.id
            )));
        }
        if principal.money() < self.min_amount {
            return Err(PaymentError::DiscountRejected(format!(
                "minimum order amount is {}",
                self.min_amount
            )));
        }
        if !self.is_reusable && self.is_used {
            return Err(PaymentError::DiscountAlreadyUsed(self.id.clone()));
        }
        if !self.allowed_grades.is_empty() && !self.allowed_grades.contains(&user.grade) {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} is not available for the {} tier",
                self.id, user.grade
            )));
        }
        if !self.target_user_ids.is_empty() && !self.target_user_ids.contains(&user.uid) {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} is not issued to this account",
                self.id
            )));
        }
        Ok(())
    }

    /// Records one application. Stores call this under their own guard so the
    /// used-flag flip of a single-use discount happens at most once.
    pub fn record_use(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if !self.is_reusable && self.is_used {
            return Err(PaymentError::DiscountAlreadyUsed(self.id.clone()));
        }
        self.usage_count += 1;
        if !self.is_reusable {
            self.is_used = true;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Undoes one `record_use` whose deal write did not go through.
    pub fn release_use(&mut self, now: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_sub(1);
        if !self.is_reusable {
            self.is_used = false;
        }
        self.updated_at = now;
    }

    /// The reference stored on a deal that used this discount.
    pub fn reference(&self) -> String {
        self.code.clone().unwrap_or_else(|| self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::GradeSettings;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn discount(now: DateTime<Utc>) -> Discount {
        Discount {
            id: "DSC1".to_string(),
            name: "Welcome".to_string(),
            code: Some("WELCOME10".to_string()),
            kind: DiscountKind::Code,
            value: DiscountValue::FeePercent(dec!(10)),
            min_amount: Money::new(dec!(100_000)),
            starts_at: now - Duration::days(1),
            expires_at: now + Duration::days(30),
            can_stack: false,
            is_reusable: false,
            is_used: false,
            is_active: true,
            usage_count: 0,
            allowed_grades: vec![],
            target_user_ids: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn user(now: DateTime<Utc>) -> User {
        User::new(
            "U1",
            "Lee",
            None,
            "01000000000",
            Grade::Basic,
            GradeSettings::default().basic,
            now,
        )
    }

    fn principal(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn test_eligible_discount() {
        let now = Utc::now();
        assert!(
            discount(now)
                .check_eligibility(principal(dec!(500_000)), &user(now), now)
                .is_ok()
        );
    }

    #[test]
    fn test_expired_and_not_started() {
        let now = Utc::now();
        let mut d = discount(now);
        d.expires_at = now - Duration::hours(1);
        assert!(matches!(
            d.check_eligibility(principal(dec!(500_000)), &user(now), now),
            Err(PaymentError::DiscountRejected(_))
        ));

        let mut d = discount(now);
        d.starts_at = now + Duration::hours(1);
        assert!(matches!(
            d.check_eligibility(principal(dec!(500_000)), &user(now), now),
            Err(PaymentError::DiscountRejected(_))
        ));
    }

    #[test]
    fn test_minimum_amount() {
        let now = Utc::now();
        let err = discount(now)
            .check_eligibility(principal(dec!(99_999)), &user(now), now)
            .unwrap_err();
        assert!(err.to_string().contains("100000"));
    }

    #[test]
    fn test_grade_and_user_restrictions() {
        let now = Utc::now();
        let mut d = discount(now);
        d.allowed_grades = vec![Grade::Platinum];
        assert!(
            d.check_eligibility(principal(dec!(500_000)), &user(now), now)
                .is_err()
        );

        let mut d = discount(now);
        d.target_user_ids = vec!["U2".to_string()];
        assert!(
            d.check_eligibility(principal(dec!(500_000)), &user(now), now)
                .is_err()
        );
    }

    #[test]
    fn test_single_use_discount_is_consumed_once() {
        let now = Utc::now();
        let mut d = discount(now);
        d.record_use(now).unwrap();
        assert!(d.is_used);
        assert_eq!(d.usage_count, 1);
        assert!(matches!(
            d.record_use(now),
            Err(PaymentError::DiscountAlreadyUsed(_))
        ));
        assert!(matches!(
            d.check_eligibility(principal(dec!(500_000)), &user(now), now),
            Err(PaymentError::DiscountAlreadyUsed(_))
        ));
    }

    #[test]
    fn test_reusable_discount_counts_without_flag() {
        let now = Utc::now();
        let mut d = discount(now);
        d.is_reusable = true;
        d.record_use(now).unwrap();
        d.record_use(now).unwrap();
        assert!(!d.is_used);
        assert_eq!(d.usage_count, 2);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(Discount::normalize_code(" welcome10 "), "WELCOME10");
    }
}
