//! Tier settings and their layered resolution.
//!
//! Effective settings are built from three layers applied in a fixed order:
//! built-in defaults, then the persisted override, then a request-supplied
//! override. Each nested section (grade settings, grade criteria) is merged
//! field by field, so a layer only replaces the values it actually carries.

use super::money::{FeeRate, Money};
use super::user::Grade;
use crate::error::PaymentError;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSettings {
    pub fee_rate: FeeRate,
    pub monthly_limit: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSettings {
    pub basic: TierSettings,
    pub platinum: TierSettings,
    pub b2b: TierSettings,
    pub employee: TierSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCriteria {
    /// Last-month payments at or above this promote basic to platinum.
    pub platinum_threshold: Money,
    /// Last-month payments below this demote platinum to basic.
    pub basic_threshold: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    pub grade_settings: GradeSettings,
    pub grade_criteria: GradeCriteria,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TierOverride {
    pub fee_rate: Option<FeeRate>,
    pub monthly_limit: Option<Money>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradeSettingsOverride {
    pub basic: Option<TierOverride>,
    pub platinum: Option<TierOverride>,
    pub b2b: Option<TierOverride>,
    pub employee: Option<TierOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradeCriteriaOverride {
    pub platinum_threshold: Option<Money>,
    pub basic_threshold: Option<Money>,
}

/// A partial settings layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsOverride {
    #[serde(default)]
    pub grade_settings: GradeSettingsOverride,
    #[serde(default)]
    pub grade_criteria: GradeCriteriaOverride,
}

impl Default for GradeSettings {
    fn default() -> Self {
        let tier = |fee: rust_decimal::Decimal, limit: rust_decimal::Decimal| TierSettings {
            fee_rate: FeeRate::from_trusted(fee),
            monthly_limit: Money::new(limit),
        };
        Self {
            basic: tier(dec!(4.0), dec!(10_000_000)),
            platinum: tier(dec!(3.5), dec!(30_000_000)),
            b2b: tier(dec!(3.0), dec!(100_000_000)),
            employee: tier(dec!(1.0), dec!(100_000_000)),
        }
    }
}

impl Default for GradeCriteria {
    fn default() -> Self {
        Self {
            platinum_threshold: Money::new(dec!(10_000_000)),
            basic_threshold: Money::new(dec!(5_000_000)),
        }
    }
}

impl GradeSettings {
    pub fn tier(&self, grade: Grade) -> TierSettings {
        match grade {
            Grade::Basic => self.basic,
            Grade::Platinum => self.platinum,
            Grade::B2b => self.b2b,
            Grade::Employee => self.employee,
        }
    }
}

impl TierSettings {
    fn apply(&mut self, layer: &TierOverride) {
        if let Some(fee_rate) = layer.fee_rate {
            self.fee_rate = fee_rate;
        }
        if let Some(limit) = layer.monthly_limit {
            self.monthly_limit = limit;
        }
    }
}

impl SystemSettings {
    /// Resolves defaults followed by each layer in order, later layers winning.
    pub fn resolve(layers: &[&SettingsOverride]) -> Result<Self, PaymentError> {
        let mut settings = Self::default();
        for layer in layers {
            settings.apply(layer);
        }
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&mut self, layer: &SettingsOverride) {
        let grades = &layer.grade_settings;
        let targets = [
            (&mut self.grade_settings.basic, &grades.basic),
            (&mut self.grade_settings.platinum, &grades.platinum),
            (&mut self.grade_settings.b2b, &grades.b2b),
            (&mut self.grade_settings.employee, &grades.employee),
        ];
        for (tier, tier_layer) in targets {
            if let Some(tier_layer) = tier_layer {
                tier.apply(tier_layer);
            }
        }

        let criteria = &layer.grade_criteria;
        if let Some(threshold) = criteria.platinum_threshold {
            self.grade_criteria.platinum_threshold = threshold;
        }
        if let Some(threshold) = criteria.basic_threshold {
            self.grade_criteria.basic_threshold = threshold;
        }
    }

    fn validate(&self) -> Result<(), PaymentError> {
        let criteria = &self.grade_criteria;
        if criteria.basic_threshold > criteria.platinum_threshold {
            return Err(PaymentError::Validation(format!(
                "basicThreshold ({}) must not exceed platinumThreshold ({})",
                criteria.basic_threshold, criteria.platinum_threshold
            )));
        }
        if criteria.basic_threshold < Money::ZERO {
            return Err(PaymentError::Validation(
                "Grade thresholds must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl SettingsOverride {
    /// Folds `newer` on top of `self`, producing a single layer.
    pub fn merged_with(&self, newer: &SettingsOverride) -> SettingsOverride {
        fn tier(old: Option<TierOverride>, new: Option<TierOverride>) -> Option<TierOverride> {
            match (old, new) {
                (None, None) => None,
                (Some(t), None) | (None, Some(t)) => Some(t),
                (Some(o), Some(n)) => Some(TierOverride {
                    fee_rate: n.fee_rate.or(o.fee_rate),
                    monthly_limit: n.monthly_limit.or(o.monthly_limit),
                }),
            }
        }
        let (old, new) = (&self.grade_settings, &newer.grade_settings);
        SettingsOverride {
            grade_settings: GradeSettingsOverride {
                basic: tier(old.basic, new.basic),
                platinum: tier(old.platinum, new.platinum),
                b2b: tier(old.b2b, new.b2b),
                employee: tier(old.employee, new.employee),
            },
            grade_criteria: GradeCriteriaOverride {
                platinum_threshold: newer
                    .grade_criteria
                    .platinum_threshold
                    .or(self.grade_criteria.platinum_threshold),
                basic_threshold: newer
                    .grade_criteria
                    .basic_threshold
                    .or(self.grade_criteria.basic_threshold),
            },
        }
    }
}
