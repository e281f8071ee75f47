use super::money::Money;
use super::settings::SystemSettings;
use super::user::{Grade, HistoryActor, User};
use chrono::{DateTime, Utc};

/// Closes the current period: last month's total becomes the usage so far,
/// and usage restarts at zero.
pub fn reset_monthly_usage(user: &mut User, now: DateTime<Utc>) {
    user.last_month_payment_amount = user.used_amount;
    user.used_amount = Money::ZERO;
    user.updated_at = now;
}

/// The grade a user should hold given last month's payments, or `None` when
/// the account is exempt or already on the right tier.
///
/// Promotion and demotion use different thresholds so an account hovering
/// around one value does not flap between tiers.
pub fn target_grade(user: &User, settings: &SystemSettings) -> Option<Grade> {
    if user.is_grade_manual || user.grade.is_fixed() {
        return None;
    }
    let criteria = &settings.grade_criteria;
    let paid = user.last_month_payment_amount;
    match user.grade {
        Grade::Basic if paid >= criteria.platinum_threshold => Some(Grade::Platinum),
        Grade::Platinum if paid < criteria.basic_threshold => Some(Grade::Basic),
        _ => None,
    }
}

/// Applies an automatic tier change. Returns the new grade when one happened.
pub fn recompute_grade(
    user: &mut User,
    settings: &SystemSettings,
    now: DateTime<Utc>,
) -> Option<Grade> {
    let grade = target_grade(user, settings)?;
    let memo = format!(
        "Monthly review: last month {} ({} -> {})",
        user.last_month_payment_amount,
        user.grade.label(),
        grade.label()
    );
    user.apply_grade(
        grade,
        settings.grade_settings.tier(grade),
        HistoryActor::System,
        Some(memo),
        now,
    );
    Some(grade)
}
