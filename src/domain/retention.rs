//! Masked projections kept after an account is closed.

use super::deal::{Deal, DealStatus};
use super::money::{Amount, Money};
use super::user::{Grade, User};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Records are kept for five years after withdrawal.
pub const RETENTION_MONTHS: u32 = 60;

pub fn retention_until(withdrawn_at: DateTime<Utc>) -> DateTime<Utc> {
    withdrawn_at
        .checked_add_months(Months::new(RETENTION_MONTHS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn mask_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    match chars.len() {
        0 => "***".to_string(),
        1 => "*".to_string(),
        2 => format!("{}*", chars[0]),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}

pub fn mask_email(email: &str) -> String {
    if email.is_empty() {
        return "***@***".to_string();
    }
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };
    let kept: String = if local.chars().count() <= 2 {
        local.chars().take(1).collect()
    } else {
        local.chars().take(2).collect()
    };
    format!("{kept}***@{domain}")
}

pub fn mask_phone(phone: &str) -> String {
    if phone.is_empty() {
        return "***-****-****".to_string();
    }
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "***".to_string();
    }
    let last4: String = digits[digits.len() - 4..].iter().collect();
    format!("***-****-{last4}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalReason {
    UserRequest,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawnUser {
    pub uid: String,
    pub masked_name: String,
    pub masked_email: String,
    pub masked_phone: String,
    pub grade: Grade,
    pub joined_at: DateTime<Utc>,
    pub withdrawn_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    pub reason: WithdrawalReason,
}

impl WithdrawnUser {
    pub fn from_user(user: &User, reason: WithdrawalReason, now: DateTime<Utc>) -> Self {
        Self {
            uid: user.uid.clone(),
            masked_name: mask_name(&user.name),
            masked_email: mask_email(user.email.as_deref().unwrap_or_default()),
            masked_phone: mask_phone(&user.phone),
            grade: user.grade,
            joined_at: user.created_at,
            withdrawn_at: now,
            retention_until: retention_until(now),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawnDeal {
    /// `wd_{did}`
    pub wdid: String,
    pub uid: String,
    pub original_did: String,
    pub amount: Amount,
    pub fee_amount: Money,
    pub final_amount: Money,
    pub status: DealStatus,
    pub recipient_name: String,
    pub recipient_bank: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub withdrawn_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
}

impl WithdrawnDeal {
    pub fn key(did: &str) -> String {
        format!("wd_{did}")
    }

    /// Projects a terminal deal. Returns `None` for deals still in flight.
    pub fn from_deal(deal: &Deal, now: DateTime<Utc>) -> Option<Self> {
        if !deal.status.is_terminal() {
            return None;
        }
        Some(Self {
            wdid: Self::key(&deal.did),
            uid: deal.uid.clone(),
            original_did: deal.did.clone(),
            amount: deal.amount,
            fee_amount: deal.fee_amount,
            final_amount: deal.final_amount,
            status: deal.status,
            recipient_name: mask_name(&deal.recipient.account_holder),
            recipient_bank: deal.recipient.bank.clone(),
            created_at: deal.created_at,
            completed_at: deal.transferred_at.unwrap_or(deal.updated_at),
            withdrawn_at: now,
            retention_until: retention_until(now),
        })
    }
}
