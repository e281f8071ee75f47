//! Operator console endpoints.
//!
//! Requests are routed through one table keyed by resource, method and
//! whether an identifier is present. Any combination missing from the table
//! answers 405 without touching a service.

use crate::application::checkout::PaymentOrchestrator;
use crate::application::deals::DealService;
use crate::application::grading::GradingService;
use crate::application::settings::SettingsService;
use crate::domain::deal::{DealEdit, StatusChange};
use crate::domain::money::Money;
use crate::domain::settings::SettingsOverride;
use crate::domain::user::Grade;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FromStr for Method {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(PaymentError::MethodNotAllowed(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// `/deals[/{did}]`
    Deal,
    /// `/deals/{did}/status`
    DealStatus,
    /// `/deals/{did}/payment`
    DealPayment,
    /// `/users/{uid}/grade`
    UserGrade,
    /// `/settings`
    Settings,
}

/// A parsed console request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleRequest {
    pub method: Method,
    pub resource: Resource,
    pub id: Option<String>,
    pub body: Option<Value>,
}

impl ConsoleRequest {
    pub fn parse(method: &str, path: &str, body: Option<Value>) -> Result<Self> {
        let method = method.parse()?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (resource, id) = match segments.as_slice() {
            ["deals"] => (Resource::Deal, None),
            ["deals", did] => (Resource::Deal, Some(did)),
            ["deals", did, "status"] => (Resource::DealStatus, Some(did)),
            ["deals", did, "payment"] => (Resource::DealPayment, Some(did)),
            ["users", uid, "grade"] => (Resource::UserGrade, Some(uid)),
            ["settings"] => (Resource::Settings, None),
            _ => return Err(PaymentError::not_found("Route", path)),
        };
        Ok(Self {
            method,
            resource,
            id: id.map(|s| s.to_string()),
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    GetDeal,
    EditDeal,
    ChangeStatus,
    CancelPayment,
    SetGrade,
    GetSettings,
    UpdateSettings,
}

/// The dispatch table.
fn route(resource: Resource, method: Method, has_id: bool) -> Option<Route> {
    use Method::*;
    use Resource::*;
    match (resource, method, has_id) {
        (Deal, Get, true) => Some(Route::GetDeal),
        (Deal, Patch, true) => Some(Route::EditDeal),
        (DealStatus, Put, true) => Some(Route::ChangeStatus),
        (DealPayment, Delete, true) => Some(Route::CancelPayment),
        (UserGrade, Put, true) => Some(Route::SetGrade),
        (Settings, Get, false) => Some(Route::GetSettings),
        (Settings, Put, false) => Some(Route::UpdateSettings),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CancelBody {
    amount: Option<Money>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GradeBody {
    grade: Grade,
    memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleResponse {
    pub status: u16,
    pub body: Value,
}

impl ConsoleResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn from_error(e: &PaymentError) -> Self {
        let status = e.status_code();
        if status >= 500 {
            error!(error = %e, "Console request failed");
        }
        let mut body = json!({ "error": e.public_message() });
        if let PaymentError::ActiveDeals { count } = e {
            body["activeDeals"] = json!(count);
        }
        Self { status, body }
    }
}

fn parse_body<T: DeserializeOwned>(body: Option<Value>) -> Result<T> {
    let body = body.ok_or_else(|| PaymentError::Validation("request body is required".to_string()))?;
    Ok(serde_json::from_value(body)?)
}

#[derive(Clone)]
pub struct OperatorConsole {
    deals: DealService,
    payments: PaymentOrchestrator,
    grading: GradingService,
    settings: SettingsService,
}

impl OperatorConsole {
    pub fn new(
        deals: DealService,
        payments: PaymentOrchestrator,
        grading: GradingService,
        settings: SettingsService,
    ) -> Self {
        Self {
            deals,
            payments,
            grading,
            settings,
        }
    }

    /// Runs a request for `operator_id`. Errors become status and message.
    pub async fn handle(&self, operator_id: &str, request: ConsoleRequest) -> ConsoleResponse {
        match self.dispatch(operator_id, request).await {
            Ok(body) => ConsoleResponse::ok(body),
            Err(e) => ConsoleResponse::from_error(&e),
        }
    }

    async fn dispatch(&self, operator_id: &str, request: ConsoleRequest) -> Result<Value> {
        let ConsoleRequest {
            method,
            resource,
            id,
            body,
        } = request;
        let Some(route) = route(resource, method, id.is_some()) else {
            return Err(PaymentError::MethodNotAllowed(format!(
                "{method} on {resource:?}"
            )));
        };
        let id = id.unwrap_or_default();

        let value = match route {
            Route::GetDeal => serde_json::to_value(self.deals.get(&id).await?)?,
            Route::EditDeal => {
                let edit: DealEdit = parse_body(body)?;
                serde_json::to_value(self.deals.edit_by_operator(operator_id, &id, edit).await?)?
            }
            Route::ChangeStatus => {
                let change: StatusChange = parse_body(body)?;
                serde_json::to_value(self.deals.change_status(operator_id, &id, change).await?)?
            }
            Route::CancelPayment => {
                let cancel: CancelBody = match body {
                    Some(body) => serde_json::from_value(body)?,
                    None => CancelBody::default(),
                };
                let refund = self
                    .payments
                    .cancel_payment(operator_id, &id, cancel.amount, cancel.reason)
                    .await?;
                json!({
                    "refundTransactionId": refund.refund_trx_id,
                    "amount": refund.amount,
                    "remainAmount": refund.remaining,
                    "deal": refund.deal,
                })
            }
            Route::SetGrade => {
                let grade: GradeBody = parse_body(body)?;
                let user = self
                    .grading
                    .set_manual_grade(operator_id, &id, grade.grade, grade.memo)
                    .await?;
                json!({
                    "uid": user.uid,
                    "grade": user.grade,
                    "feeRate": user.fee_rate,
                    "monthlyLimit": user.monthly_limit,
                    "isGradeManual": user.is_grade_manual,
                })
            }
            Route::GetSettings => serde_json::to_value(self.settings.effective().await?)?,
            Route::UpdateSettings => {
                let layer: SettingsOverride = parse_body(body)?;
                serde_json::to_value(self.settings.update(layer).await?)?
            }
        };
        Ok(value)
    }
}
