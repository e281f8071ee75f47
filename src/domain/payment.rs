//! Gateway wire types and result-code classification.
//!
//! Every gateway reply is an envelope `{success, message, resCode, data}`.
//! `"0000"` is the only success code. Transport failures are folded into the
//! same code space as `TIMEOUT`, `NETWORK_ERROR` or `HTTP_{status}` so callers
//! classify a single value.

use super::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SUCCESS_CODE: &str = "0000";
pub const TIMEOUT_CODE: &str = "TIMEOUT";
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

/// Amount charged when verifying a stored card. Cancelled right after.
pub const CARD_VERIFICATION_AMOUNT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Success,
    /// Timeout, network and rate-limit class. Safe to retry with backoff.
    Retryable,
    /// Declined or invalid. Surfaced immediately.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub String);

impl ResultCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn success() -> Self {
        Self::new(SUCCESS_CODE)
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT_CODE)
    }

    pub fn network_error() -> Self {
        Self::new(NETWORK_ERROR_CODE)
    }

    pub fn http(status: u16) -> Self {
        Self(format!("HTTP_{status}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn http_status(&self) -> Option<u16> {
        self.0.strip_prefix("HTTP_")?.parse().ok()
    }

    pub fn classify(&self) -> ResultClass {
        match self.0.as_str() {
            SUCCESS_CODE => ResultClass::Success,
            TIMEOUT_CODE | NETWORK_ERROR_CODE => ResultClass::Retryable,
            // Gateway busy / duplicate-in-progress codes.
            "9001" | "9002" | "9999" => ResultClass::Retryable,
            _ => match self.http_status() {
                Some(408 | 429) => ResultClass::Retryable,
                Some(status) if status >= 500 => ResultClass::Retryable,
                _ => ResultClass::Fatal,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.classify() == ResultClass::Success
    }

    pub fn is_retryable(&self) -> bool {
        self.classify() == ResultClass::Retryable
    }

    /// User-facing text for this code.
    pub fn user_message(&self) -> String {
        if let Some(status) = self.http_status() {
            return match status {
                401 => "Gateway authentication failed".to_string(),
                403 => "Gateway access denied".to_string(),
                404 => "Gateway endpoint not found".to_string(),
                500 => "Gateway internal error".to_string(),
                other => format!("Gateway HTTP error ({other})"),
            };
        }
        match self.0.as_str() {
            SUCCESS_CODE => "Approved".to_string(),
            TIMEOUT_CODE => "The payment request timed out".to_string(),
            NETWORK_ERROR_CODE => "A network error occurred".to_string(),
            "1001" => "The card was declined".to_string(),
            "1002" => "Insufficient card limit".to_string(),
            "1003" => "The card has expired".to_string(),
            "1004" => "Invalid card number".to_string(),
            "2001" => "Invalid payment amount".to_string(),
            "2002" => "The transaction was already cancelled".to_string(),
            "2003" => "The transaction was not found".to_string(),
            "9001" | "9002" => "The gateway is busy, please try again".to_string(),
            other => format!("Unknown payment error ({other})"),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-success gateway outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFailure {
    pub code: ResultCode,
    pub message: String,
}

impl GatewayFailure {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayFailure>;

/// Response envelope shared by every gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub res_code: ResultCode,
    pub data: Option<T>,
}

impl<T> GatewayEnvelope<T> {
    pub fn into_result(self) -> GatewayResult<T> {
        match (self.res_code.is_success(), self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(GatewayFailure::new(
                ResultCode::new("EMPTY_DATA"),
                "Gateway reported success without data",
            )),
            (false, _) => Err(GatewayFailure::new(self.res_code, self.message)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Pc,
    Mobile,
}

/// Merchant fields echoed back through the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopValueInfo {
    /// Deal id.
    pub value1: Option<String>,
    /// Owner id.
    pub value2: Option<String>,
    pub value3: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub track_id: String,
    pub amount: Money,
    pub return_url: String,
    pub goods_name: String,
    pub payer_name: String,
    pub payer_email: String,
    pub payer_tel: String,
    pub device: Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_value_info: Option<ShopValueInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentData {
    pub auth_page_url: String,
    #[serde(default)]
    pub approval_url: Option<String>,
    pub track_id: String,
    pub trx_id: String,
}

/// Payload the gateway posts back after the cardholder authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCallbackData {
    pub trx_id: String,
    pub amount: Money,
    pub authorization_id: String,
    /// The reference sent at create time.
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub shop_value_info: Option<ShopValueInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovePaymentRequest {
    pub trx_id: String,
    pub amount: Money,
    pub authorization_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovePaymentData {
    pub trx_id: String,
    #[serde(default)]
    pub track_id: Option<String>,
    pub amount: Money,
    #[serde(default)]
    pub transaction_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    /// Fresh reference for this cancel attempt.
    pub track_id: String,
    pub root_trx_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentData {
    pub trx_id: String,
    pub track_id: String,
    pub root_trx_id: String,
    pub amount: Money,
    pub remain_amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayTrxStatus {
    Waiting,
    Approved,
    PartialCancelled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub trx_id: String,
    pub status: GatewayTrxStatus,
    pub track_id: String,
    pub amount: Money,
    #[serde(default)]
    pub rdf_amount: Money,
    #[serde(default)]
    pub remain_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingPaymentRequest {
    pub track_id: String,
    pub billing_key: String,
    pub amount: Money,
    pub goods_name: String,
    pub payer_name: String,
    pub payer_email: String,
    pub payer_tel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingPaymentData {
    pub trx_id: String,
    pub track_id: String,
    pub amount: Money,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classification() {
        assert_eq!(ResultCode::success().classify(), ResultClass::Success);
        assert_eq!(ResultCode::timeout().classify(), ResultClass::Retryable);
        assert_eq!(ResultCode::network_error().classify(), ResultClass::Retryable);
        assert_eq!(ResultCode::http(503).classify(), ResultClass::Retryable);
        assert_eq!(ResultCode::http(429).classify(), ResultClass::Retryable);
        assert_eq!(ResultCode::http(401).classify(), ResultClass::Fatal);
        assert_eq!(ResultCode::new("1001").classify(), ResultClass::Fatal);
        assert_eq!(ResultCode::new("HTTP_abc").classify(), ResultClass::Fatal);
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            ResultCode::http(401).user_message(),
            "Gateway authentication failed"
        );
        assert_eq!(ResultCode::http(418).user_message(), "Gateway HTTP error (418)");
        assert_eq!(
            ResultCode::new("7777").user_message(),
            "Unknown payment error (7777)"
        );
    }

    #[test]
    fn test_envelope_success_and_failure() {
        let ok: GatewayEnvelope<CreatePaymentData> = serde_json::from_str(
            r#"{"success":true,"message":"ok","resCode":"0000","data":{"authPageUrl":"https://pay/x","trackId":"D1_P01_1","trxId":"T1"}}"#,
        )
        .unwrap();
        assert_eq!(ok.into_result().unwrap().trx_id, "T1");

        let declined: GatewayEnvelope<ApprovePaymentData> = serde_json::from_str(
            r#"{"success":false,"message":"declined","resCode":"1001","data":null}"#,
        )
        .unwrap();
        let failure = declined.into_result().unwrap_err();
        assert_eq!(failure.code.as_str(), "1001");
        assert_eq!(failure.message, "declined");
    }

    #[test]
    fn test_amounts_serialize_as_strings() {
        let req = CancelPaymentRequest {
            track_id: "D1_R01_1".to_string(),
            root_trx_id: "T1".to_string(),
            amount: Money::new(dec!(100)),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["amount"], "100");
        assert_eq!(json["rootTrxId"], "T1");
    }

    #[test]
    fn test_unknown_trx_status_rejected() {
        let parsed = serde_json::from_str::<GatewayTrxStatus>(r#""REFUNDING""#);
        assert!(parsed.is_err());
    }
}
