//! HTTP adapter for the card gateway.

use crate::config::GatewayConfig;
use crate::domain::payment::{
    ApprovePaymentData, ApprovePaymentRequest, BillingPaymentData, BillingPaymentRequest,
    CancelPaymentData, CancelPaymentRequest, CreatePaymentData, CreatePaymentRequest,
    GatewayEnvelope, GatewayFailure, GatewayResult, ResultCode, StatusData,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const CREATE_PATH: &str = "/api/webpay/create";
const APPROVE_PATH: &str = "/api/approval";
const CANCEL_PATH: &str = "/api/refund";
const STATUS_PATH: &str = "/api/trxStatus";
const BILLING_PATH: &str = "/api/billing/pay";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    trx_id: &'a str,
}

/// Talks JSON to the gateway with the shared pay key in `Authorization`.
///
/// Transport problems are reported in the gateway's own code space
/// (`TIMEOUT`, `NETWORK_ERROR`, `HTTP_{status}`) so the orchestrator
/// classifies every failure the same way.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| PaymentError::Internal(Box::new(e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, T>(&self, path: &'static str, body: &B, timeout: Duration) -> GatewayResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .header(AUTHORIZATION, &self.config.pay_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            debug!(path, status = status.as_u16(), "Gateway HTTP error");
            return Err(GatewayFailure::new(
                ResultCode::http(status.as_u16()),
                format!("gateway answered HTTP {status}"),
            ));
        }
        let envelope: GatewayEnvelope<T> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_failure(e)
            } else {
                GatewayFailure::new(ResultCode::new("INVALID_RESPONSE"), e.to_string())
            }
        })?;
        debug!(path, code = %envelope.res_code, "Gateway responded");
        envelope.into_result()
    }
}

fn transport_failure(e: reqwest::Error) -> GatewayFailure {
    let code = if e.is_timeout() {
        ResultCode::timeout()
    } else if let Some(status) = e.status() {
        ResultCode::http(status.as_u16())
    } else {
        ResultCode::network_error()
    };
    GatewayFailure::new(code, e.to_string())
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create(&self, request: &CreatePaymentRequest) -> GatewayResult<CreatePaymentData> {
        self.post(CREATE_PATH, request, self.config.create_timeout())
            .await
    }

    async fn approve(&self, request: &ApprovePaymentRequest) -> GatewayResult<ApprovePaymentData> {
        self.post(APPROVE_PATH, request, self.config.approve_timeout())
            .await
    }

    async fn cancel(&self, request: &CancelPaymentRequest) -> GatewayResult<CancelPaymentData> {
        self.post(CANCEL_PATH, request, self.config.cancel_timeout())
            .await
    }

    async fn status(&self, trx_id: &str) -> GatewayResult<StatusData> {
        self.post(
            STATUS_PATH,
            &StatusRequest { trx_id },
            self.config.status_timeout(),
        )
        .await
    }

    async fn pay_with_billing_key(
        &self,
        request: &BillingPaymentRequest,
    ) -> GatewayResult<BillingPaymentData> {
        self.post(BILLING_PATH, request, self.config.approve_timeout())
            .await
    }
}
