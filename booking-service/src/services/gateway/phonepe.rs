//! PhonePe PG client (pay page flow).
//!
//! Requests are base64-encoded JSON envelopes authenticated with an
//! `X-VERIFY` checksum: `sha256(payload + api_path + salt_key) + "###" + salt_index`.
//! Callbacks are authenticated the same way over the base64 response body.

use super::{
    new_transaction_id, CheckoutHandle, ConfirmationEvidence, GatewayError, GatewayInitiation,
    InitiationRequest, PaymentGateway, PaymentOutcome, PaymentState,
};
use crate::config::PhonepeConfig;
use crate::models::GatewayKind;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::utils::signature::{constant_time_eq, sha256_hex};
use std::time::Duration;

const PAY_PATH: &str = "/pg/v1/pay";
const STATUS_PATH: &str = "/pg/v1/status";
pub const X_VERIFY: &str = "X-VERIFY";
const X_MERCHANT_ID: &str = "X-MERCHANT-ID";

#[derive(Clone)]
pub struct PhonepeClient {
    client: Client,
    config: PhonepeConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: String,
    amount: u64,
    redirect_url: String,
    redirect_mode: &'static str,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile_number: Option<String>,
    payment_instrument: PaymentInstrument<'a>,
}

#[derive(Debug, Serialize)]
struct PaymentInstrument<'a> {
    #[serde(rename = "type")]
    instrument_type: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    request: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    pub response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    success: bool,
    code: String,
    #[serde(default)]
    message: String,
    data: Option<PayResponseData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponseData {
    instrument_response: Option<InstrumentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentResponse {
    redirect_info: Option<RedirectInfo>,
}

#[derive(Debug, Deserialize)]
struct RedirectInfo {
    url: String,
}

/// Shape shared by the status API and the server-to-server callback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub code: String,
    #[serde(default)]
    pub message: String,
    pub data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub merchant_transaction_id: String,
    pub transaction_id: Option<String>,
    pub amount: Option<u64>,
    pub state: Option<String>,
}

impl StatusResponse {
    fn payment_state(&self) -> PaymentState {
        let state = self.data.as_ref().and_then(|d| d.state.as_deref());
        match (self.code.as_str(), state) {
            ("PAYMENT_SUCCESS", _) | (_, Some("COMPLETED")) => PaymentState::Success,
            ("PAYMENT_PENDING", _) | ("INTERNAL_SERVER_ERROR", _) | (_, Some("PENDING")) => {
                PaymentState::Pending
            }
            _ => PaymentState::Failed,
        }
    }
}

impl PhonepeClient {
    pub fn new(config: PhonepeConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.merchant_id.is_empty() && !self.config.salt_key.expose_secret().is_empty()
    }

    /// `sha256(payload + salt_key) + "###" + salt_index`.
    pub fn checksum(&self, payload: &str) -> String {
        let digest = sha256_hex(&format!(
            "{}{}",
            payload,
            self.config.salt_key.expose_secret()
        ));
        format!("{}###{}", digest, self.config.salt_index)
    }

    fn status_path(&self, transaction_id: &str) -> String {
        format!(
            "{}/{}/{}",
            STATUS_PATH, self.config.merchant_id, transaction_id
        )
    }

    /// Start a pay-page payment and return the hosted page URL.
    pub async fn create_payment(
        &self,
        transaction_id: &str,
        request: &InitiationRequest,
    ) -> Result<String, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let mobile: String = request
            .customer_ref
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        let pay_request = PayRequest {
            merchant_id: &self.config.merchant_id,
            merchant_transaction_id: transaction_id,
            merchant_user_id: format!("MUID{}", mobile),
            amount: request.amount_minor,
            redirect_url: format!(
                "{}?transactionId={}",
                self.config.redirect_url, transaction_id
            ),
            redirect_mode: "REDIRECT",
            callback_url: &self.config.callback_url,
            mobile_number: (!mobile.is_empty()).then_some(mobile.clone()),
            payment_instrument: PaymentInstrument {
                instrument_type: &self.config.instrument_type,
            },
        };

        let json =
            serde_json::to_string(&pay_request).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let encoded = general_purpose::STANDARD.encode(json);
        let checksum = self.checksum(&format!("{}{}", encoded, PAY_PATH));

        let response = self
            .client
            .post(format!("{}{}", self.config.api_base_url, PAY_PATH))
            .header(X_VERIFY, checksum)
            .json(&Envelope { request: encoded })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, transaction_id = %transaction_id, "PhonePe pay response");

        let parsed: PayResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(status = %status, error = %e, "Unparseable PhonePe pay response");
            GatewayError::Declined(format!("HTTP {}", status))
        })?;

        if !status.is_success() || !parsed.success {
            tracing::error!(
                code = %parsed.code,
                message = %parsed.message,
                transaction_id = %transaction_id,
                "PhonePe payment initiation failed"
            );
            return Err(GatewayError::Declined(format!(
                "{} - {}",
                parsed.code, parsed.message
            )));
        }

        let url = parsed
            .data
            .and_then(|d| d.instrument_response)
            .and_then(|i| i.redirect_info)
            .map(|r| r.url)
            .ok_or_else(|| GatewayError::InvalidPayload("redirect url missing".to_string()))?;

        tracing::info!(
            transaction_id = %transaction_id,
            amount = request.amount_minor,
            "PhonePe payment initiated"
        );
        Ok(url)
    }

    /// Server-to-server status query.
    pub async fn check_status(&self, transaction_id: &str) -> Result<StatusResponse, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let path = self.status_path(transaction_id);
        let response = self
            .client
            .get(format!("{}{}", self.config.api_base_url, path))
            .header(X_VERIFY, self.checksum(&path))
            .header(X_MERCHANT_ID, &self.config.merchant_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(status = %status, error = %e, "Unparseable PhonePe status response");
            GatewayError::InvalidPayload(e.to_string())
        })
    }

    /// Authenticate a callback body and decode its payload.
    pub fn verify_callback(&self, body: &str, signature: &str) -> Result<StatusResponse, GatewayError> {
        let callback: CallbackBody =
            serde_json::from_str(body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;

        if !constant_time_eq(&self.checksum(&callback.response), signature) {
            tracing::warn!("PhonePe callback checksum verification failed");
            return Err(GatewayError::VerificationFailed(
                "callback checksum mismatch".to_string(),
            ));
        }

        let decoded = general_purpose::STANDARD
            .decode(callback.response.as_bytes())
            .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        serde_json::from_slice(&decoded).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
    }

    fn outcome(&self, response: StatusResponse, expected: Option<&str>) -> Result<PaymentOutcome, GatewayError> {
        let state = response.payment_state();
        let data = response.data.ok_or_else(|| {
            GatewayError::InvalidPayload(format!("status {} carried no data", response.code))
        })?;

        if let Some(expected) = expected {
            if data.merchant_transaction_id != expected {
                tracing::warn!(
                    expected = %expected,
                    received = %data.merchant_transaction_id,
                    "PhonePe status response for a different transaction"
                );
                return Err(GatewayError::VerificationFailed(
                    "transaction id mismatch".to_string(),
                ));
            }
        }

        tracing::info!(
            transaction_id = %data.merchant_transaction_id,
            code = %response.code,
            state = ?state,
            "PhonePe payment status resolved"
        );

        Ok(PaymentOutcome {
            transaction_id: data.merchant_transaction_id,
            gateway_reference: data.transaction_id,
            state,
            amount_minor: data.amount,
        })
    }
}

#[async_trait]
impl PaymentGateway for PhonepeClient {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Phonepe
    }

    async fn initiate(&self, request: &InitiationRequest) -> Result<GatewayInitiation, GatewayError> {
        let transaction_id = new_transaction_id();
        let url = self.create_payment(&transaction_id, request).await?;
        Ok(GatewayInitiation {
            transaction_id,
            checkout: CheckoutHandle::Redirect { url },
        })
    }

    async fn confirm(&self, evidence: &ConfirmationEvidence) -> Result<PaymentOutcome, GatewayError> {
        match evidence {
            ConfirmationEvidence::Redirect { transaction_id } => {
                let response = self.check_status(transaction_id).await?;
                self.outcome(response, Some(transaction_id))
            }
            ConfirmationEvidence::Webhook { body, signature } => {
                let response = self.verify_callback(body, signature)?;
                self.outcome(response, None)
            }
            ConfirmationEvidence::CheckoutSignature { .. } => {
                Err(GatewayError::UnsupportedEvidence("checkout signature"))
            }
        }
    }
}
