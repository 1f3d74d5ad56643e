//! Razorpay payment provider client.
//!
//! Implements Razorpay's Orders API for payment initiation and
//! signature verification for payment confirmation.

use super::{
    new_transaction_id, CheckoutHandle, ConfirmationEvidence, GatewayError, GatewayInitiation,
    InitiationRequest, PaymentGateway, PaymentOutcome, PaymentState,
};
use crate::config::RazorpayConfig;
use crate::models::GatewayKind;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::utils::signature::{hmac_sha256_hex, verify_hmac_sha256};
use std::time::Duration;

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

/// Request to create a Razorpay order.
#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in smallest currency unit (paise for INR).
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

/// Response from Razorpay order creation.
#[derive(Debug, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: u64,
    #[serde(default)]
    pub amount_paid: u64,
    pub currency: String,
    pub receipt: Option<String>,
    /// `created`, `attempted` or `paid`.
    pub status: String,
}

/// Razorpay API error response.
#[derive(Debug, Deserialize)]
pub struct RazorpayError {
    pub error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayErrorDetail {
    pub code: String,
    pub description: String,
}

/// Razorpay webhook event.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<WebhookPaymentEntity>,
    pub order: Option<WebhookOrderEntity>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPaymentEntity {
    pub entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
pub struct WebhookOrderEntity {
    pub entity: RazorpayOrder,
}

/// Razorpay payment entity.
#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub amount: u64,
    pub status: String,
    pub order_id: Option<String>,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Check if Razorpay is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// Create a new order in Razorpay.
    pub async fn create_order(
        &self,
        amount: u64,
        receipt: String,
        notes: Option<serde_json::Value>,
    ) -> Result<RazorpayOrder, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let request = CreateOrderRequest {
            amount,
            currency: self.config.currency.clone(),
            receipt,
            notes,
        };

        let url = format!("{}/orders", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Razorpay create_order response");

        if status.is_success() {
            let order: RazorpayOrder = serde_json::from_str(&body)
                .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
            tracing::info!(
                order_id = %order.id,
                amount = order.amount,
                currency = %order.currency,
                "Razorpay order created"
            );
            Ok(order)
        } else {
            let detail = serde_json::from_str::<RazorpayError>(&body)
                .map(|e| format!("{} - {}", e.error.code, e.error.description))
                .unwrap_or(body);
            tracing::error!(status = %status, detail = %detail, "Razorpay order creation failed");
            Err(GatewayError::Declined(detail))
        }
    }

    /// Fetch an existing order by ID.
    pub async fn get_order(&self, order_id: &str) -> Result<RazorpayOrder, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let url = format!("{}/orders/{}", self.config.api_base_url, order_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| GatewayError::InvalidPayload(e.to_string()))
        } else {
            Err(GatewayError::Declined(format!(
                "Failed to fetch Razorpay order: {}",
                body
            )))
        }
    }

    /// Verify payment signature from Razorpay checkout.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(order_id + "|" + payment_id, key_secret)`
    pub fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, GatewayError> {
        let payload = format!("{}|{}", order_id, payment_id);
        let is_valid =
            verify_hmac_sha256(self.config.key_secret.expose_secret(), &payload, signature)
                .map_err(|e| GatewayError::VerificationFailed(e.to_string()))?;

        if is_valid {
            tracing::info!(
                order_id = %order_id,
                payment_id = %payment_id,
                "Payment signature verified successfully"
            );
        } else {
            tracing::warn!(
                order_id = %order_id,
                payment_id = %payment_id,
                "Payment signature verification failed"
            );
        }

        Ok(is_valid)
    }

    /// Verify webhook signature.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(request_body, webhook_secret)`
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool, GatewayError> {
        let is_valid =
            verify_hmac_sha256(self.config.webhook_secret.expose_secret(), body, signature)
                .map_err(|e| GatewayError::VerificationFailed(e.to_string()))?;

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Map a verified webhook event onto a payment outcome.
    fn outcome_from_event(&self, event: WebhookEvent) -> Result<PaymentOutcome, GatewayError> {
        let payment = event.payload.payment.map(|p| p.entity);

        match event.event.as_str() {
            "payment.captured" | "payment.failed" => {
                let payment = payment.ok_or_else(|| {
                    GatewayError::InvalidPayload("payment entity missing".to_string())
                })?;
                let order_id = payment.order_id.clone().ok_or_else(|| {
                    GatewayError::InvalidPayload("payment has no order_id".to_string())
                })?;
                // A failed payment is one attempt; the order stays payable.
                let state = if event.event == "payment.captured" {
                    PaymentState::Success
                } else {
                    PaymentState::AttemptFailed
                };
                tracing::info!(
                    payment_id = %payment.id,
                    order_id = %order_id,
                    status = %payment.status,
                    "Razorpay payment webhook received"
                );
                Ok(PaymentOutcome {
                    transaction_id: order_id,
                    gateway_reference: Some(payment.id),
                    state,
                    amount_minor: Some(payment.amount),
                })
            }
            "order.paid" => {
                let order = event.payload.order.map(|o| o.entity).ok_or_else(|| {
                    GatewayError::InvalidPayload("order entity missing".to_string())
                })?;
                tracing::info!(order_id = %order.id, amount = order.amount, "Order paid webhook received");
                Ok(PaymentOutcome {
                    transaction_id: order.id,
                    gateway_reference: payment.map(|p| p.id),
                    state: PaymentState::Success,
                    amount_minor: Some(order.amount_paid),
                })
            }
            other => {
                tracing::debug!(event_type = %other, "Unhandled webhook event type");
                Err(GatewayError::UnhandledEvent(other.to_string()))
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    async fn initiate(&self, request: &InitiationRequest) -> Result<GatewayInitiation, GatewayError> {
        let receipt = new_transaction_id();
        let notes = serde_json::json!({
            "customer": request.customer_ref,
            "name": request.customer_name,
        });

        let order = self
            .create_order(request.amount_minor, receipt, Some(notes))
            .await?;

        Ok(GatewayInitiation {
            transaction_id: order.id.clone(),
            checkout: CheckoutHandle::RazorpayCheckout {
                key_id: self.config.key_id.clone(),
                order_id: order.id,
                amount: order.amount,
                currency: order.currency,
            },
        })
    }

    async fn confirm(&self, evidence: &ConfirmationEvidence) -> Result<PaymentOutcome, GatewayError> {
        match evidence {
            ConfirmationEvidence::CheckoutSignature {
                order_id,
                payment_id,
                signature,
            } => {
                if !self.verify_payment_signature(order_id, payment_id, signature)? {
                    return Err(GatewayError::VerificationFailed(
                        "checkout signature mismatch".to_string(),
                    ));
                }
                Ok(PaymentOutcome {
                    transaction_id: order_id.clone(),
                    gateway_reference: Some(payment_id.clone()),
                    state: PaymentState::Success,
                    amount_minor: None,
                })
            }
            ConfirmationEvidence::Redirect { transaction_id } => {
                let order = self.get_order(transaction_id).await?;
                let state = match order.status.as_str() {
                    "paid" => PaymentState::Success,
                    _ => PaymentState::Pending,
                };
                Ok(PaymentOutcome {
                    transaction_id: order.id,
                    gateway_reference: None,
                    state,
                    amount_minor: Some(order.amount_paid),
                })
            }
            ConfirmationEvidence::Webhook { body, signature } => {
                if !self.verify_webhook_signature(body, signature)? {
                    return Err(GatewayError::VerificationFailed(
                        "webhook signature mismatch".to_string(),
                    ));
                }
                let event: WebhookEvent = serde_json::from_str(body)
                    .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
                self.outcome_from_event(event)
            }
        }
    }
}

/// Sign a Razorpay checkout response the way Razorpay does.
pub fn checkout_signature(key_secret: &str, order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(key_secret, &format!("{}|{}", order_id, payment_id)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base_url: &str) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_123".to_string(),
            key_secret: Secret::new("my_secret_key".to_string()),
            webhook_secret: Secret::new("webhook_secret".to_string()),
            api_base_url: api_base_url.to_string(),
            currency: "INR".to_string(),
        }
    }

    fn client(api_base_url: &str) -> RazorpayClient {
        RazorpayClient::new(test_config(api_base_url), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_is_configured() {
        assert!(client("https://api.razorpay.com/v1").is_configured());

        let empty_config = RazorpayConfig {
            key_id: "".to_string(),
            key_secret: Secret::new("".to_string()),
            webhook_secret: Secret::new("".to_string()),
            api_base_url: "".to_string(),
            currency: "INR".to_string(),
        };
        let client = RazorpayClient::new(empty_config, Duration::from_secs(5)).unwrap();
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn test_checkout_signature_confirms_success() {
        let client = client("https://api.razorpay.com/v1");
        let signature = checkout_signature("my_secret_key", "order_123", "pay_456");

        let outcome = client
            .confirm(&ConfirmationEvidence::CheckoutSignature {
                order_id: "order_123".to_string(),
                payment_id: "pay_456".to_string(),
                signature,
            })
            .await
            .unwrap();

        assert_eq!(outcome.state, PaymentState::Success);
        assert_eq!(outcome.transaction_id, "order_123");
        assert_eq!(outcome.gateway_reference.as_deref(), Some("pay_456"));
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected() {
        let client = client("https://api.razorpay.com/v1");
        let signature = checkout_signature("my_secret_key", "order_123", "pay_456");

        let result = client
            .confirm(&ConfirmationEvidence::CheckoutSignature {
                order_id: "order_123".to_string(),
                payment_id: "pay_999".to_string(),
                signature,
            })
            .await;

        assert!(matches!(result, Err(GatewayError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_initiate_creates_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_abc",
                "entity": "order",
                "amount": 50000,
                "amount_paid": 0,
                "amount_due": 50000,
                "currency": "INR",
                "receipt": "TXN1",
                "status": "created",
                "attempts": 0,
                "created_at": 1700000000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let initiation = client
            .initiate(&InitiationRequest {
                amount_minor: 50000,
                customer_ref: "9876543210".to_string(),
                customer_name: "Ravi".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(initiation.transaction_id, "order_abc");
        assert!(initiation.redirect_url().is_none());
        assert_eq!(
            initiation.checkout,
            CheckoutHandle::RazorpayCheckout {
                key_id: "rzp_test_123".to_string(),
                order_id: "order_abc".to_string(),
                amount: 50000,
                currency: "INR".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_gateway_rejection_is_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "code": "BAD_REQUEST_ERROR",
                    "description": "Order amount less than minimum amount allowed"
                }
            })))
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .initiate(&InitiationRequest {
                amount_minor: 50,
                customer_ref: "9876543210".to_string(),
                customer_name: "Ravi".to_string(),
            })
            .await;

        match result {
            Err(GatewayError::Declined(detail)) => assert!(detail.contains("BAD_REQUEST_ERROR")),
            other => panic!("expected decline, got {:?}", other.map(|i| i.transaction_id)),
        }
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client =
            RazorpayClient::new(test_config(&server.uri()), Duration::from_millis(100)).unwrap();
        let result = client.create_order(50000, "TXN1".to_string(), None).await;
        assert!(matches!(result, Err(GatewayError::Timeout)));
    }

    #[tokio::test]
    async fn test_webhook_payment_captured() {
        let client = client("https://api.razorpay.com/v1");
        let body = serde_json::json!({
            "entity": "event",
            "account_id": "acc_1",
            "event": "payment.captured",
            "contains": ["payment"],
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_789",
                        "entity": "payment",
                        "amount": 50000,
                        "currency": "INR",
                        "status": "captured",
                        "order_id": "order_abc"
                    }
                }
            },
            "created_at": 1700000000
        })
        .to_string();
        let signature = hmac_sha256_hex("webhook_secret", &body).unwrap();

        let outcome = client
            .confirm(&ConfirmationEvidence::Webhook {
                body: body.clone(),
                signature,
            })
            .await
            .unwrap();
        assert_eq!(outcome.state, PaymentState::Success);
        assert_eq!(outcome.transaction_id, "order_abc");
        assert_eq!(outcome.gateway_reference.as_deref(), Some("pay_789"));

        let forged = client
            .confirm(&ConfirmationEvidence::Webhook {
                body,
                signature: "deadbeef".to_string(),
            })
            .await;
        assert!(matches!(forged, Err(GatewayError::VerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_webhook_payment_failed_keeps_order_open() {
        let client = client("https://api.razorpay.com/v1");
        let body = serde_json::json!({
            "entity": "event",
            "event": "payment.failed",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_declined",
                        "entity": "payment",
                        "amount": 50000,
                        "currency": "INR",
                        "status": "failed",
                        "order_id": "order_abc"
                    }
                }
            }
        })
        .to_string();
        let signature = hmac_sha256_hex("webhook_secret", &body).unwrap();

        let outcome = client
            .confirm(&ConfirmationEvidence::Webhook { body, signature })
            .await
            .unwrap();
        assert_eq!(outcome.state, PaymentState::AttemptFailed);
        assert_eq!(outcome.transaction_id, "order_abc");
        assert_eq!(outcome.gateway_reference.as_deref(), Some("pay_declined"));
    }

    #[tokio::test]
    async fn test_unhandled_webhook_event() {
        let client = client("https://api.razorpay.com/v1");
        let body = r#"{"event":"refund.created","payload":{}}"#.to_string();
        let signature = hmac_sha256_hex("webhook_secret", &body).unwrap();

        let result = client
            .confirm(&ConfirmationEvidence::Webhook { body, signature })
            .await;
        assert!(matches!(result, Err(GatewayError::UnhandledEvent(e)) if e == "refund.created"));
    }
}
