//! Payment gateway adapters.
//!
//! Both gateway families sit behind [`PaymentGateway`]: `initiate` obtains a
//! fresh transaction id and a checkout handle for the browser, `confirm`
//! turns untrusted evidence (a checkout signature, a browser return, or a
//! webhook) into a verified [`PaymentOutcome`]. Nothing here touches storage.

pub mod phonepe;
pub mod razorpay;

use crate::models::GatewayKind;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use phonepe::PhonepeClient;
pub use razorpay::RazorpayClient;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway credentials not configured")]
    NotConfigured,

    #[error("Payment gateway timed out")]
    Timeout,

    #[error("Payment gateway unreachable: {0}")]
    Network(String),

    #[error("Payment gateway declined the request: {0}")]
    Declined(String),

    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("Unhandled gateway event: {0}")]
    UnhandledEvent(String),

    #[error("This gateway does not accept {0} confirmations")]
    UnsupportedEvidence(&'static str),

    #[error("Malformed gateway payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// What the browser needs to complete payment.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckoutHandle {
    /// Send the customer's browser to a hosted payment page.
    #[serde(rename_all = "camelCase")]
    Redirect { url: String },
    /// Open Razorpay Checkout in the page with these parameters.
    #[serde(rename_all = "camelCase")]
    RazorpayCheckout {
        key_id: String,
        order_id: String,
        amount: u64,
        currency: String,
    },
}

#[derive(Debug, Clone)]
pub struct InitiationRequest {
    /// Amount in the smallest currency unit (paise for INR).
    pub amount_minor: u64,
    /// Customer mobile, used as the gateway-side customer reference.
    pub customer_ref: String,
    pub customer_name: String,
}

#[derive(Debug, Clone)]
pub struct GatewayInitiation {
    /// Key under which the confirmation will come back.
    pub transaction_id: String,
    pub checkout: CheckoutHandle,
}

impl GatewayInitiation {
    pub fn redirect_url(&self) -> Option<&str> {
        match &self.checkout {
            CheckoutHandle::Redirect { url } => Some(url),
            CheckoutHandle::RazorpayCheckout { .. } => None,
        }
    }
}

/// Unverified confirmation material as received over HTTP.
#[derive(Debug, Clone)]
pub enum ConfirmationEvidence {
    /// Razorpay Checkout success handler fields.
    CheckoutSignature {
        order_id: String,
        payment_id: String,
        signature: String,
    },
    /// Browser came back carrying only the transaction id; the gateway must
    /// be asked for the real status.
    Redirect { transaction_id: String },
    /// Server-to-server notification with its authentication header.
    Webhook { body: String, signature: String },
}

impl ConfirmationEvidence {
    pub fn channel(&self) -> &'static str {
        match self {
            ConfirmationEvidence::CheckoutSignature { .. } => "checkout",
            ConfirmationEvidence::Redirect { .. } => "redirect",
            ConfirmationEvidence::Webhook { .. } => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Success,
    /// The transaction is over and can no longer be paid.
    Failed,
    /// One attempt was declined but the customer may retry on the same
    /// transaction, so the pending booking must survive.
    AttemptFailed,
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    /// Pending-store key the outcome applies to.
    pub transaction_id: String,
    /// Gateway-side payment reference, when the gateway reports one.
    pub gateway_reference: Option<String>,
    pub state: PaymentState,
    pub amount_minor: Option<u64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn initiate(&self, request: &InitiationRequest) -> Result<GatewayInitiation, GatewayError>;

    async fn confirm(&self, evidence: &ConfirmationEvidence) -> Result<PaymentOutcome, GatewayError>;
}

/// Convert whole currency units to the smallest unit, rounding half away from zero.
pub fn to_minor_units(amount: f64) -> u64 {
    (amount * 100.0).round().max(0.0) as u64
}

/// A transaction id that is never reused across initiation attempts.
pub fn new_transaction_id() -> String {
    format!("TXN{}", Uuid::new_v4().simple()).to_uppercase()
}
