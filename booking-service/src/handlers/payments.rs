//! Prepaid booking handlers.
//!
//! Initiation and the Razorpay checkout callback answer JSON. The PhonePe
//! browser return always answers with a redirect to the frontend, and the
//! webhook answers 2xx for anything the gateway should stop retrying.

use axum::{
    extract::{Form, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id;
use validator::Validate;

use crate::dtos::{
    ConfirmationResponse, InitiatePaymentRequest, InitiatePaymentResponse, PaymentStatusResponse,
    PhonepeRedirectParams, RazorpayVerifyRequest,
};
use crate::models::GatewayKind;
use crate::services::gateway::phonepe::X_VERIFY;
use crate::services::gateway::ConfirmationEvidence;
use crate::services::{BookingError, ConfirmationResult, PaymentStatusView};
use crate::AppState;

const RAZORPAY_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>, AppError> {
    payload.validate()?;

    let initiation = state.bookings.initiate_prepaid(&payload).await?;
    let redirect_url = match &initiation.checkout {
        crate::services::gateway::CheckoutHandle::Redirect { url } => Some(url.clone()),
        _ => None,
    };

    Ok(Json(InitiatePaymentResponse {
        success: true,
        transaction_id: initiation.transaction_id,
        redirect_url,
        checkout: initiation.checkout,
    }))
}

/// Razorpay Checkout success handler callback.
pub async fn verify_razorpay_payment(
    State(state): State<AppState>,
    Json(payload): Json<RazorpayVerifyRequest>,
) -> Result<Response, AppError> {
    let evidence = ConfirmationEvidence::CheckoutSignature {
        order_id: payload.razorpay_order_id.clone(),
        payment_id: payload.razorpay_payment_id,
        signature: payload.razorpay_signature,
    };

    let response = match state.bookings.confirm(&evidence).await? {
        ConfirmationResult::Settled(record) | ConfirmationResult::AlreadySettled(record) => Json(
            ConfirmationResponse {
                success: true,
                message: "Payment verified and booking confirmed".to_string(),
                transaction_id: record
                    .transaction_id
                    .clone()
                    .unwrap_or_else(|| payload.razorpay_order_id.clone()),
                booking_id: record.id,
            },
        )
        .into_response(),
        ConfirmationResult::Pending { transaction_id } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": false,
                "message": "Payment is still processing",
                "transactionId": transaction_id
            })),
        )
            .into_response(),
        ConfirmationResult::Failed { .. } | ConfirmationResult::Ignored { .. } => {
            return Err(AppError::BadRequest(anyhow::anyhow!("Payment failed")));
        }
    };

    Ok(response)
}

async fn redirect_after_return(state: &AppState, transaction_id: String) -> Redirect {
    let frontend = &state.frontend;
    let evidence = ConfirmationEvidence::Redirect {
        transaction_id: transaction_id.clone(),
    };

    let target = match state.bookings.confirm(&evidence).await {
        Ok(ConfirmationResult::Settled(record)) | Ok(ConfirmationResult::AlreadySettled(record)) => {
            frontend.success_url(&record.id, &transaction_id)
        }
        Ok(ConfirmationResult::Pending { .. }) => frontend.pending_url(&transaction_id),
        Ok(ConfirmationResult::Failed { .. }) | Ok(ConfirmationResult::Ignored { .. }) => {
            frontend.failure_url(Some(&transaction_id))
        }
        Err(e) => {
            tracing::warn!(
                transaction_id = %transaction_id,
                error = %e,
                "Payment return could not be confirmed"
            );
            frontend.failure_url(Some(&transaction_id))
        }
    };

    Redirect::to(&target)
}

/// Browser return from the PhonePe hosted page (GET variant).
pub async fn phonepe_redirect(
    State(state): State<AppState>,
    Query(params): Query<PhonepeRedirectParams>,
) -> Redirect {
    redirect_after_return(&state, params.transaction_id).await
}

/// Browser return from the PhonePe hosted page (form POST variant).
pub async fn phonepe_redirect_form(
    State(state): State<AppState>,
    Form(params): Form<PhonepeRedirectParams>,
) -> Redirect {
    redirect_after_return(&state, params.transaction_id).await
}

/// Server-to-server payment notification for the configured gateway.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let header_name = match state.bookings.gateway_kind() {
        GatewayKind::Razorpay => RAZORPAY_SIGNATURE_HEADER,
        GatewayKind::Phonepe => X_VERIFY,
    };

    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!(
                request_id = %request_id(&headers),
                header = header_name,
                "Webhook without signature header"
            );
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let evidence = ConfirmationEvidence::Webhook {
        body,
        signature: signature.to_string(),
    };

    let outcome = match state.bookings.confirm(&evidence).await {
        Ok(ConfirmationResult::Settled(record)) => json!({ "status": "settled", "bookingId": record.id }),
        Ok(ConfirmationResult::AlreadySettled(record)) => {
            json!({ "status": "duplicate", "bookingId": record.id })
        }
        Ok(ConfirmationResult::Failed { transaction_id }) => {
            json!({ "status": "failed", "transactionId": transaction_id })
        }
        Ok(ConfirmationResult::Pending { transaction_id }) => {
            json!({ "status": "pending", "transactionId": transaction_id })
        }
        Ok(ConfirmationResult::Ignored { reason }) => json!({ "status": "ignored", "event": reason }),
        Err(BookingError::ConfirmationMismatch) => {
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid webhook signature")));
        }
        // Authentic but not ours; a non-2xx would only make the gateway retry.
        Err(BookingError::PendingDataMissing(transaction_id)) => {
            tracing::warn!(
                request_id = %request_id(&headers),
                transaction_id = %transaction_id,
                "Acknowledging webhook for unknown transaction"
            );
            json!({ "status": "unknown", "transactionId": transaction_id })
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(json!({ "success": true, "result": outcome })))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let response = match state.bookings.payment_status(&transaction_id).await? {
        PaymentStatusView::Settled(record) => PaymentStatusResponse {
            transaction_id,
            state: "settled",
            booking_id: Some(record.id),
            payment_status: Some(record.payment_status),
            advance_amount: Some(record.advance_amount),
        },
        PaymentStatusView::Pending(pending) => PaymentStatusResponse {
            transaction_id,
            state: "pending",
            booking_id: None,
            payment_status: None,
            advance_amount: Some(pending.advance_amount),
        },
    };
    Ok(Json(response))
}
