use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    BookingStatus, CarCategory, FareRecord, PaymentMode, PaymentStatus, TripType,
};
use crate::services::gateway::CheckoutHandle;

/// Booking form as submitted by the website. Every field is optional so the
/// validator can report all missing fields at once.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub payment_mode: Option<String>,
    pub car_type: Option<String>,
    pub distance: Option<f64>,
    pub total_fare: Option<f64>,
    pub toll_count: Option<u32>,
    pub pickup_date: Option<String>,
    pub pickup_time: Option<String>,
    pub trip_type: Option<String>,
    pub pickup_location: Option<String>,
    pub drop_location: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(flatten)]
    pub booking: BookingRequest,
    /// Advance to collect now, in whole currency units.
    #[validate(range(min = 1.0, message = "Advance amount must be at least 1"))]
    pub advance_amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct DistanceQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
}

/// Fields posted back by Razorpay Checkout's success handler.
#[derive(Debug, Deserialize)]
pub struct RazorpayVerifyRequest {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

/// Browser return from the PhonePe hosted page, via query string or form post.
#[derive(Debug, Deserialize)]
pub struct PhonepeRedirectParams {
    #[serde(
        rename = "transactionId",
        alias = "merchantTransactionId",
        alias = "txnId"
    )]
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreatedResponse {
    pub success: bool,
    pub message: String,
    pub booking_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub checkout: CheckoutHandle,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub success: bool,
    pub message: String,
    pub booking_id: String,
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub transaction_id: String,
    /// `settled` or `pending`.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advance_amount: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareRecordResponse {
    pub id: String,
    pub name: String,
    pub mobile: String,
    pub email: String,
    pub car_type: CarCategory,
    pub distance: f64,
    pub duration: String,
    pub pickup_location: String,
    pub drop_location: String,
    pub pickup_date: String,
    pub pickup_time: String,
    pub trip_type: TripType,
    pub toll_count: u32,
    pub total_fare: f64,
    pub advance_amount: f64,
    pub payment_mode: PaymentMode,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    pub status: BookingStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FareRecord> for FareRecordResponse {
    fn from(r: FareRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            mobile: r.mobile,
            email: r.email,
            car_type: r.car_type,
            distance: r.distance,
            duration: r.duration,
            pickup_location: r.pickup_location,
            drop_location: r.drop_location,
            pickup_date: r.pickup_date,
            pickup_time: r.pickup_time,
            trip_type: r.trip_type,
            toll_count: r.toll_count,
            total_fare: r.total_fare,
            advance_amount: r.advance_amount,
            payment_mode: r.payment_mode,
            payment_status: r.payment_status,
            transaction_id: r.transaction_id,
            gateway_order_id: r.gateway_order_id,
            status: r.status,
            created_at: r.created_at.to_chrono().to_rfc3339(),
            updated_at: r.updated_at.to_chrono().to_rfc3339(),
        }
    }
}
