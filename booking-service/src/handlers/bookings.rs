use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{
    BookingCreatedResponse, BookingRequest, DistanceQuery, FareRecordResponse,
    UpdateBookingStatusRequest,
};
use crate::services::distance::RouteEstimate;
use crate::AppState;

/// Cash booking with full trip eligibility checks.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingCreatedResponse>), AppError> {
    tracing::info!(
        trip_type = ?payload.trip_type,
        pickup = ?payload.pickup_location,
        "Booking submitted"
    );

    let record = state.bookings.admit_full(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingCreatedResponse {
            success: true,
            message: "Booking confirmed".to_string(),
            booking_id: record.id,
        }),
    ))
}

/// Cash booking that only checks required fields. Stored as pending.
pub async fn create_quick_booking(
    State(state): State<AppState>,
    Json(payload): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingCreatedResponse>), AppError> {
    let record = state.bookings.admit_minimal(&payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingCreatedResponse {
            success: true,
            message: "Booking received".to_string(),
            booking_id: record.id,
        }),
    ))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FareRecordResponse>, AppError> {
    let record = state.bookings.get_booking(&id).await?;
    Ok(Json(record.into()))
}

pub async fn update_booking_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateBookingStatusRequest>,
) -> Result<Json<FareRecordResponse>, AppError> {
    let record = state.bookings.update_status(&id, payload.status).await?;
    Ok(Json(record.into()))
}

pub async fn distance(
    State(state): State<AppState>,
    Query(query): Query<DistanceQuery>,
) -> Result<Json<RouteEstimate>, AppError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(origin), Some(destination)) = (non_empty(query.origin), non_empty(query.destination))
    else {
        return Err(AppError::InvalidInput {
            message: "Origin and destination are required".to_string(),
            fields: vec!["origin".to_string(), "destination".to_string()],
        });
    };

    let estimate = state.bookings.distance(&origin, &destination).await?;
    Ok(Json(estimate))
}
