pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use axum::middleware::from_fn;
use axum::{
    routing::{get, patch, post},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::FrontendConfig;
use services::{BookingAdmissionService, FareStore};

pub use startup::Application;

#[derive(Clone)]
pub struct AppState {
    pub bookings: BookingAdmissionService,
    pub fares: Arc<dyn FareStore>,
    pub frontend: FrontendConfig,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/api/bookings", post(handlers::bookings::create_booking))
        .route(
            "/api/bookings/quick",
            post(handlers::bookings::create_quick_booking),
        )
        .route("/api/bookings/distance", get(handlers::bookings::distance))
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/status",
            patch(handlers::bookings::update_booking_status),
        )
        .route(
            "/api/payments/initiate",
            post(handlers::payments::initiate_payment),
        )
        .route(
            "/api/payments/razorpay/verify",
            post(handlers::payments::verify_razorpay_payment),
        )
        .route(
            "/api/payments/phonepe/redirect",
            get(handlers::payments::phonepe_redirect).post(handlers::payments::phonepe_redirect_form),
        )
        .route("/api/payments/webhook", post(handlers::payments::webhook))
        .route(
            "/api/payments/status/:transaction_id",
            get(handlers::payments::payment_status),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
