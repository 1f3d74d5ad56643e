//! Booking admission and payment settlement.
//!
//! Cash bookings persist immediately. Prepaid bookings park their payload in
//! the pending store at initiation and only become a [`FareRecord`] once the
//! gateway returns a verified success. The pending entry is consumed with a
//! one-shot `claim`, so replayed confirmations never create a second record.
//! A confirmation that loses the claim race waits briefly for the winner's
//! record instead of reporting the payment as unknown.

use crate::dtos::{BookingRequest, InitiatePaymentRequest};
use crate::models::{
    BookingStatus, FareRecord, GatewayKind, PaymentMode, PaymentStatus, Settlement, TripDraft,
};
use crate::services::distance::{DistanceError, DistanceLookup, RouteEstimate};
use crate::services::gateway::{
    to_minor_units, CheckoutHandle, ConfirmationEvidence, GatewayError, InitiationRequest,
    PaymentGateway, PaymentOutcome, PaymentState,
};
use crate::services::metrics::{record_admission, record_confirmation};
use crate::services::notifications::NotificationDispatcher;
use crate::services::pending::{PendingTransaction, PendingTransactionStore};
use crate::services::repository::{FareStore, StoreError};
use crate::services::validation::{PaymentPath, TripEligibilityValidator, ValidationError};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SETTLE_WAIT_ATTEMPTS: u32 = 20;
const SETTLE_WAIT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unable to calculate trip distance: {0}")]
    DistanceUnavailable(#[from] DistanceError),

    #[error("Payment initiation failed: {0}")]
    GatewayDeclined(GatewayError),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(GatewayError),

    #[error("Payment verification failed")]
    ConfirmationMismatch,

    #[error("Invalid confirmation: {0}")]
    InvalidConfirmation(GatewayError),

    #[error("No pending booking for transaction {0}")]
    PendingDataMissing(String),

    #[error("Booking {0} not found")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Persistence(#[from] StoreError),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(ValidationError::MissingFields(fields)) => {
                AppError::InvalidInput {
                    message: ValidationError::MissingFields(fields.clone()).to_string(),
                    fields: fields.into_iter().map(str::to_string).collect(),
                }
            }
            BookingError::Validation(ValidationError::InvalidField { field, reason }) => {
                AppError::InvalidInput {
                    message: format!("Invalid value for {}: {}", field, reason),
                    fields: vec![field.to_string()],
                }
            }
            BookingError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            BookingError::DistanceUnavailable(DistanceError::RouteNotFound { .. }) => {
                AppError::BadRequest(anyhow::anyhow!(
                    "Unable to calculate distance for the given locations"
                ))
            }
            BookingError::DistanceUnavailable(e) => {
                AppError::BadGateway(format!("Distance lookup failed: {}", e))
            }
            BookingError::GatewayDeclined(_) => {
                AppError::BadGateway("Payment initiation failed, please try again".to_string())
            }
            BookingError::GatewayUnavailable(_) => {
                AppError::BadGateway("Payment status could not be confirmed".to_string())
            }
            BookingError::ConfirmationMismatch => {
                AppError::BadRequest(anyhow::anyhow!("Payment verification failed"))
            }
            BookingError::InvalidConfirmation(e) => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            BookingError::PendingDataMissing(txn) => AppError::NotFound(anyhow::anyhow!(
                "No pending booking found for transaction {}; please contact support",
                txn
            )),
            BookingError::NotFound(id) => AppError::NotFound(anyhow::anyhow!("Booking {} not found", id)),
            BookingError::Persistence(StoreError::Unavailable(_)) => AppError::ServiceUnavailable,
            BookingError::Persistence(e) => AppError::DatabaseError(anyhow::anyhow!(e.to_string())),
        }
    }
}

/// What the caller needs to send the customer to the gateway.
#[derive(Debug, Clone)]
pub struct PrepaidInitiation {
    pub transaction_id: String,
    pub checkout: CheckoutHandle,
}

#[derive(Debug, Clone)]
pub enum ConfirmationResult {
    /// A new record was created for this payment.
    Settled(FareRecord),
    /// The payment was already promoted by an earlier confirmation.
    AlreadySettled(FareRecord),
    /// The gateway reported a failed payment; nothing was persisted.
    Failed { transaction_id: String },
    /// Not final yet; the pending entry is kept.
    Pending { transaction_id: String },
    /// Authentic but irrelevant gateway event.
    Ignored { reason: String },
}

impl ConfirmationResult {
    fn outcome_label(&self) -> &'static str {
        match self {
            ConfirmationResult::Settled(_) => "settled",
            ConfirmationResult::AlreadySettled(_) => "duplicate",
            ConfirmationResult::Failed { .. } => "failed",
            ConfirmationResult::Pending { .. } => "pending",
            ConfirmationResult::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Clone)]
pub enum PaymentStatusView {
    Settled(FareRecord),
    Pending(PendingTransaction),
}

#[derive(Clone)]
pub struct BookingAdmissionService {
    fares: Arc<dyn FareStore>,
    pending: Arc<dyn PendingTransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    distance: Arc<dyn DistanceLookup>,
    notifier: NotificationDispatcher,
    validator: TripEligibilityValidator,
    home_location: String,
}

fn admission_label(result: &Result<FareRecord, BookingError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(BookingError::Validation(_)) => "rejected",
        Err(_) => "error",
    }
}

impl BookingAdmissionService {
    pub fn new(
        fares: Arc<dyn FareStore>,
        pending: Arc<dyn PendingTransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        distance: Arc<dyn DistanceLookup>,
        notifier: NotificationDispatcher,
        validator: TripEligibilityValidator,
        home_location: impl Into<String>,
    ) -> Self {
        Self {
            fares,
            pending,
            gateway,
            distance,
            notifier,
            validator,
            home_location: home_location.into(),
        }
    }

    pub fn gateway_kind(&self) -> GatewayKind {
        self.gateway.kind()
    }

    /// Distances of pickup and drop from the home location.
    async fn distances_from_home(&self, trip: &TripDraft) -> Result<(f64, f64), BookingError> {
        let (pickup, drop) = tokio::try_join!(
            self.distance.lookup(&self.home_location, &trip.pickup_location),
            self.distance.lookup(&self.home_location, &trip.drop_location),
        )
        .map_err(|e| {
            tracing::warn!(
                pickup = %trip.pickup_location,
                drop = %trip.drop_location,
                error = %e,
                "Distance lookup from home failed"
            );
            e
        })?;
        Ok((pickup.distance_in_km, drop.distance_in_km))
    }

    async fn check_full_eligibility(&self, trip: &TripDraft) -> Result<(), BookingError> {
        let (pickup_km, drop_km) = self.distances_from_home(trip).await?;
        self.validator.check_eligibility(trip, pickup_km, drop_km)?;
        Ok(())
    }

    /// Full validation for the cash path: presence and mode checks run
    /// first so a bad request never costs a distance lookup.
    async fn validate_full(&self, request: &BookingRequest) -> Result<TripDraft, BookingError> {
        let draft = self.validator.check_required(request)?;
        self.validator.check_payment_mode(request, PaymentPath::Cash)?;
        let (pickup_km, drop_km) = self.distances_from_home(&draft).await?;
        Ok(self.validator.validate(request, pickup_km, drop_km)?)
    }

    async fn persist_and_notify(&self, record: FareRecord) -> Result<FareRecord, BookingError> {
        self.fares.insert(&record).await.map_err(|e| {
            tracing::error!(
                mobile = %record.mobile,
                total_fare = record.total_fare,
                error = %e,
                "Failed to persist booking"
            );
            BookingError::from(e)
        })?;

        tracing::info!(
            booking_id = %record.id,
            trip_type = %record.trip_type,
            payment_mode = %record.payment_mode,
            "Booking persisted"
        );

        self.notifier.send_booking_notifications(&record).await;
        Ok(record)
    }

    /// Cash booking with presence checks and trip eligibility.
    pub async fn admit_full(&self, request: &BookingRequest) -> Result<FareRecord, BookingError> {
        let result = async {
            let trip = self.validate_full(request).await?;

            let record = FareRecord::new(
                trip,
                Settlement::cash(PaymentStatus::CashOnArrival, BookingStatus::Confirmed),
            );
            self.persist_and_notify(record).await
        }
        .await;

        record_admission("full", admission_label(&result));
        result
    }

    /// Cash booking with presence checks only. The record stays pending
    /// until an operator confirms it.
    pub async fn admit_minimal(&self, request: &BookingRequest) -> Result<FareRecord, BookingError> {
        let result = async {
            let trip = self.validator.check_required(request)?;
            self.validator.check_payment_mode(request, PaymentPath::Cash)?;

            let record = FareRecord::new(
                trip,
                Settlement::cash(PaymentStatus::Pending, BookingStatus::Pending),
            );
            self.persist_and_notify(record).await
        }
        .await;

        record_admission("minimal", admission_label(&result));
        result
    }

    fn check_gateway_mode(&self, request: &BookingRequest) -> Result<(), ValidationError> {
        let expected = PaymentMode::from(self.gateway.kind());
        let Some(raw) = request.payment_mode.as_deref() else {
            return Ok(());
        };
        match raw.parse::<PaymentMode>() {
            Ok(mode) if mode == expected => Ok(()),
            _ => Err(ValidationError::InvalidField {
                field: "paymentMode",
                reason: format!("online payments are accepted via {} only", expected),
            }),
        }
    }

    /// Validate a prepaid booking and start the gateway payment for its advance.
    pub async fn initiate_prepaid(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<PrepaidInitiation, BookingError> {
        let kind = self.gateway.kind();

        let mut booking = request.booking.clone();
        if booking
            .payment_mode
            .as_deref()
            .map_or(true, |mode| mode.trim().is_empty())
        {
            booking.payment_mode = Some(PaymentMode::from(kind).to_string());
        }

        let validated = async {
            let trip = self.validator.check_required(&booking)?;
            self.validator.check_payment_mode(&booking, PaymentPath::Prepaid)?;
            self.check_gateway_mode(&booking)?;
            self.validator.check_advance(&trip, request.advance_amount)?;
            self.check_full_eligibility(&trip).await?;
            Ok::<_, BookingError>(trip)
        }
        .await;

        let trip = match validated {
            Ok(trip) => trip,
            Err(e) => {
                let outcome = if matches!(e, BookingError::Validation(_)) {
                    "rejected"
                } else {
                    "error"
                };
                record_admission("prepaid", outcome);
                return Err(e);
            }
        };

        let initiation = self
            .gateway
            .initiate(&InitiationRequest {
                amount_minor: to_minor_units(request.advance_amount),
                customer_ref: trip.mobile.clone(),
                customer_name: trip.name.clone(),
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    gateway = %kind,
                    mobile = %trip.mobile,
                    advance = request.advance_amount,
                    error = %e,
                    "Payment initiation failed"
                );
                record_admission("prepaid", "declined");
                BookingError::GatewayDeclined(e)
            })?;

        let pending = PendingTransaction::new(
            initiation.transaction_id.clone(),
            kind,
            trip,
            request.advance_amount,
        );
        self.pending.put(&pending).await.map_err(|e| {
            tracing::error!(
                transaction_id = %pending.transaction_id,
                error = %e,
                "Failed to store pending booking"
            );
            record_admission("prepaid", "error");
            BookingError::from(e)
        })?;

        tracing::info!(
            transaction_id = %initiation.transaction_id,
            gateway = %kind,
            advance = request.advance_amount,
            "Prepaid booking awaiting confirmation"
        );
        record_admission("prepaid", "initiated");

        Ok(PrepaidInitiation {
            transaction_id: initiation.transaction_id,
            checkout: initiation.checkout,
        })
    }

    /// Turn gateway evidence into a settled booking, at most once per transaction.
    pub async fn confirm(
        &self,
        evidence: &ConfirmationEvidence,
    ) -> Result<ConfirmationResult, BookingError> {
        let kind = self.gateway.kind().to_string();
        let result = self.confirm_inner(evidence).await;

        let label = match &result {
            Ok(r) => r.outcome_label(),
            Err(BookingError::ConfirmationMismatch) => "mismatch",
            Err(BookingError::PendingDataMissing(_)) => "missing",
            Err(_) => "error",
        };
        record_confirmation(&kind, label);
        result
    }

    async fn confirm_inner(
        &self,
        evidence: &ConfirmationEvidence,
    ) -> Result<ConfirmationResult, BookingError> {
        let outcome = match self.gateway.confirm(evidence).await {
            Ok(outcome) => outcome,
            Err(GatewayError::VerificationFailed(reason)) => {
                tracing::warn!(
                    gateway = %self.gateway.kind(),
                    channel = evidence.channel(),
                    reason = %reason,
                    "Rejected unverifiable payment confirmation"
                );
                return Err(BookingError::ConfirmationMismatch);
            }
            Err(GatewayError::UnhandledEvent(event)) => {
                tracing::debug!(event = %event, "Ignoring gateway event");
                return Ok(ConfirmationResult::Ignored { reason: event });
            }
            Err(e @ (GatewayError::UnsupportedEvidence(_) | GatewayError::InvalidPayload(_))) => {
                return Err(BookingError::InvalidConfirmation(e));
            }
            Err(e) => {
                tracing::error!(
                    gateway = %self.gateway.kind(),
                    channel = evidence.channel(),
                    error = %e,
                    "Payment status query failed"
                );
                return Err(BookingError::GatewayUnavailable(e));
            }
        };

        match outcome.state {
            PaymentState::Success => self.settle(outcome).await,
            PaymentState::Failed => {
                let discarded = self.pending.take(&outcome.transaction_id).await?;
                tracing::info!(
                    transaction_id = %outcome.transaction_id,
                    had_pending = discarded.is_some(),
                    "Payment failed, pending booking discarded"
                );
                Ok(ConfirmationResult::Failed {
                    transaction_id: outcome.transaction_id,
                })
            }
            PaymentState::AttemptFailed => {
                tracing::info!(
                    transaction_id = %outcome.transaction_id,
                    payment_id = outcome.gateway_reference.as_deref().unwrap_or_default(),
                    "Payment attempt failed, keeping pending booking for retry"
                );
                Ok(ConfirmationResult::Pending {
                    transaction_id: outcome.transaction_id,
                })
            }
            PaymentState::Pending => Ok(ConfirmationResult::Pending {
                transaction_id: outcome.transaction_id,
            }),
        }
    }

    /// Resolve a confirmation that found no pending entry. If another
    /// confirmation holds the claim, wait a bounded time for its record.
    async fn already_settled(&self, transaction_id: &str) -> Result<ConfirmationResult, BookingError> {
        for attempt in 0..=SETTLE_WAIT_ATTEMPTS {
            // Read the marker before the record: the winner inserts first and
            // releases second, so "no marker" here means the lookup is final.
            let settling = self.pending.is_settling(transaction_id).await?;

            if let Some(record) = self.fares.find_by_settlement_key(transaction_id).await? {
                tracing::info!(
                    transaction_id = %transaction_id,
                    booking_id = %record.id,
                    waited_attempts = attempt,
                    "Duplicate confirmation for settled payment"
                );
                return Ok(ConfirmationResult::AlreadySettled(record));
            }

            if !settling {
                tracing::error!(
                    transaction_id = %transaction_id,
                    "Verified payment has no pending booking"
                );
                return Err(BookingError::PendingDataMissing(transaction_id.to_string()));
            }

            if attempt < SETTLE_WAIT_ATTEMPTS {
                tokio::time::sleep(SETTLE_WAIT_INTERVAL).await;
            }
        }

        tracing::warn!(
            transaction_id = %transaction_id,
            "Concurrent settlement still in flight, reporting pending"
        );
        Ok(ConfirmationResult::Pending {
            transaction_id: transaction_id.to_string(),
        })
    }

    async fn release_claim(&self, transaction_id: &str) {
        if let Err(e) = self.pending.release(transaction_id).await {
            tracing::warn!(
                transaction_id = %transaction_id,
                error = %e,
                "Failed to clear settling marker"
            );
        }
    }

    async fn settle(&self, outcome: PaymentOutcome) -> Result<ConfirmationResult, BookingError> {
        let Some(pending) = self.pending.claim(&outcome.transaction_id).await? else {
            return self.already_settled(&outcome.transaction_id).await;
        };

        let expected_minor = to_minor_units(pending.advance_amount);
        if let Some(paid) = outcome.amount_minor.filter(|paid| *paid != expected_minor) {
            tracing::warn!(
                transaction_id = %outcome.transaction_id,
                expected = expected_minor,
                paid = paid,
                "Gateway reported a different amount than the advance requested"
            );
        }

        let (transaction_id, gateway_order_id) = match pending.gateway {
            GatewayKind::Razorpay => (
                outcome
                    .gateway_reference
                    .clone()
                    .unwrap_or_else(|| outcome.transaction_id.clone()),
                Some(outcome.transaction_id.clone()),
            ),
            GatewayKind::Phonepe => (
                outcome.transaction_id.clone(),
                outcome.gateway_reference.clone(),
            ),
        };

        let advance = pending.advance_amount;
        let record = FareRecord::new(
            pending.trip.clone(),
            Settlement::prepaid(pending.gateway, advance, transaction_id, gateway_order_id),
        );

        let inserted = self.fares.insert(&record).await;
        if matches!(inserted, Ok(()) | Err(StoreError::Duplicate)) {
            self.release_claim(&outcome.transaction_id).await;
        }
        match inserted {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return self.already_settled(&outcome.transaction_id).await,
            Err(e) => {
                // Put the payload back so a gateway retry can still settle.
                let restored = self.pending.put(&pending).await.is_ok();
                self.release_claim(&outcome.transaction_id).await;
                tracing::error!(
                    transaction_id = %outcome.transaction_id,
                    advance = advance,
                    mobile = %pending.trip.mobile,
                    restored = restored,
                    error = %e,
                    "Paid booking could not be persisted; manual reconciliation required"
                );
                return Err(e.into());
            }
        }

        tracing::info!(
            booking_id = %record.id,
            transaction_id = %outcome.transaction_id,
            advance = advance,
            "Prepaid booking confirmed"
        );

        self.notifier.send_booking_notifications(&record).await;
        Ok(ConfirmationResult::Settled(record))
    }

    pub async fn get_booking(&self, id: &str) -> Result<FareRecord, BookingError> {
        self.fares
            .find_by_id(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.to_string()))
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<FareRecord, BookingError> {
        let record = self
            .fares
            .update_status(id, status)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;
        tracing::info!(booking_id = %id, status = ?status, "Booking status updated");
        Ok(record)
    }

    pub async fn payment_status(&self, transaction_id: &str) -> Result<PaymentStatusView, BookingError> {
        if let Some(record) = self.fares.find_by_settlement_key(transaction_id).await? {
            return Ok(PaymentStatusView::Settled(record));
        }
        self.pending
            .peek(transaction_id)
            .await?
            .map(PaymentStatusView::Pending)
            .ok_or_else(|| BookingError::NotFound(transaction_id.to_string()))
    }

    pub async fn distance(&self, origin: &str, destination: &str) -> Result<RouteEstimate, BookingError> {
        Ok(self.distance.lookup(origin, destination).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::distance::StaticDistanceLookup;
    use crate::services::pending::InMemoryPendingStore;
    use crate::services::repository::InMemoryFareStore;
    use crate::services::sms::MockSmsProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Gateway double: checkout signatures equal to "valid" verify, anything
    /// else is a mismatch. The reported state is configurable.
    struct StubGateway {
        fail_initiate: bool,
        state: Mutex<PaymentState>,
        counter: AtomicU32,
    }

    impl StubGateway {
        fn new() -> Self {
            Self {
                fail_initiate: false,
                state: Mutex::new(PaymentState::Success),
                counter: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail_initiate: true,
                ..Self::new()
            }
        }

        fn report(&self, state: PaymentState) {
            *self.state.lock().unwrap() = state;
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        fn kind(&self) -> GatewayKind {
            GatewayKind::Razorpay
        }

        async fn initiate(
            &self,
            request: &InitiationRequest,
        ) -> Result<crate::services::gateway::GatewayInitiation, GatewayError> {
            if self.fail_initiate {
                return Err(GatewayError::Network("connection refused".to_string()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let order_id = format!("order_{}", n);
            Ok(crate::services::gateway::GatewayInitiation {
                transaction_id: order_id.clone(),
                checkout: CheckoutHandle::RazorpayCheckout {
                    key_id: "rzp_test".to_string(),
                    order_id,
                    amount: request.amount_minor,
                    currency: "INR".to_string(),
                },
            })
        }

        async fn confirm(&self, evidence: &ConfirmationEvidence) -> Result<PaymentOutcome, GatewayError> {
            match evidence {
                ConfirmationEvidence::CheckoutSignature {
                    order_id,
                    payment_id,
                    signature,
                } if signature == "valid" => Ok(PaymentOutcome {
                    transaction_id: order_id.clone(),
                    gateway_reference: Some(payment_id.clone()),
                    state: *self.state.lock().unwrap(),
                    amount_minor: None,
                }),
                ConfirmationEvidence::Webhook { .. } => {
                    Err(GatewayError::UnhandledEvent("refund.created".to_string()))
                }
                _ => Err(GatewayError::VerificationFailed("signature mismatch".to_string())),
            }
        }
    }

    struct Harness {
        service: BookingAdmissionService,
        fares: Arc<InMemoryFareStore>,
        pending: Arc<InMemoryPendingStore>,
        gateway: Arc<StubGateway>,
        sms: Arc<MockSmsProvider>,
    }

    /// Fare store whose inserts yield for a while, so overlapping
    /// confirmations genuinely interleave.
    struct SlowFareStore {
        inner: Arc<InMemoryFareStore>,
        delay: Duration,
    }

    #[async_trait]
    impl FareStore for SlowFareStore {
        async fn insert(&self, record: &FareRecord) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert(record).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<FareRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_settlement_key(&self, key: &str) -> Result<Option<FareRecord>, StoreError> {
            self.inner.find_by_settlement_key(key).await
        }

        async fn update_status(
            &self,
            id: &str,
            status: BookingStatus,
        ) -> Result<Option<FareRecord>, StoreError> {
            self.inner.update_status(id, status).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    fn harness_with(gateway: StubGateway) -> Harness {
        build_harness(gateway, None)
    }

    fn slow_harness(insert_delay: Duration) -> Harness {
        build_harness(StubGateway::new(), Some(insert_delay))
    }

    fn build_harness(gateway: StubGateway, insert_delay: Option<Duration>) -> Harness {
        let fares = Arc::new(InMemoryFareStore::new());
        let store: Arc<dyn FareStore> = match insert_delay {
            Some(delay) => Arc::new(SlowFareStore {
                inner: fares.clone(),
                delay,
            }),
            None => fares.clone(),
        };
        let pending = Arc::new(InMemoryPendingStore::default());
        let gateway = Arc::new(gateway);
        let sms = Arc::new(MockSmsProvider::new());
        let distance = StaticDistanceLookup::new()
            .with_route("Itarsi", "Itarsi Railway Station", 2.0)
            .with_route("Itarsi", "Civil Lines", 4.0)
            .with_route("Itarsi", "Hoshangabad", 18.0)
            .with_route("Itarsi", "Bhopal", 96.0)
            .with_route("Itarsi", "Raja Bhoj Airport Bhopal", 98.0);

        let service = BookingAdmissionService::new(
            store,
            pending.clone(),
            gateway.clone(),
            Arc::new(distance),
            NotificationDispatcher::new(sms.clone(), "9000000000"),
            TripEligibilityValidator::default(),
            "Itarsi",
        );
        Harness {
            service,
            fares,
            pending,
            gateway,
            sms,
        }
    }

    fn harness() -> Harness {
        harness_with(StubGateway::new())
    }

    fn local_request() -> BookingRequest {
        BookingRequest {
            name: Some("Ravi".to_string()),
            mobile: Some("9876543210".to_string()),
            payment_mode: Some("Cash on Arrival".to_string()),
            car_type: Some("Sedan".to_string()),
            distance: Some(6.0),
            total_fare: Some(450.0),
            trip_type: Some("Local".to_string()),
            pickup_location: Some("Itarsi Railway Station".to_string()),
            drop_location: Some("Civil Lines".to_string()),
            pickup_date: Some("2026-10-20".to_string()),
            pickup_time: Some("08:15".to_string()),
            ..Default::default()
        }
    }

    fn prepaid_request(advance: f64) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            booking: BookingRequest {
                payment_mode: None,
                trip_type: Some("One Way".to_string()),
                distance: Some(96.0),
                total_fare: Some(2400.0),
                drop_location: Some("Bhopal".to_string()),
                ..local_request()
            },
            advance_amount: advance,
        }
    }

    fn valid_signature(order_id: &str) -> ConfirmationEvidence {
        ConfirmationEvidence::CheckoutSignature {
            order_id: order_id.to_string(),
            payment_id: format!("pay_for_{}", order_id),
            signature: "valid".to_string(),
        }
    }

    #[tokio::test]
    async fn cash_booking_round_trips_submitted_values() {
        let h = harness();
        let record = h.service.admit_full(&local_request()).await.unwrap();

        let stored = h.service.get_booking(&record.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::CashOnArrival);
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.car_type.to_string(), "Sedan");
        assert_eq!(stored.total_fare, 450.0);
        assert_eq!(stored.mobile, "9876543210");
        assert_eq!(h.sms.send_count(), 2);
    }

    #[tokio::test]
    async fn full_admission_enforces_local_radius() {
        let h = harness();
        let mut request = local_request();
        request.drop_location = Some("Hoshangabad".to_string());

        let err = h.service.admit_full(&request).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation(ValidationError::OutsideLocalRadius { .. })
        ));
        assert_eq!(h.fares.count().await, 0);
        assert_eq!(h.sms.send_count(), 0);
    }

    #[tokio::test]
    async fn full_admission_checks_mode_before_distance() {
        let h = harness();
        let mut request = local_request();
        request.drop_location = Some("Nowhere".to_string());
        request.payment_mode = Some("Razorpay".to_string());

        // The unresolvable route would fail the lookup; the mode check wins.
        let err = h.service.admit_full(&request).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation(ValidationError::PrepaidPathRequired(_))
        ));
    }

    #[tokio::test]
    async fn unresolvable_route_aborts_full_admission() {
        let h = harness();
        let mut request = local_request();
        request.drop_location = Some("Nowhere".to_string());

        let err = h.service.admit_full(&request).await.unwrap_err();
        assert!(matches!(err, BookingError::DistanceUnavailable(_)));
        assert_eq!(h.fares.count().await, 0);
    }

    #[tokio::test]
    async fn minimal_admission_skips_distance_and_stays_pending() {
        let h = harness();
        let mut request = local_request();
        request.drop_location = Some("Nowhere".to_string());

        let record = h.service.admit_minimal(&request).await.unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Pending);
        assert_eq!(record.status, BookingStatus::Pending);
        assert_eq!(h.fares.count().await, 1);
    }

    #[tokio::test]
    async fn missing_fields_are_listed_exhaustively() {
        let h = harness();
        let mut request = local_request();
        request.name = None;
        request.total_fare = None;

        let err = h.service.admit_minimal(&request).await.unwrap_err();
        let BookingError::Validation(validation) = &err else {
            panic!("expected validation error, got {:?}", err);
        };
        assert_eq!(validation.missing_fields(), ["name", "totalFare"]);

        let app_error: AppError = err.into();
        assert_eq!(app_error.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cash_path_rejects_prepaid_modes() {
        let h = harness();
        let mut request = local_request();
        request.payment_mode = Some("Razorpay".to_string());

        let err = h.service.admit_full(&request).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation(ValidationError::PrepaidPathRequired(_))
        ));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_booking() {
        let fares = Arc::new(InMemoryFareStore::new());
        let service = BookingAdmissionService::new(
            fares.clone(),
            Arc::new(InMemoryPendingStore::default()),
            Arc::new(StubGateway::new()),
            Arc::new(StaticDistanceLookup::new()),
            NotificationDispatcher::new(Arc::new(MockSmsProvider::failing()), "9000000000"),
            TripEligibilityValidator::default(),
            "Itarsi",
        );

        assert!(service.admit_minimal(&local_request()).await.is_ok());
        assert_eq!(fares.count().await, 1);
    }

    #[tokio::test]
    async fn prepaid_initiation_parks_payload_without_record() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();

        assert_eq!(h.fares.count().await, 0);
        let pending = h.pending.peek(&initiation.transaction_id).await.unwrap().unwrap();
        assert_eq!(pending.advance_amount, 500.0);
        assert_eq!(pending.gateway, GatewayKind::Razorpay);
        assert!(matches!(
            initiation.checkout,
            CheckoutHandle::RazorpayCheckout { amount: 50000, .. }
        ));
    }

    #[tokio::test]
    async fn prepaid_rejects_cash_mode_and_bad_advance() {
        let h = harness();

        let mut cash = prepaid_request(500.0);
        cash.booking.payment_mode = Some("Cash on Arrival".to_string());
        assert!(matches!(
            h.service.initiate_prepaid(&cash).await,
            Err(BookingError::Validation(ValidationError::CashPathRequired))
        ));

        assert!(matches!(
            h.service.initiate_prepaid(&prepaid_request(5000.0)).await,
            Err(BookingError::Validation(ValidationError::InvalidAdvance { .. }))
        ));

        let mut other_gateway = prepaid_request(500.0);
        other_gateway.booking.payment_mode = Some("PhonePe".to_string());
        assert!(matches!(
            h.service.initiate_prepaid(&other_gateway).await,
            Err(BookingError::Validation(ValidationError::InvalidField { field: "paymentMode", .. }))
        ));
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn prepaid_path_applies_trip_eligibility() {
        let h = harness();
        let mut request = prepaid_request(500.0);
        request.booking.drop_location = Some("Hoshangabad".to_string());
        request.booking.distance = Some(12.0);

        assert!(matches!(
            h.service.initiate_prepaid(&request).await,
            Err(BookingError::Validation(ValidationError::TripTooShort { .. }))
        ));
        assert!(h.pending.is_empty());
    }

    #[tokio::test]
    async fn initiation_failure_leaves_no_trace() {
        let h = harness_with(StubGateway::failing());
        let err = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap_err();

        assert!(matches!(err, BookingError::GatewayDeclined(_)));
        assert!(h.pending.is_empty());
        assert_eq!(h.fares.count().await, 0);
    }

    #[tokio::test]
    async fn verified_success_creates_exactly_one_record() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        let evidence = valid_signature(&initiation.transaction_id);

        let first = h.service.confirm(&evidence).await.unwrap();
        let record = match first {
            ConfirmationResult::Settled(record) => record,
            other => panic!("expected settled, got {:?}", other),
        };
        assert_eq!(record.payment_status, PaymentStatus::Paid);
        assert_eq!(record.advance_amount, 500.0);
        assert_eq!(record.payment_mode, PaymentMode::Razorpay);
        assert_eq!(
            record.transaction_id.as_deref(),
            Some(format!("pay_for_{}", initiation.transaction_id).as_str())
        );
        assert_eq!(record.gateway_order_id.as_deref(), Some(initiation.transaction_id.as_str()));
        assert!(record.is_confirmed());

        let second = h.service.confirm(&evidence).await.unwrap();
        let again = match second {
            ConfirmationResult::AlreadySettled(record) => record,
            other => panic!("expected already settled, got {:?}", other),
        };
        assert_eq!(again.id, record.id);
        assert_eq!(h.fares.count().await, 1);
        assert_eq!(h.sms.send_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_confirmations_settle_once() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(300.0)).await.unwrap();
        let evidence = valid_signature(&initiation.transaction_id);

        let (a, b) = tokio::join!(h.service.confirm(&evidence), h.service.confirm(&evidence));
        let settled = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|r| matches!(r, ConfirmationResult::Settled(_)))
            .count();
        assert_eq!(settled, 1);
        assert_eq!(h.fares.count().await, 1);
    }

    #[tokio::test]
    async fn overlapping_confirmations_with_slow_insert_never_report_missing() {
        let h = slow_harness(Duration::from_millis(50));
        let initiation = h.service.initiate_prepaid(&prepaid_request(300.0)).await.unwrap();
        let evidence = valid_signature(&initiation.transaction_id);

        let (a, b) = tokio::join!(h.service.confirm(&evidence), h.service.confirm(&evidence));
        let (a, b) = (a.unwrap(), b.unwrap());
        let settled = [&a, &b]
            .iter()
            .filter(|r| matches!(r, ConfirmationResult::Settled(_)))
            .count();
        let duplicates = [&a, &b]
            .iter()
            .filter(|r| matches!(r, ConfirmationResult::AlreadySettled(_)))
            .count();
        assert_eq!((settled, duplicates), (1, 1));
        assert_eq!(h.fares.count().await, 1);
        assert!(!h.pending.is_settling(&initiation.transaction_id).await.unwrap());
        assert_eq!(h.sms.send_count(), 2);
    }

    #[tokio::test]
    async fn confirmation_during_unfinished_claim_reports_pending() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        // Another node claimed the entry and has not written its record yet.
        assert!(h.pending.claim(&initiation.transaction_id).await.unwrap().is_some());

        let result = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Pending { .. }));
        assert_eq!(h.fares.count().await, 0);
    }

    #[tokio::test]
    async fn tampered_signature_never_creates_record() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();

        let err = h
            .service
            .confirm(&ConfirmationEvidence::CheckoutSignature {
                order_id: initiation.transaction_id.clone(),
                payment_id: "pay_x".to_string(),
                signature: "forged".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::ConfirmationMismatch));
        assert_eq!(h.fares.count().await, 0);
        assert!(h.pending.peek(&initiation.transaction_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_payment_discards_pending_entry() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        h.gateway.report(PaymentState::Failed);

        let result = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Failed { .. }));
        assert!(h.pending.is_empty());
        assert_eq!(h.fares.count().await, 0);
    }

    #[tokio::test]
    async fn declined_attempt_keeps_entry_and_retry_settles() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        h.gateway.report(PaymentState::AttemptFailed);

        let result = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Pending { .. }));
        assert!(h.pending.peek(&initiation.transaction_id).await.unwrap().is_some());

        h.gateway.report(PaymentState::Success);
        let retried = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(retried, ConfirmationResult::Settled(_)));
        assert_eq!(h.fares.count().await, 1);
    }

    #[tokio::test]
    async fn pending_payment_keeps_entry() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        h.gateway.report(PaymentState::Pending);

        let result = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Pending { .. }));
        assert!(matches!(
            h.service.payment_status(&initiation.transaction_id).await.unwrap(),
            PaymentStatusView::Pending(_)
        ));
    }

    #[tokio::test]
    async fn unknown_transaction_is_pending_data_missing() {
        let h = harness();
        let err = h.service.confirm(&valid_signature("order_unknown")).await.unwrap_err();
        assert!(matches!(err, BookingError::PendingDataMissing(_)));
    }

    #[tokio::test]
    async fn persistence_failure_after_payment_is_surfaced_and_recoverable() {
        let h = harness();
        let initiation = h.service.initiate_prepaid(&prepaid_request(500.0)).await.unwrap();
        h.fares.set_unavailable(true);

        let err = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Persistence(_)));
        assert_eq!(h.sms.send_count(), 0);
        assert!(!h.pending.is_settling(&initiation.transaction_id).await.unwrap());

        // The payload is restored, so a retry after recovery settles.
        h.fares.set_unavailable(false);
        let retried = h
            .service
            .confirm(&valid_signature(&initiation.transaction_id))
            .await
            .unwrap();
        assert!(matches!(retried, ConfirmationResult::Settled(_)));
        assert_eq!(h.fares.count().await, 1);
    }

    #[tokio::test]
    async fn unhandled_events_are_ignored() {
        let h = harness();
        let result = h
            .service
            .confirm(&ConfirmationEvidence::Webhook {
                body: "{}".to_string(),
                signature: "sig".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(result, ConfirmationResult::Ignored { .. }));
    }

    #[tokio::test]
    async fn update_status_and_lookup_errors() {
        let h = harness();
        let record = h.service.admit_minimal(&local_request()).await.unwrap();

        let updated = h
            .service
            .update_status(&record.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Confirmed);

        assert!(matches!(
            h.service.get_booking("missing").await,
            Err(BookingError::NotFound(_))
        ));
        assert!(matches!(
            h.service.payment_status("TXNUNKNOWN").await,
            Err(BookingError::NotFound(_))
        ));
    }
}
