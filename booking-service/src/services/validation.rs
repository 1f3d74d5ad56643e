//! Trip eligibility rules.
//!
//! Everything here is a pure decision over the submitted form and the two
//! reference distances measured from the home city. Distance lookups happen
//! in the caller before [`TripEligibilityValidator::check_eligibility`] runs.

use thiserror::Error;

use crate::dtos::BookingRequest;
use crate::models::{CarCategory, PaymentMode, TripDraft, TripType};

/// Radius around the home city served by Local trips, and the minimum
/// distance for everything else.
pub const HOME_RADIUS_KM: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unsupported trip type '{0}'")]
    UnsupportedTripType(String),

    #[error("Payment mode '{0}' cannot be booked here; use the prepaid booking flow instead")]
    PrepaidPathRequired(String),

    #[error("Cash on Arrival bookings cannot go through the prepaid flow")]
    CashPathRequired,

    #[error(
        "For Local trips, both pickup and drop must be within {limit_km} KM of the home city \
         (pickup {pickup_km:.1} KM, drop {drop_km:.1} KM)"
    )]
    OutsideLocalRadius {
        limit_km: f64,
        pickup_km: f64,
        drop_km: f64,
    },

    #[error("{trip_type} trips must be at least {limit_km} KM long (got {distance_km:.1} KM)")]
    TripTooShort {
        trip_type: TripType,
        limit_km: f64,
        distance_km: f64,
    },

    #[error(
        "Drop location must be at least {limit_km} KM from the home city for {trip_type} trips \
         (got {drop_km:.1} KM)"
    )]
    DropTooClose {
        trip_type: TripType,
        limit_km: f64,
        drop_km: f64,
    },

    #[error("Drop location must be a valid airport for Airport trip type")]
    NotAnAirport,

    #[error("Advance amount {advance} must be between 1 and the total fare {total_fare}")]
    InvalidAdvance { advance: f64, total_fare: f64 },
}

impl ValidationError {
    /// Field names for missing-field failures, empty otherwise.
    pub fn missing_fields(&self) -> &[&'static str] {
        match self {
            ValidationError::MissingFields(fields) => fields,
            _ => &[],
        }
    }
}

/// Which booking path a payment mode is being checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPath {
    Cash,
    Prepaid,
}

#[derive(Debug, Clone)]
pub struct TripEligibilityValidator {
    radius_km: f64,
}

impl Default for TripEligibilityValidator {
    fn default() -> Self {
        Self::new(HOME_RADIUS_KM)
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl TripEligibilityValidator {
    pub fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Field presence check. Reports every missing field in form order, then
    /// parses the survivors into a [`TripDraft`].
    pub fn check_required(&self, req: &BookingRequest) -> Result<TripDraft, ValidationError> {
        let name = present(&req.name);
        let mobile = present(&req.mobile);
        let payment_mode = present(&req.payment_mode);
        let car_type = present(&req.car_type);
        let trip_type = present(&req.trip_type);
        let pickup_location = present(&req.pickup_location);
        let drop_location = present(&req.drop_location);

        let mut missing = Vec::new();
        if name.is_none() {
            missing.push("name");
        }
        if mobile.is_none() {
            missing.push("mobile");
        }
        if payment_mode.is_none() {
            missing.push("paymentMode");
        }
        if car_type.is_none() {
            missing.push("carType");
        }
        if req.distance.is_none() {
            missing.push("distance");
        }
        if req.total_fare.is_none() {
            missing.push("totalFare");
        }
        if trip_type.is_none() {
            missing.push("tripType");
        }
        if pickup_location.is_none() {
            missing.push("pickupLocation");
        }
        if drop_location.is_none() {
            missing.push("dropLocation");
        }

        let (
            Some(name),
            Some(mobile),
            Some(_),
            Some(car_type),
            Some(distance),
            Some(total_fare),
            Some(trip_type),
            Some(pickup_location),
            Some(drop_location),
        ) = (
            name,
            mobile,
            payment_mode,
            car_type,
            req.distance,
            req.total_fare,
            trip_type,
            pickup_location,
            drop_location,
        )
        else {
            return Err(ValidationError::MissingFields(missing));
        };

        if !distance.is_finite() || distance < 0.0 {
            return Err(ValidationError::InvalidField {
                field: "distance",
                reason: "must be a non-negative number".to_string(),
            });
        }
        if !total_fare.is_finite() || total_fare < 0.0 {
            return Err(ValidationError::InvalidField {
                field: "totalFare",
                reason: "must be a non-negative number".to_string(),
            });
        }

        let trip_type = trip_type
            .parse::<TripType>()
            .map_err(ValidationError::UnsupportedTripType)?;

        Ok(TripDraft {
            name,
            mobile,
            email: present(&req.email).unwrap_or_default(),
            car_type: CarCategory::from(car_type),
            distance,
            duration: present(&req.duration).unwrap_or_default(),
            pickup_location,
            drop_location,
            pickup_date: present(&req.pickup_date).unwrap_or_default(),
            pickup_time: present(&req.pickup_time).unwrap_or_default(),
            trip_type,
            toll_count: req.toll_count.unwrap_or(0),
            total_fare,
        })
    }

    /// Gate the submitted payment mode against the path it arrived on.
    pub fn check_payment_mode(
        &self,
        req: &BookingRequest,
        path: PaymentPath,
    ) -> Result<(), ValidationError> {
        let raw = present(&req.payment_mode).unwrap_or_default();
        let is_cash = matches!(raw.parse::<PaymentMode>(), Ok(PaymentMode::CashOnArrival));
        match path {
            PaymentPath::Cash if !is_cash => Err(ValidationError::PrepaidPathRequired(raw)),
            PaymentPath::Prepaid if is_cash => Err(ValidationError::CashPathRequired),
            _ => Ok(()),
        }
    }

    /// Trip-type rules, evaluated in a fixed order; the first violation wins.
    pub fn check_eligibility(
        &self,
        trip: &TripDraft,
        pickup_from_home_km: f64,
        drop_from_home_km: f64,
    ) -> Result<(), ValidationError> {
        let limit = self.radius_km;

        if trip.trip_type == TripType::Local {
            if pickup_from_home_km > limit || drop_from_home_km > limit {
                return Err(ValidationError::OutsideLocalRadius {
                    limit_km: limit,
                    pickup_km: pickup_from_home_km,
                    drop_km: drop_from_home_km,
                });
            }
        } else if trip.distance < limit {
            return Err(ValidationError::TripTooShort {
                trip_type: trip.trip_type,
                limit_km: limit,
                distance_km: trip.distance,
            });
        }

        if matches!(trip.trip_type, TripType::OneWay | TripType::RoundTrip)
            && drop_from_home_km < limit
        {
            return Err(ValidationError::DropTooClose {
                trip_type: trip.trip_type,
                limit_km: limit,
                drop_km: drop_from_home_km,
            });
        }

        if trip.trip_type == TripType::Airport
            && !trip.drop_location.to_lowercase().contains("airport")
        {
            return Err(ValidationError::NotAnAirport);
        }

        Ok(())
    }

    /// Full cash-path validation for callers that already hold both distances.
    pub fn validate(
        &self,
        req: &BookingRequest,
        pickup_from_home_km: f64,
        drop_from_home_km: f64,
    ) -> Result<TripDraft, ValidationError> {
        let trip = self.check_required(req)?;
        self.check_payment_mode(req, PaymentPath::Cash)?;
        self.check_eligibility(&trip, pickup_from_home_km, drop_from_home_km)?;
        Ok(trip)
    }

    pub fn check_advance(&self, trip: &TripDraft, advance: f64) -> Result<(), ValidationError> {
        if !advance.is_finite() || advance < 1.0 || advance > trip.total_fare {
            return Err(ValidationError::InvalidAdvance {
                advance,
                total_fare: trip.total_fare,
            });
        }
        Ok(())
    }
}
