use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment gateway family chosen for a deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Razorpay,
    Phonepe,
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayKind::Razorpay => write!(f, "razorpay"),
            GatewayKind::Phonepe => write!(f, "phonepe"),
        }
    }
}

impl FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "razorpay" => Ok(GatewayKind::Razorpay),
            "phonepe" => Ok(GatewayKind::Phonepe),
            other => Err(format!("unknown payment gateway '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TripType {
    Local,
    #[serde(rename = "One Way", alias = "OneWay")]
    OneWay,
    #[serde(rename = "Round Trip", alias = "RoundTrip")]
    RoundTrip,
    Airport,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Local => "Local",
            TripType::OneWay => "One Way",
            TripType::RoundTrip => "Round Trip",
            TripType::Airport => "Airport",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "local" => Ok(TripType::Local),
            "oneway" => Ok(TripType::OneWay),
            "roundtrip" => Ok(TripType::RoundTrip),
            "airport" => Ok(TripType::Airport),
            _ => Err(s.to_string()),
        }
    }
}

/// Car category. Known categories are normalised, anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CarCategory {
    Hatchback,
    Sedan,
    Muv,
    Suv,
    Other(String),
}

impl From<String> for CarCategory {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hatchback" => CarCategory::Hatchback,
            "sedan" => CarCategory::Sedan,
            "muv" => CarCategory::Muv,
            "suv" => CarCategory::Suv,
            _ => CarCategory::Other(value.trim().to_string()),
        }
    }
}

impl From<CarCategory> for String {
    fn from(value: CarCategory) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CarCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarCategory::Hatchback => f.write_str("Hatchback"),
            CarCategory::Sedan => f.write_str("Sedan"),
            CarCategory::Muv => f.write_str("MUV"),
            CarCategory::Suv => f.write_str("SUV"),
            CarCategory::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMode {
    #[serde(rename = "Cash on Arrival", alias = "CashOnArrival")]
    CashOnArrival,
    Razorpay,
    #[serde(rename = "PhonePe")]
    PhonePe,
}

impl PaymentMode {
    pub fn is_prepaid(&self) -> bool {
        !matches!(self, PaymentMode::CashOnArrival)
    }
}

impl From<GatewayKind> for PaymentMode {
    fn from(kind: GatewayKind) -> Self {
        match kind {
            GatewayKind::Razorpay => PaymentMode::Razorpay,
            GatewayKind::Phonepe => PaymentMode::PhonePe,
        }
    }
}

impl FromStr for PaymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cashonarrival" | "cash" => Ok(PaymentMode::CashOnArrival),
            "razorpay" => Ok(PaymentMode::Razorpay),
            "phonepe" => Ok(PaymentMode::PhonePe),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMode::CashOnArrival => f.write_str("Cash on Arrival"),
            PaymentMode::Razorpay => f.write_str("Razorpay"),
            PaymentMode::PhonePe => f.write_str("PhonePe"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Success,
    Paid,
    Failed,
    CashOnArrival,
}

impl PaymentStatus {
    /// A prepaid booking only counts as confirmed once money has moved.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// Trip and contact data that passed the required-field check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripDraft {
    pub name: String,
    pub mobile: String,
    #[serde(default)]
    pub email: String,
    pub car_type: CarCategory,
    pub distance: f64,
    #[serde(default)]
    pub duration: String,
    pub pickup_location: String,
    pub drop_location: String,
    #[serde(default)]
    pub pickup_date: String,
    #[serde(default)]
    pub pickup_time: String,
    pub trip_type: TripType,
    #[serde(default)]
    pub toll_count: u32,
    pub total_fare: f64,
}

/// Financial side of a booking at the moment it becomes durable.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payment_mode: PaymentMode,
    pub payment_status: PaymentStatus,
    pub advance_amount: f64,
    pub transaction_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub status: BookingStatus,
}

impl Settlement {
    pub fn cash(payment_status: PaymentStatus, status: BookingStatus) -> Self {
        Self {
            payment_mode: PaymentMode::CashOnArrival,
            payment_status,
            advance_amount: 0.0,
            transaction_id: None,
            gateway_order_id: None,
            status,
        }
    }

    pub fn prepaid(
        gateway: GatewayKind,
        advance_amount: f64,
        transaction_id: String,
        gateway_order_id: Option<String>,
    ) -> Self {
        Self {
            payment_mode: gateway.into(),
            payment_status: PaymentStatus::Paid,
            advance_amount,
            transaction_id: Some(transaction_id),
            gateway_order_id,
            status: BookingStatus::Confirmed,
        }
    }
}

/// The durable booking record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FareRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub mobile: String,
    #[serde(default)]
    pub email: String,
    pub car_type: CarCategory,
    pub distance: f64,
    #[serde(default)]
    pub duration: String,
    pub pickup_location: String,
    pub drop_location: String,
    #[serde(default)]
    pub pickup_date: String,
    #[serde(default)]
    pub pickup_time: String,
    pub trip_type: TripType,
    #[serde(default)]
    pub toll_count: u32,
    pub total_fare: f64,
    #[serde(default)]
    pub advance_amount: f64,
    pub payment_mode: PaymentMode,
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl FareRecord {
    pub fn new(draft: TripDraft, settlement: Settlement) -> Self {
        let now = DateTime::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            mobile: draft.mobile,
            email: draft.email,
            car_type: draft.car_type,
            distance: draft.distance,
            duration: draft.duration,
            pickup_location: draft.pickup_location,
            drop_location: draft.drop_location,
            pickup_date: draft.pickup_date,
            pickup_time: draft.pickup_time,
            trip_type: draft.trip_type,
            toll_count: draft.toll_count,
            total_fare: draft.total_fare,
            advance_amount: settlement.advance_amount,
            payment_mode: settlement.payment_mode,
            payment_status: settlement.payment_status,
            transaction_id: settlement.transaction_id,
            gateway_order_id: settlement.gateway_order_id,
            status: settlement.status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record satisfies the confirmation rules for its payment mode.
    pub fn is_confirmed(&self) -> bool {
        if self.payment_mode.is_prepaid() {
            self.payment_status.is_settled() && self.transaction_id.is_some()
        } else {
            true
        }
    }
}
