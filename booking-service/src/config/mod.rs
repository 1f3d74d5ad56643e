use crate::models::GatewayKind;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub home: HomeConfig,
    pub gateway: GatewayConfig,
    pub razorpay: RazorpayConfig,
    pub phonepe: PhonepeConfig,
    pub maps: MapsConfig,
    pub sms: SmsConfig,
    pub frontend: FrontendConfig,
    pub pending_store: PendingStoreKind,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    pub pending_ttl_seconds: u64,
}

impl RedisConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    /// Reference location all Local-radius checks are measured from.
    pub location: String,
    pub radius_km: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub provider: GatewayKind,
    pub timeout_seconds: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhonepeConfig {
    pub merchant_id: String,
    pub salt_key: Secret<String>,
    pub salt_index: u32,
    pub api_base_url: String,
    pub instrument_type: String,
    /// Browser return URL; the transaction id is appended as a query parameter.
    pub redirect_url: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapsConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
    pub route: String,
    pub enabled: bool,
    pub admin_phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    pub base_url: String,
}

impl FrontendConfig {
    pub fn success_url(&self, booking_id: &str, transaction_id: &str) -> String {
        format!(
            "{}/booking-success?bookingId={}&transactionId={}",
            self.base_url.trim_end_matches('/'),
            booking_id,
            transaction_id
        )
    }

    pub fn pending_url(&self, transaction_id: &str) -> String {
        format!(
            "{}/booking-pending?transactionId={}",
            self.base_url.trim_end_matches('/'),
            transaction_id
        )
    }

    pub fn failure_url(&self, transaction_id: Option<&str>) -> String {
        let base = format!("{}/booking-failed", self.base_url.trim_end_matches('/'));
        match transaction_id {
            Some(id) => format!("{}?transactionId={}", base, id),
            None => base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStoreKind {
    Redis,
    Memory,
}

impl BookingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_prod();

        let provider = get_env("PAYMENT_GATEWAY", Some("razorpay"), is_prod)?
            .parse::<GatewayKind>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let pending_store = match get_env("PENDING_STORE", Some("redis"), is_prod)?
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => PendingStoreKind::Redis,
            "memory" => PendingStoreKind::Memory,
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "PENDING_STORE must be 'redis' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let api_public_url = get_env("PUBLIC_API_URL", Some("http://localhost:5000"), is_prod)?;
        let api_public_url = api_public_url.trim_end_matches('/');

        Ok(BookingConfig {
            common,
            mongodb: MongoConfig {
                uri: Secret::new(get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                database: get_env("MONGODB_DATABASE", Some("itarsi_taxi"), is_prod)?,
            },
            redis: RedisConfig {
                url: Secret::new(get_env(
                    "REDIS_URL",
                    Some("redis://localhost:6379"),
                    is_prod,
                )?),
                pending_ttl_seconds: parse_env("PENDING_TTL_SECONDS", 3600),
            },
            home: HomeConfig {
                location: get_env("HOME_LOCATION", Some("Itarsi, Madhya Pradesh"), is_prod)?,
                radius_km: parse_env("HOME_RADIUS_KM", crate::services::validation::HOME_RADIUS_KM),
            },
            gateway: GatewayConfig {
                provider,
                timeout_seconds: parse_env("GATEWAY_TIMEOUT_SECONDS", 15),
            },
            razorpay: RazorpayConfig {
                key_id: get_env("RAZORPAY_KEY_ID", Some(""), is_prod)?,
                key_secret: Secret::new(get_env("RAZORPAY_KEY_SECRET", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env(
                    "RAZORPAY_WEBHOOK_SECRET",
                    Some(""),
                    is_prod,
                )?),
                api_base_url: get_env(
                    "RAZORPAY_API_URL",
                    Some("https://api.razorpay.com/v1"),
                    is_prod,
                )?,
                currency: get_env("RAZORPAY_CURRENCY", Some("INR"), is_prod)?,
            },
            phonepe: PhonepeConfig {
                merchant_id: get_env("PHONEPE_MERCHANT_ID", Some(""), is_prod)?,
                salt_key: Secret::new(get_env("PHONEPE_SALT_KEY", Some(""), is_prod)?),
                salt_index: parse_env("PHONEPE_SALT_INDEX", 1),
                api_base_url: get_env(
                    "PHONEPE_API_URL",
                    Some("https://api-preprod.phonepe.com/apis/pg-sandbox"),
                    is_prod,
                )?,
                instrument_type: get_env("PHONEPE_INSTRUMENT_TYPE", Some("PAY_PAGE"), is_prod)?,
                redirect_url: format!("{}/api/payments/phonepe/redirect", api_public_url),
                callback_url: format!("{}/api/payments/webhook", api_public_url),
            },
            maps: MapsConfig {
                api_key: Secret::new(get_env("GOOGLE_MAPS_API_KEY", Some(""), is_prod)?),
                base_url: get_env(
                    "GOOGLE_MAPS_API_URL",
                    Some("https://maps.googleapis.com/maps/api"),
                    is_prod,
                )?,
                timeout_seconds: parse_env("MAPS_TIMEOUT_SECONDS", 10),
            },
            sms: SmsConfig {
                api_key: Secret::new(get_env("FAST2SMS_API_KEY", Some(""), is_prod)?),
                base_url: get_env(
                    "FAST2SMS_API_URL",
                    Some("https://www.fast2sms.com/dev/bulkV2"),
                    is_prod,
                )?,
                route: get_env("FAST2SMS_ROUTE", Some("q"), is_prod)?,
                enabled: env::var("SMS_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                admin_phone: get_env("ADMIN_PHONE", Some(""), is_prod)?,
            },
            frontend: FrontendConfig {
                base_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
            },
            pending_store,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
        })
    }
}
