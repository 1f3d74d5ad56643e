#![allow(dead_code)]

use booking_service::config::{FrontendConfig, PhonepeConfig, RazorpayConfig};
use booking_service::models::GatewayKind;
use booking_service::services::{
    BookingAdmissionService, InMemoryFareStore, InMemoryPendingStore, MockSmsProvider,
    NotificationDispatcher, PaymentGateway, PhonepeClient, RazorpayClient, StaticDistanceLookup,
    TripEligibilityValidator,
};
use booking_service::{AppState, Application};
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const RAZORPAY_KEY_SECRET: &str = "test_key_secret";
pub const RAZORPAY_WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const PHONEPE_SALT_KEY: &str = "test-salt";
pub const PHONEPE_MERCHANT_ID: &str = "MERCHANTUAT";
pub const FRONTEND_URL: &str = "https://itarsitaxi.example";
pub const ADMIN_PHONE: &str = "9000000000";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub gateway_server: MockServer,
    pub fares: Arc<InMemoryFareStore>,
    pub pending: Arc<InMemoryPendingStore>,
    pub sms: Arc<MockSmsProvider>,
    pub client: reqwest::Client,
}

fn distance_table() -> StaticDistanceLookup {
    StaticDistanceLookup::new()
        .with_route("Itarsi", "Itarsi Railway Station", 2.0)
        .with_route("Itarsi", "Civil Lines Market", 4.0)
        .with_route("Itarsi", "Hoshangabad", 18.0)
        .with_route("Itarsi", "Bhopal", 96.0)
        .with_route("Itarsi", "Raja Bhoj Airport Bhopal", 98.0)
        .with_route("Itarsi", "Civil Lines Market Bhopal", 95.0)
}

pub fn phonepe_config(api_base_url: &str) -> PhonepeConfig {
    PhonepeConfig {
        merchant_id: PHONEPE_MERCHANT_ID.to_string(),
        salt_key: Secret::new(PHONEPE_SALT_KEY.to_string()),
        salt_index: 1,
        api_base_url: api_base_url.to_string(),
        instrument_type: "PAY_PAGE".to_string(),
        redirect_url: "http://127.0.0.1/api/payments/phonepe/redirect".to_string(),
        callback_url: "http://127.0.0.1/api/payments/webhook".to_string(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(GatewayKind::Razorpay).await
    }

    pub async fn spawn_with(kind: GatewayKind) -> Self {
        let gateway_server = MockServer::start().await;
        let timeout = Duration::from_secs(2);

        let gateway: Arc<dyn PaymentGateway> = match kind {
            GatewayKind::Razorpay => Arc::new(
                RazorpayClient::new(
                    RazorpayConfig {
                        key_id: "rzp_test_key".to_string(),
                        key_secret: Secret::new(RAZORPAY_KEY_SECRET.to_string()),
                        webhook_secret: Secret::new(RAZORPAY_WEBHOOK_SECRET.to_string()),
                        api_base_url: gateway_server.uri(),
                        currency: "INR".to_string(),
                    },
                    timeout,
                )
                .expect("Failed to build Razorpay client"),
            ),
            GatewayKind::Phonepe => Arc::new(
                PhonepeClient::new(phonepe_config(&gateway_server.uri()), timeout)
                    .expect("Failed to build PhonePe client"),
            ),
        };

        let fares = Arc::new(InMemoryFareStore::new());
        let pending = Arc::new(InMemoryPendingStore::default());
        let sms = Arc::new(MockSmsProvider::new());

        let bookings = BookingAdmissionService::new(
            fares.clone(),
            pending.clone(),
            gateway,
            Arc::new(distance_table()),
            NotificationDispatcher::new(sms.clone(), ADMIN_PHONE),
            TripEligibilityValidator::default(),
            "Itarsi",
        );

        let state = AppState {
            bookings,
            fares: fares.clone(),
            frontend: FrontendConfig {
                base_url: FRONTEND_URL.to_string(),
            },
        };

        let app = Application::from_state(state, 0)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        for _ in 0..50 {
            if client
                .get(format!("{}/health", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            address,
            port,
            gateway_server,
            fares,
            pending,
            sms,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }
}

/// A complete Local cash booking inside the home radius.
pub fn local_booking() -> serde_json::Value {
    serde_json::json!({
        "name": "Ravi Sharma",
        "mobile": "9876543210",
        "email": "ravi@example.com",
        "paymentMode": "Cash on Arrival",
        "carType": "Sedan",
        "distance": 6.0,
        "totalFare": 450.0,
        "tripType": "Local",
        "pickupLocation": "Itarsi Railway Station",
        "dropLocation": "Civil Lines Market",
        "pickupDate": "2026-10-20",
        "pickupTime": "08:15"
    })
}

/// A One Way trip to Bhopal with an advance, without a payment mode.
pub fn prepaid_booking(advance: f64) -> serde_json::Value {
    serde_json::json!({
        "name": "Anita Verma",
        "mobile": "9123456780",
        "carType": "SUV",
        "distance": 96.0,
        "totalFare": 3200.0,
        "tripType": "One Way",
        "pickupLocation": "Itarsi Railway Station",
        "dropLocation": "Bhopal",
        "pickupDate": "2026-10-22",
        "pickupTime": "06:00",
        "advanceAmount": advance
    })
}
