//! Application startup and lifecycle management.

use crate::config::{BookingConfig, PendingStoreKind};
use crate::models::GatewayKind;
use crate::services::{
    BookingAdmissionService, DistanceLookup, Fast2SmsProvider, FareStore, GoogleDirectionsClient,
    InMemoryPendingStore, MockSmsProvider, MongoFareStore, NotificationDispatcher, PaymentGateway,
    PendingTransactionStore, PhonepeClient, RazorpayClient, RedisPendingStore, SmsProvider,
    TripEligibilityValidator,
};
use crate::{build_router, AppState};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

fn gateway_from_config(config: &BookingConfig) -> Result<Arc<dyn PaymentGateway>, AppError> {
    let timeout = config.gateway.timeout();
    let gateway: Arc<dyn PaymentGateway> = match config.gateway.provider {
        GatewayKind::Razorpay => {
            let client = RazorpayClient::new(config.razorpay.clone(), timeout)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?;
            if !client.is_configured() {
                tracing::warn!("Razorpay credentials not configured - prepaid bookings will fail");
            }
            Arc::new(client)
        }
        GatewayKind::Phonepe => {
            let client = PhonepeClient::new(config.phonepe.clone(), timeout)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?;
            if !client.is_configured() {
                tracing::warn!("PhonePe credentials not configured - prepaid bookings will fail");
            }
            Arc::new(client)
        }
    };
    tracing::info!(gateway = %config.gateway.provider, "Payment gateway selected");
    Ok(gateway)
}

impl Application {
    /// Connect every backend named in `config` and bind the HTTP listener.
    pub async fn build(config: BookingConfig) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.mongodb.uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some("booking-service".to_string());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.mongodb.database);

        let store = MongoFareStore::new(&db);
        store.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let fares: Arc<dyn FareStore> = Arc::new(store);

        let pending: Arc<dyn PendingTransactionStore> = match config.pending_store {
            PendingStoreKind::Redis => {
                let redis = redis::Client::open(config.redis.url.expose_secret().as_str())?;
                Arc::new(
                    RedisPendingStore::connect(redis, config.redis.pending_ttl())
                        .await
                        .map_err(|e| AppError::InternalError(e.into()))?,
                )
            }
            PendingStoreKind::Memory => {
                tracing::warn!("Using in-memory pending store - pending payments are lost on restart");
                let store = Arc::new(InMemoryPendingStore::new(config.redis.pending_ttl()));
                store.spawn_sweeper(PENDING_SWEEP_INTERVAL);
                store
            }
        };

        let gateway = gateway_from_config(&config)?;

        let distance: Arc<dyn DistanceLookup> = Arc::new(
            GoogleDirectionsClient::new(config.maps.clone())
                .map_err(|e| AppError::ConfigError(e.into()))?,
        );

        let sms: Arc<dyn SmsProvider> = if config.sms.enabled {
            Arc::new(
                Fast2SmsProvider::new(config.sms.clone())
                    .map_err(|e| AppError::ConfigError(e.into()))?,
            )
        } else {
            tracing::warn!("SMS disabled - using mock provider");
            Arc::new(MockSmsProvider::new())
        };

        let bookings = BookingAdmissionService::new(
            fares.clone(),
            pending,
            gateway,
            distance,
            NotificationDispatcher::new(sms, config.sms.admin_phone.clone()),
            TripEligibilityValidator::new(config.home.radius_km),
            config.home.location.clone(),
        );

        let state = AppState {
            bookings,
            fares,
            frontend: config.frontend.clone(),
        };

        Self::from_state(state, config.common.port).await
    }

    /// Bind a listener for an already assembled state. Port 0 picks a free port.
    pub async fn from_state(state: AppState, port: u16) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!("Booking service listening on port {}", self.port);
        let router = build_router(self.state);
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
