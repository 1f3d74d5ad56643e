use crate::config::MapsConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("Distance provider not configured")]
    NotConfigured,

    #[error("No route between '{origin}' and '{destination}'")]
    RouteNotFound { origin: String, destination: String },

    #[error("Distance provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for DistanceError {
    fn from(err: reqwest::Error) -> Self {
        DistanceError::Provider(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEstimate {
    pub distance_in_km: f64,
    pub duration_text: String,
    pub toll_count: u32,
}

#[async_trait]
pub trait DistanceLookup: Send + Sync {
    async fn lookup(&self, origin: &str, destination: &str) -> Result<RouteEstimate, DistanceError>;
}

/// Google Directions API client.
pub struct GoogleDirectionsClient {
    client: Client,
    config: MapsConfig,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    distance: Measure,
    duration: Measure,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Measure {
    #[serde(default)]
    text: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(default)]
    html_instructions: String,
}

impl GoogleDirectionsClient {
    pub fn new(config: MapsConfig) -> Result<Self, DistanceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DistanceLookup for GoogleDirectionsClient {
    async fn lookup(&self, origin: &str, destination: &str) -> Result<RouteEstimate, DistanceError> {
        let api_key = self.config.api_key.expose_secret();
        if api_key.is_empty() {
            return Err(DistanceError::NotConfigured);
        }

        let response: DirectionsResponse = self
            .client
            .get(format!("{}/directions/json", self.config.base_url))
            .query(&[
                ("origin", origin),
                ("destination", destination),
                ("key", api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let not_found = || DistanceError::RouteNotFound {
            origin: origin.to_string(),
            destination: destination.to_string(),
        };

        match response.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" | "NOT_FOUND" => return Err(not_found()),
            other => {
                tracing::error!(
                    status = %other,
                    error = ?response.error_message,
                    "Directions lookup failed"
                );
                return Err(DistanceError::Provider(other.to_string()));
            }
        }

        let leg = response
            .routes
            .into_iter()
            .next()
            .and_then(|route| route.legs.into_iter().next())
            .ok_or_else(not_found)?;

        let toll_count = leg
            .steps
            .iter()
            .filter(|step| step.html_instructions.to_lowercase().contains("toll"))
            .count() as u32;

        Ok(RouteEstimate {
            distance_in_km: leg.distance.value / 1000.0,
            duration_text: leg.duration.text,
            toll_count,
        })
    }
}

/// Fixed route table for tests and offline development.
#[derive(Default)]
pub struct StaticDistanceLookup {
    routes: HashMap<(String, String), RouteEstimate>,
}

fn route_key(origin: &str, destination: &str) -> (String, String) {
    (
        origin.trim().to_lowercase(),
        destination.trim().to_lowercase(),
    )
}

impl StaticDistanceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, origin: &str, destination: &str, distance_in_km: f64) -> Self {
        self.routes.insert(
            route_key(origin, destination),
            RouteEstimate {
                distance_in_km,
                duration_text: String::new(),
                toll_count: 0,
            },
        );
        self
    }
}

#[async_trait]
impl DistanceLookup for StaticDistanceLookup {
    async fn lookup(&self, origin: &str, destination: &str) -> Result<RouteEstimate, DistanceError> {
        if route_key(origin, destination) == route_key(destination, origin) {
            return Ok(RouteEstimate {
                distance_in_km: 0.0,
                duration_text: String::new(),
                toll_count: 0,
            });
        }
        self.routes
            .get(&route_key(origin, destination))
            .cloned()
            .ok_or_else(|| DistanceError::RouteNotFound {
                origin: origin.to_string(),
                destination: destination.to_string(),
            })
    }
}
