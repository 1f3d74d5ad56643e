use crate::config::SmsConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider_id: Option<String>,
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, sms: &SmsMessage) -> Result<ProviderResponse, ProviderError>;
    fn is_enabled(&self) -> bool;
}

/// Fast2SMS bulk API client.
pub struct Fast2SmsProvider {
    config: SmsConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct Fast2SmsRequest<'a> {
    route: &'a str,
    message: &'a str,
    language: &'static str,
    flash: u8,
    numbers: String,
}

#[derive(Debug, Deserialize)]
struct Fast2SmsResponse {
    #[serde(rename = "return")]
    accepted: bool,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    message: serde_json::Value,
}

/// Reduce a phone number to the 10-digit national form Fast2SMS expects.
pub fn normalize_indian_mobile(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let national = match digits.len() {
        10 => digits,
        11 if digits.starts_with('0') => digits[1..].to_string(),
        12 if digits.starts_with("91") => digits[2..].to_string(),
        _ => return None,
    };
    Some(national)
}

impl Fast2SmsProvider {
    pub fn new(config: SmsConfig) -> Result<Self, ProviderError> {
        if config.enabled && config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::Configuration(
                "FAST2SMS_API_KEY is not configured".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SmsProvider for Fast2SmsProvider {
    async fn send(&self, sms: &SmsMessage) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "Fast2SMS provider is not enabled".to_string(),
            ));
        }

        let number = normalize_indian_mobile(&sms.to)
            .ok_or_else(|| ProviderError::InvalidRecipient(sms.to.clone()))?;

        let request = Fast2SmsRequest {
            route: &self.config.route,
            message: &sms.body,
            language: "english",
            flash: 0,
            numbers: number,
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .header("authorization", self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("Failed to connect to Fast2SMS: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let parsed: Fast2SmsResponse = serde_json::from_str(&body).map_err(|_| {
            ProviderError::SendFailed(format!(
                "Fast2SMS returned status {}: {}",
                status, body
            ))
        })?;

        if !parsed.accepted {
            return Err(ProviderError::SendFailed(format!(
                "Fast2SMS rejected message: {}",
                parsed.message
            )));
        }

        tracing::info!(to = %sms.to, "SMS sent via Fast2SMS");
        Ok(ProviderResponse {
            provider_id: parsed.request_id,
        })
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct MockSmsProvider {
    fail: bool,
    sent: Mutex<Vec<SmsMessage>>,
}

impl MockSmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.sent().len()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send(&self, sms: &SmsMessage) -> Result<ProviderResponse, ProviderError> {
        if self.fail {
            return Err(ProviderError::SendFailed("mock failure".to_string()));
        }

        let count = match self.sent.lock() {
            Ok(mut sent) => {
                sent.push(sms.clone());
                sent.len()
            }
            Err(_) => return Err(ProviderError::SendFailed("mock poisoned".to_string())),
        };

        tracing::info!(
            to = %sms.to,
            body_length = sms.body.len(),
            "[MOCK] SMS would be sent"
        );

        Ok(ProviderResponse {
            provider_id: Some(format!("mock-sms-{}", count)),
        })
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SmsConfig {
        SmsConfig {
            api_key: Secret::new("f2s-key".to_string()),
            base_url: base_url.to_string(),
            route: "q".to_string(),
            enabled: true,
            admin_phone: "9000000000".to_string(),
        }
    }

    #[test]
    fn normalizes_common_mobile_formats() {
        assert_eq!(normalize_indian_mobile("+91 98765-43210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_indian_mobile("09876543210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_indian_mobile("9876543210").as_deref(), Some("9876543210"));
        assert!(normalize_indian_mobile("12345").is_none());
    }

    #[tokio::test]
    async fn fast2sms_posts_message_with_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "f2s-key"))
            .and(body_partial_json(serde_json::json!({
                "route": "q",
                "numbers": "9876543210",
                "message": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "return": true,
                "request_id": "req-1",
                "message": ["SMS sent successfully."]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Fast2SmsProvider::new(config(&server.uri())).unwrap();
        let response = provider
            .send(&SmsMessage {
                to: "+919876543210".to_string(),
                body: "hello".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response.provider_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn fast2sms_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "return": false,
                "status_code": 412,
                "message": "Invalid Authentication"
            })))
            .mount(&server)
            .await;

        let provider = Fast2SmsProvider::new(config(&server.uri())).unwrap();
        let result = provider
            .send(&SmsMessage {
                to: "9876543210".to_string(),
                body: "hello".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ProviderError::SendFailed(_))));
    }

    #[tokio::test]
    async fn disabled_provider_does_not_send() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.enabled = false;
        let provider = Fast2SmsProvider::new(cfg).unwrap();
        let result = provider
            .send(&SmsMessage {
                to: "9876543210".to_string(),
                body: "hello".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ProviderError::NotEnabled(_))));
    }

    #[tokio::test]
    async fn mock_provider_records_messages() {
        let provider = MockSmsProvider::new();
        provider
            .send(&SmsMessage {
                to: "9876543210".to_string(),
                body: "one".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(provider.send_count(), 1);
        assert_eq!(provider.sent()[0].body, "one");

        let failing = MockSmsProvider::failing();
        assert!(failing
            .send(&SmsMessage {
                to: "9876543210".to_string(),
                body: "two".to_string(),
            })
            .await
            .is_err());
    }
}
