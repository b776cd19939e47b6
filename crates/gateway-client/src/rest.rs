//! Gateway metadata fetch
//!
//! Before connecting, the fleet asks the REST API where the gateway lives,
//! how many shards it recommends, and how many identifies the token has
//! left. The provider is a trait so tests can inject fixed metadata
//! instead of an HTTP server.

use async_trait::async_trait;
use gateway_common::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// Identify budget attached to a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Total identifies allowed per reset window
    pub total: u32,

    /// Identifies remaining in the current window
    pub remaining: u32,

    /// Milliseconds until the window resets
    pub reset_after: u64,

    /// How many shards may identify concurrently
    pub max_concurrency: u32,
}

/// Response of the gateway metadata endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInformation {
    /// WebSocket URL to connect to
    pub url: String,

    /// Recommended shard count for this token
    pub shards: u32,

    /// Identify budget
    pub session_start_limit: SessionStartLimit,
}

/// Source of gateway metadata
#[async_trait]
pub trait GatewayInformationProvider: Send + Sync {
    /// Fetch fresh gateway metadata
    async fn gateway_information(&self) -> GatewayResult<GatewayInformation>;
}

/// Fetches gateway metadata over HTTP
#[derive(Debug, Clone)]
pub struct HttpGatewayProvider {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl HttpGatewayProvider {
    /// Create a provider for the given API base URL and token
    #[must_use]
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/gateway/bot", self.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GatewayInformationProvider for HttpGatewayProvider {
    async fn gateway_information(&self) -> GatewayResult<GatewayInformation> {
        let response = self
            .client
            .get(self.endpoint())
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|err| GatewayError::GatewayInformation(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::GatewayInformation(format!(
                "{} returned {status}",
                self.endpoint()
            )));
        }

        response
            .json::<GatewayInformation>()
            .await
            .map_err(|err| GatewayError::GatewayInformation(err.to_string()))
    }
}

/// Serves fixed gateway metadata; for tests and offline tooling
#[derive(Debug, Clone)]
pub struct StaticGatewayProvider {
    information: GatewayInformation,
}

impl StaticGatewayProvider {
    /// Wrap fixed metadata
    #[must_use]
    pub fn new(information: GatewayInformation) -> Self {
        Self { information }
    }
}

#[async_trait]
impl GatewayInformationProvider for StaticGatewayProvider {
    async fn gateway_information(&self) -> GatewayResult<GatewayInformation> {
        Ok(self.information.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_path() {
        let provider = HttpGatewayProvider::new("https://api.test/v1/", "tok");
        assert_eq!(provider.endpoint(), "https://api.test/v1/gateway/bot");
    }

    #[test]
    fn test_information_parsing() {
        let json = r#"{
            "url": "wss://gateway.test",
            "shards": 4,
            "session_start_limit": {
                "total": 1000,
                "remaining": 997,
                "reset_after": 14400000,
                "max_concurrency": 2
            }
        }"#;

        let info: GatewayInformation = serde_json::from_str(json).unwrap();
        assert_eq!(info.url, "wss://gateway.test");
        assert_eq!(info.shards, 4);
        assert_eq!(info.session_start_limit.remaining, 997);
        assert_eq!(info.session_start_limit.max_concurrency, 2);
    }

    #[tokio::test]
    async fn test_static_provider_returns_fixed_metadata() {
        let provider = StaticGatewayProvider::new(GatewayInformation {
            url: "wss://gateway.test".to_string(),
            shards: 2,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 1000,
                reset_after: 0,
                max_concurrency: 1,
            },
        });

        let info = provider.gateway_information().await.unwrap();
        assert_eq!(info.shards, 2);
    }
}
