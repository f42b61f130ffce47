//! Quota providers, the source of a run's send-rate ceiling.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_SEND_RATE;
use crate::error::{ConfigError, QuotaError};

/// Provider-specific options forwarded untouched.
pub type QuotaOptions = serde_json::Map<String, serde_json::Value>;

/// Account sending limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendQuota {
    /// Messages per second the account may sustain.
    #[serde(rename = "MaxSendRate", default)]
    pub max_send_rate: Option<f64>,
    #[serde(rename = "Max24HourSend", default, skip_serializing_if = "Option::is_none")]
    pub max_24_hour_send: Option<f64>,
    #[serde(rename = "SentLast24Hours", default, skip_serializing_if = "Option::is_none")]
    pub sent_last_24_hours: Option<f64>,
}

impl SendQuota {
    pub fn with_rate(max_send_rate: f64) -> Self {
        Self {
            max_send_rate: Some(max_send_rate),
            ..Self::default()
        }
    }

    /// Whole recipients per batch, at least one. `None` when no usable rate was reported.
    pub fn rate_ceiling(&self) -> Option<usize> {
        self.max_send_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| (rate.floor() as usize).max(1))
    }
}

/// Returns the current sending limits for the account.
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quota(&self, options: &QuotaOptions) -> Result<SendQuota, QuotaError>;
}

/// Fixed quota, for relays that publish no limits.
#[derive(Debug, Clone)]
pub struct StaticQuota {
    quota: SendQuota,
}

impl StaticQuota {
    pub fn new(max_send_rate: f64) -> Self {
        Self {
            quota: SendQuota::with_rate(max_send_rate),
        }
    }
}

#[async_trait]
impl QuotaProvider for StaticQuota {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_quota(&self, _options: &QuotaOptions) -> Result<SendQuota, QuotaError> {
        Ok(self.quota.clone())
    }
}

/// Fetches the quota from an HTTP endpoint answering with a [`SendQuota`] JSON body.
///
/// The run's quota options are posted as the request body.
#[derive(Debug, Clone)]
pub struct HttpQuota {
    client: reqwest::Client,
    url: String,
}

impl HttpQuota {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn failed(&self, reason: impl std::fmt::Display) -> QuotaError {
        QuotaError::RequestFailed {
            provider: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl QuotaProvider for HttpQuota {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_quota(&self, options: &QuotaOptions) -> Result<SendQuota, QuotaError> {
        let response = self
            .client
            .post(&self.url)
            .json(options)
            .send()
            .await
            .map_err(|e| self.failed(e))?
            .error_for_status()
            .map_err(|e| self.failed(e))?;

        let quota = response
            .json::<SendQuota>()
            .await
            .map_err(|e| QuotaError::InvalidResponse {
                provider: self.url.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(provider = %self.url, rate = ?quota.max_send_rate, "Fetched send quota");
        Ok(quota)
    }
}

/// Choose the quota provider from the environment.
///
/// `NEWSLETTER_QUOTA_URL` selects [`HttpQuota`]; otherwise
/// `NEWSLETTER_MAX_SEND_RATE` (default 50) feeds a [`StaticQuota`].
pub fn from_env() -> Result<Arc<dyn QuotaProvider>, ConfigError> {
    if let Ok(url) = std::env::var("NEWSLETTER_QUOTA_URL") {
        tracing::info!("Using HTTP quota provider at {url}");
        return Ok(Arc::new(HttpQuota::new(url)));
    }

    let rate = match std::env::var("NEWSLETTER_MAX_SEND_RATE") {
        Ok(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "NEWSLETTER_MAX_SEND_RATE".into(),
                message: format!("expected a positive number, got {raw:?}"),
            })?,
        Err(_) => DEFAULT_MAX_SEND_RATE as f64,
    };

    tracing::info!("Using static quota of {rate} messages per window");
    Ok(Arc::new(StaticQuota::new(rate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_floors_and_clamps() {
        assert_eq!(SendQuota::with_rate(14.0).rate_ceiling(), Some(14));
        assert_eq!(SendQuota::with_rate(50.9).rate_ceiling(), Some(50));
        assert_eq!(SendQuota::with_rate(0.5).rate_ceiling(), Some(1));
        assert_eq!(SendQuota::with_rate(0.0).rate_ceiling(), None);
        assert_eq!(SendQuota::default().rate_ceiling(), None);
    }

    #[test]
    fn quota_uses_provider_field_names() {
        let quota: SendQuota = serde_json::from_str(
            r#"{ "Max24HourSend": 50000, "MaxSendRate": 14, "SentLast24Hours": 12 }"#,
        )
        .unwrap();
        assert_eq!(quota.max_send_rate, Some(14.0));
        assert_eq!(quota.max_24_hour_send, Some(50000.0));
        assert_eq!(quota.sent_last_24_hours, Some(12.0));
    }

    #[tokio::test]
    async fn static_quota_ignores_options() {
        let provider = StaticQuota::new(20.0);
        let mut options = QuotaOptions::new();
        options.insert("region".into(), "eu-west-1".into());
        let quota = provider.get_quota(&options).await.unwrap();
        assert_eq!(quota.rate_ceiling(), Some(20));
    }

    #[tokio::test]
    async fn http_quota_unreachable_is_request_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let provider = HttpQuota::new(format!("http://127.0.0.1:{port}/quota"));
        let err = provider.get_quota(&QuotaOptions::new()).await.unwrap_err();
        assert!(matches!(err, QuotaError::RequestFailed { .. }));
    }
}
