use crate::config::TimezoneConfig;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TimezoneError {
    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Time zone lookup failed: {0}")]
    Request(String),

    #[error("No time zone known for ({latitude}, {longitude})")]
    Missing { latitude: f64, longitude: f64 },
}

/// Resolves coordinates to an IANA time zone identifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimezoneLookup: Send + Sync {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, TimezoneError>;
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), TimezoneError> {
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);

    if valid {
        Ok(())
    } else {
        Err(TimezoneError::InvalidCoordinates {
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TimezoneResponse {
    #[serde(rename = "timeZone")]
    time_zone: Option<String>,
}

/// Time zone lookup against an HTTP endpoint
pub struct HttpTimezoneLookup {
    client: Client,
    base_url: String,
}

impl HttpTimezoneLookup {
    pub fn new(config: &TimezoneConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build time zone HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl TimezoneLookup for HttpTimezoneLookup {
    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<String, TimezoneError> {
        validate_coordinates(latitude, longitude)?;

        let response: TimezoneResponse = self
            .client
            .get(&self.base_url)
            .query(&[("latitude", latitude), ("longitude", longitude)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TimezoneError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| TimezoneError::Request(e.to_string()))?;

        debug!(latitude, longitude, timezone = ?response.time_zone, "Time zone resolved");

        response
            .time_zone
            .filter(|tz| !tz.trim().is_empty())
            .ok_or(TimezoneError::Missing {
                latitude,
                longitude,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(59.65, 17.92).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_response_parsing() {
        let response: TimezoneResponse =
            serde_json::from_str(r#"{"timeZone": "Europe/Stockholm", "currentLocalTime": "x"}"#)
                .unwrap();
        assert_eq!(response.time_zone.as_deref(), Some("Europe/Stockholm"));

        let response: TimezoneResponse = serde_json::from_str("{}").unwrap();
        assert!(response.time_zone.is_none());
    }

    #[tokio::test]
    async fn test_invalid_coordinates_skip_the_request() {
        let lookup = HttpTimezoneLookup::new(
            &TimezoneConfig {
                base_url: "http://127.0.0.1:9/unreachable".to_string(),
                timeout_secs: 1,
            },
            Duration::from_secs(1),
        )
        .unwrap();

        let result = lookup.lookup(120.0, 10.0).await;

        assert!(matches!(result, Err(TimezoneError::InvalidCoordinates { .. })));
    }
}
