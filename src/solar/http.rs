use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::warn;

use crate::domain::{MeterError, SolarMeter};

/// Meter exposing the net consumption in watts as a plain-text float
#[derive(Clone)]
pub struct HttpSolarMeter {
    url: String,
    client: reqwest::Client,
}

impl HttpSolarMeter {
    pub fn new(url: String, timeout: Duration) -> Result<Self, MeterError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("climate-controller/0.3"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| MeterError::Request(e.to_string()))?;
        Ok(Self { url, client })
    }

    pub async fn fetch(&self) -> Result<f64, MeterError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| MeterError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MeterError::Status(status.as_u16()));
        }
        let body = resp.text().await.map_err(|e| MeterError::Request(e.to_string()))?;
        parse_reading(&body)
    }
}

fn parse_reading(body: &str) -> Result<f64, MeterError> {
    body.trim()
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite())
        .ok_or_else(|| MeterError::Parse(body.chars().take(64).collect()))
}

#[async_trait]
impl SolarMeter for HttpSolarMeter {
    async fn net_consumption(&self) -> Option<f64> {
        match self.fetch().await {
            Ok(watts) => Some(watts),
            Err(e) => {
                warn!(error = %e, url = %self.url, "net consumption unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("-734.5\n").unwrap(), -734.5);
        assert_eq!(parse_reading(" 1200 ").unwrap(), 1200.0);
        assert!(matches!(parse_reading("n/a"), Err(MeterError::Parse(_))));
        assert!(matches!(parse_reading("NaN"), Err(MeterError::Parse(_))));
        assert!(matches!(parse_reading(""), Err(MeterError::Parse(_))));
    }
}
