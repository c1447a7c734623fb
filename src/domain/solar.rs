use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Meter request failed: {0}")]
    Request(String),
    #[error("Meter returned HTTP {0}")]
    Status(u16),
    #[error("Unparseable meter reading: {0:?}")]
    Parse(String),
    #[error("Meter URL not configured")]
    NotConfigured,
}

/// Net power consumption at the grid connection (W).
///
/// Negative values mean solar surplus is being exported. `None` means the
/// reading is unknown for this iteration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SolarMeter: Send + Sync {
    async fn net_consumption(&self) -> Option<f64>;
}
