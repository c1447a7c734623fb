use async_trait::async_trait;
use chrono::Timelike;
use std::f64::consts::PI;
use std::sync::Arc;

use crate::config::SimulatedSolarProfile;
use crate::controller::Clock;
use crate::domain::SolarMeter;

/// Constant household load minus a half-sine PV production curve
pub struct SimulatedSolarMeter {
    profile: SimulatedSolarProfile,
    clock: Arc<dyn Clock>,
}

impl SimulatedSolarMeter {
    pub fn new(profile: SimulatedSolarProfile, clock: Arc<dyn Clock>) -> Self {
        Self { profile, clock }
    }

    /// PV output (W) at a fractional hour of the day
    pub fn production_at(&self, hour: f64) -> f64 {
        let p = &self.profile;
        let daylight = p.sunset_hour - p.sunrise_hour;
        if daylight <= 0.0 || hour <= p.sunrise_hour || hour >= p.sunset_hour {
            return 0.0;
        }
        p.peak_production_w * (PI * (hour - p.sunrise_hour) / daylight).sin()
    }

    pub fn net_at(&self, hour: f64) -> f64 {
        self.profile.base_load_w - self.production_at(hour)
    }
}

#[async_trait]
impl SolarMeter for SimulatedSolarMeter {
    async fn net_consumption(&self) -> Option<f64> {
        let now = self.clock.now();
        let hour = f64::from(now.hour()) + f64::from(now.minute()) / 60.0 + f64::from(now.second()) / 3600.0;
        Some(self.net_at(hour))
    }
}
