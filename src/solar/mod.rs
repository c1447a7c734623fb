//! Net grid consumption readings for the power-scheduling loop.

pub mod http;
pub mod simulated;

pub use http::HttpSolarMeter;
pub use simulated::SimulatedSolarMeter;
