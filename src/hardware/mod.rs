//! Climate drivers and the pieces they are assembled from.

pub mod factory;
pub mod simulated;
pub mod snapshot;

pub use factory::{DeviceFactory, HardwareMode};
pub use simulated::{SimulatedClimateDriver, ThermalPhysics};
pub use snapshot::{align_rows, SnapshotAssembler};
