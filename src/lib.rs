//! Closed-loop multi-zone HVAC control daemon.
//!
//! Reads unit and zone temperatures from a [`domain::ClimateDriver`], runs a
//! reactive [`algorithm::ReactiveAlgorithm`] per unit and writes the next
//! setpoint and damper openings back. An optional power-scheduling loop
//! switches units on and off by time of day and solar surplus.

pub mod algorithm;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod repo;
pub mod solar;
pub mod telemetry;
