//! Time-of-day power scheduling.
//!
//! Two named periods decide when a unit should be switched on or off:
//! a daytime period that follows the net solar flow and a morning period
//! that follows the coldest (or warmest) zone. Right after a period ends
//! any unit the policy itself switched on is switched back off. Units a
//! person switched on are never switched off by the policy.

use chrono::NaiveTime;
use itertools::{Itertools, MinMaxResult};
use std::collections::HashMap;
use strum::Display;

use super::clock::TimeWindow;
use crate::config::{ConfigurationError, ControlConfig, PeriodConfig};
use crate::domain::{OperatingMode, UnitId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePeriod {
    pub window: TimeWindow,
    pub mode: OperatingMode,
    pub trigger: f64,
}

impl TimePeriod {
    pub fn parse(name: &str, cfg: &PeriodConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            window: TimeWindow::parse(name, &cfg.window)?,
            mode: cfg.mode,
            trigger: cfg.trigger,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PowerReason {
    SolarSurplus,
    GridDraw,
    BelowTarget,
    AboveTarget,
    PeriodEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    TurnOn(PowerReason),
    TurnOff(PowerReason),
    Hold,
}

impl PowerAction {
    /// Desired power state, if a command is to be issued
    pub fn command(&self) -> Option<bool> {
        match self {
            PowerAction::TurnOn(_) => Some(true),
            PowerAction::TurnOff(_) => Some(false),
            PowerAction::Hold => None,
        }
    }
}

/// Per-unit record of whether the policy itself last switched the unit on
#[derive(Debug, Default, Clone)]
pub struct OnOffBias {
    by_unit: HashMap<UnitId, bool>,
}

impl OnOffBias {
    /// Every known unit starts as not policy-on
    pub fn seed(&mut self, unit_ids: &[UnitId]) {
        for id in unit_ids {
            self.by_unit.entry(*id).or_insert(false);
        }
    }

    pub fn is_policy_on(&self, unit_id: UnitId) -> bool {
        self.by_unit.get(&unit_id).copied().unwrap_or(false)
    }

    pub fn record(&mut self, unit_id: UnitId, on: bool) {
        self.by_unit.insert(unit_id, on);
    }
}

/// What the policy needs to know about one unit
#[derive(Debug, Clone)]
pub struct UnitPowerView {
    pub unit_id: UnitId,
    pub mode: OperatingMode,
    pub zone_temperatures: Vec<f64>,
    pub policy_on: bool,
}

/// Daytime and morning periods parsed from one [`ControlConfig`] snapshot
#[derive(Debug, Clone)]
pub struct PowerSchedule {
    daytime: TimePeriod,
    morning: TimePeriod,
    target: f64,
    /// Net flow (W) either side of zero that counts as surplus or deficit
    surplus_threshold: f64,
    grace_minutes: u32,
}

impl PowerSchedule {
    pub fn from_config(cfg: &ControlConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            daytime: TimePeriod::parse("daytime", &cfg.periods.daytime)?,
            morning: TimePeriod::parse("morning", &cfg.periods.morning)?,
            target: f64::from(cfg.target_temperature),
            surplus_threshold: cfg.solar_surplus_ratio * cfg.power_consumption,
            grace_minutes: cfg.period_end_grace_minutes,
        })
    }

    pub fn decide(&self, now: NaiveTime, unit: &UnitPowerView, net_consumption: Option<f64>) -> PowerAction {
        if self.daytime.window.contains(now) {
            if unit.mode != self.daytime.mode {
                return PowerAction::Hold;
            }
            self.decide_daytime(unit, net_consumption)
        } else if self.morning.window.contains(now) {
            if unit.mode != self.morning.mode {
                return PowerAction::Hold;
            }
            self.decide_morning(unit)
        } else if unit.policy_on && self.is_period_end_boundary(now) {
            PowerAction::TurnOff(PowerReason::PeriodEnded)
        } else {
            PowerAction::Hold
        }
    }

    /// Within the grace period after either window's end
    pub fn is_period_end_boundary(&self, now: NaiveTime) -> bool {
        self.daytime.window.just_ended(now, self.grace_minutes)
            || self.morning.window.just_ended(now, self.grace_minutes)
    }

    fn decide_daytime(&self, unit: &UnitPowerView, net_consumption: Option<f64>) -> PowerAction {
        let (Some(net), Some((_, warmest))) = (net_consumption, zone_extremes(&unit.zone_temperatures)) else {
            return PowerAction::Hold;
        };

        if net < -self.surplus_threshold && warmest > self.target + self.daytime.trigger {
            PowerAction::TurnOn(PowerReason::SolarSurplus)
        } else if net > self.surplus_threshold && unit.policy_on {
            PowerAction::TurnOff(PowerReason::GridDraw)
        } else {
            PowerAction::Hold
        }
    }

    fn decide_morning(&self, unit: &UnitPowerView) -> PowerAction {
        let Some((coldest, _)) = zone_extremes(&unit.zone_temperatures) else {
            return PowerAction::Hold;
        };

        if coldest < self.target - self.morning.trigger {
            PowerAction::TurnOn(PowerReason::BelowTarget)
        } else if coldest > self.target && unit.policy_on {
            PowerAction::TurnOff(PowerReason::AboveTarget)
        } else {
            PowerAction::Hold
        }
    }
}

fn zone_extremes(temperatures: &[f64]) -> Option<(f64, f64)> {
    let finite = temperatures.iter().copied().filter(|t| t.is_finite());
    match finite.minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(t) => Some((t, t)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn control() -> ControlConfig {
        let mut cfg = ControlConfig {
            target_temperature: 24,
            power_consumption: 1000.0,
            ..Default::default()
        };
        cfg.periods.daytime = PeriodConfig {
            window: vec!["09:00".into(), "18:00".into()],
            mode: OperatingMode::Cool,
            trigger: 2.0,
        };
        cfg.periods.morning = PeriodConfig {
            window: vec!["06:00".into(), "09:00".into()],
            mode: OperatingMode::Heat,
            trigger: 1.0,
        };
        cfg
    }

    fn schedule() -> PowerSchedule {
        PowerSchedule::from_config(&control()).unwrap()
    }

    fn unit(mode: OperatingMode, zones: &[f64], policy_on: bool) -> UnitPowerView {
        UnitPowerView {
            unit_id: UnitId(1),
            mode,
            zone_temperatures: zones.to_vec(),
            policy_on,
        }
    }

    #[test]
    fn test_daytime_surplus_and_warm_zone_turns_on() {
        let action = schedule().decide(t(10, 0), &unit(OperatingMode::Cool, &[25.0, 27.0], false), Some(-700.0));
        assert_eq!(action, PowerAction::TurnOn(PowerReason::SolarSurplus));
    }

    #[rstest]
    // surplus below 0.6 * 1000
    #[case(Some(-500.0), &[27.0], false, PowerAction::Hold)]
    // warmest zone not past target + trigger
    #[case(Some(-700.0), &[26.0], false, PowerAction::Hold)]
    #[case(Some(700.0), &[27.0], true, PowerAction::TurnOff(PowerReason::GridDraw))]
    // grid draw never switches off a manually started unit
    #[case(Some(700.0), &[27.0], false, PowerAction::Hold)]
    #[case(None, &[27.0], true, PowerAction::Hold)]
    #[case(Some(-700.0), &[], false, PowerAction::Hold)]
    fn test_daytime_rules(
        #[case] net: Option<f64>,
        #[case] zones: &[f64],
        #[case] policy_on: bool,
        #[case] expected: PowerAction,
    ) {
        let action = schedule().decide(t(12, 30), &unit(OperatingMode::Cool, zones, policy_on), net);
        assert_eq!(action, expected);
    }

    #[test]
    fn test_period_ignores_units_in_other_modes() {
        let s = schedule();
        let heat = unit(OperatingMode::Heat, &[30.0], true);
        assert_eq!(s.decide(t(10, 0), &heat, Some(-5000.0)), PowerAction::Hold);
        let cool = unit(OperatingMode::Cool, &[10.0], true);
        assert_eq!(s.decide(t(7, 0), &cool, None), PowerAction::Hold);
    }

    #[rstest]
    #[case(&[22.5, 25.0], false, PowerAction::TurnOn(PowerReason::BelowTarget))]
    #[case(&[23.5], false, PowerAction::Hold)]
    #[case(&[24.5, 26.0], true, PowerAction::TurnOff(PowerReason::AboveTarget))]
    #[case(&[24.5], false, PowerAction::Hold)]
    #[case(&[24.0], true, PowerAction::Hold)]
    fn test_morning_rules(#[case] zones: &[f64], #[case] policy_on: bool, #[case] expected: PowerAction) {
        let action = schedule().decide(t(7, 15), &unit(OperatingMode::Heat, zones, policy_on), None);
        assert_eq!(action, expected);
    }

    #[rstest]
    #[case(t(18, 3), true, PowerAction::TurnOff(PowerReason::PeriodEnded))]
    #[case(t(18, 6), true, PowerAction::Hold)]
    #[case(t(18, 3), false, PowerAction::Hold)]
    #[case(t(9, 2), true, PowerAction::Hold)]
    #[case(t(20, 0), true, PowerAction::Hold)]
    fn test_after_period_end(#[case] now: NaiveTime, #[case] policy_on: bool, #[case] expected: PowerAction) {
        // 09:02 is inside daytime, so the morning grace does not apply
        let action = schedule().decide(now, &unit(OperatingMode::Cool, &[30.0], policy_on), Some(0.0));
        assert_eq!(action, expected);
    }

    #[test]
    fn test_grace_crosses_midnight() {
        let mut cfg = control();
        cfg.periods.daytime.window = vec!["20:00".into(), "23:58".into()];
        let s = PowerSchedule::from_config(&cfg).unwrap();
        assert!(s.is_period_end_boundary(t(0, 1)));
        assert!(!s.is_period_end_boundary(t(0, 4)));
    }

    #[test]
    fn test_malformed_period_is_configuration_error() {
        let mut cfg = control();
        cfg.periods.morning.window = vec!["six".into(), "09:00".into()];
        let err = PowerSchedule::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedPeriod { ref name, .. } if name == "morning"));
    }

    #[test]
    fn test_bias_defaults_off_and_tracks_commands() {
        let mut bias = OnOffBias::default();
        bias.seed(&[UnitId(1), UnitId(2)]);
        assert!(!bias.is_policy_on(UnitId(1)));
        bias.record(UnitId(1), true);
        bias.seed(&[UnitId(1)]);
        assert!(bias.is_policy_on(UnitId(1)));
        bias.record(UnitId(1), false);
        assert!(!bias.is_policy_on(UnitId(1)));
        assert!(!bias.is_policy_on(UnitId(9)));
    }
}
