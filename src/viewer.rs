//! ==============================================================================
//! viewer.rs - viewer client state
//! ==============================================================================
//!
//! purpose:
//!     what a dashboard keeps while subscribed to the real-time channel:
//!     the current reading, a bounded trend of recent points, and the last
//!     known state of every control.
//!
//! reconciliation:
//!     a toggle updates local control state before the network call resolves.
//!     the next controlUpdate for that action (possibly the toggle's own echo)
//!     overwrites it.
//!
//! ==============================================================================

use crate::domain::{ControlValue, Event, SensorReading};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// trend points kept per viewer
pub const TREND_CAPACITY: usize = 20;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub ph: f64,
    pub ec: f64,
}

impl From<&SensorReading> for TrendPoint {
    fn from(r: &SensorReading) -> Self {
        Self { timestamp: r.timestamp, temperature: r.temperature, ph: r.ph, ec: r.ec }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Ph,
    Ec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeStatus {
    Low,
    Optimal,
    High,
}

impl Metric {
    /// optimal band for lettuce-style leafy crops: (low, high) inclusive
    pub fn optimal_range(self) -> (f64, f64) {
        match self {
            Self::Temperature => (22.0, 26.0),
            Self::Ph => (5.8, 6.5),
            Self::Ec => (1.2, 2.4),
        }
    }

    pub fn value_of(self, reading: &SensorReading) -> f64 {
        match self {
            Self::Temperature => reading.temperature,
            Self::Ph => reading.ph,
            Self::Ec => reading.ec,
        }
    }

    pub fn classify(self, value: f64) -> RangeStatus {
        let (low, high) = self.optimal_range();
        if value < low {
            RangeStatus::Low
        } else if value > high {
            RangeStatus::High
        } else {
            RangeStatus::Optimal
        }
    }
}

#[derive(Clone, Debug)]
pub struct ViewerState {
    current: SensorReading,
    trend: VecDeque<TrendPoint>,
    controls: BTreeMap<String, ControlValue>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ViewerState {
    /// blank dashboard: fallback reading, empty trend, default toggles
    pub fn new(now: DateTime<Utc>) -> Self {
        let controls = [("pump", false), ("lights", true), ("dosing", false)]
            .into_iter()
            .map(|(action, on)| (action.to_string(), ControlValue::Bool(on)))
            .collect();
        Self {
            current: SensorReading::fallback(now),
            trend: VecDeque::with_capacity(TREND_CAPACITY),
            controls,
        }
    }

    pub fn current(&self) -> &SensorReading {
        &self.current
    }

    /// oldest first
    pub fn trend(&self) -> impl Iterator<Item = &TrendPoint> {
        self.trend.iter()
    }

    pub fn trend_len(&self) -> usize {
        self.trend.len()
    }

    pub fn control(&self, action: &str) -> Option<&ControlValue> {
        self.controls.get(action)
    }

    pub fn status(&self, metric: Metric) -> RangeStatus {
        metric.classify(metric.value_of(&self.current))
    }

    /// fold one broadcast event into local state
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SensorUpdate(reading) => {
                if self.trend.len() == TREND_CAPACITY {
                    self.trend.pop_front();
                }
                self.trend.push_back(TrendPoint::from(reading));
                self.current = reading.clone();
            }
            Event::ControlUpdate(command) => {
                self.controls.insert(command.action.clone(), command.value.clone());
            }
        }
    }

    /// optimistic local update ahead of the relay call.
    /// returns the previous value so a failed call can roll back.
    pub fn toggle(&mut self, action: &str, value: ControlValue) -> Option<ControlValue> {
        self.controls.insert(action.to_string(), value)
    }

    /// undo an optimistic toggle whose request never reached the hub
    pub fn rollback(&mut self, action: &str, previous: Option<ControlValue>) {
        match previous {
            Some(value) => {
                self.controls.insert(action.to_string(), value);
            }
            None => {
                self.controls.remove(action);
            }
        }
    }
}
