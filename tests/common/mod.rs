//! Common test utilities for sidekick-daq integration tests
//!
//! - A simulated rig with handles to every endpoint
//! - A timeline observer that stamps each step with (paused) run time
//! - Timing assertions with tolerances

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sidekick_daq::config::default_channels;
use sidekick_daq::error::DaqError;
use sidekick_daq::experiment::{EventDoc, RunEngine, RunObserver, RunSummary, StartDoc};
use sidekick_daq::hardware::{ChannelRegistry, ChannelValue, SimulatedEndpoint};
use tokio::time::Instant;

/// Simulated Sidekick rig: engine plus direct access to the endpoints.
pub struct TestRig {
    pub engine: RunEngine,
    pub endpoints: HashMap<String, SimulatedEndpoint>,
}

impl TestRig {
    pub fn new() -> Self {
        let mut registry = ChannelRegistry::new();
        let mut endpoints = HashMap::new();
        for spec in default_channels() {
            let endpoint = SimulatedEndpoint::new(spec.value_type).labeled(&spec.pv);
            registry
                .register(&spec.name, Arc::new(endpoint.clone()), spec.value_type)
                .unwrap();
            endpoints.insert(spec.name, endpoint);
        }
        Self {
            engine: RunEngine::new(Arc::new(registry)),
            endpoints,
        }
    }

    pub fn endpoint(&self, name: &str) -> &SimulatedEndpoint {
        &self.endpoints[name]
    }

    pub fn value(&self, name: &str) -> ChannelValue {
        self.endpoint(name).value()
    }
}

/// One observed step: time since run start, channel, value, hold.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedStep {
    pub at: Duration,
    pub channel: String,
    pub value: ChannelValue,
    pub hold: Duration,
}

/// Records steps against the tokio clock, so paused-time tests get exact times.
#[derive(Default)]
pub struct Timeline {
    started: Mutex<Option<Instant>>,
    steps: Mutex<Vec<TimedStep>>,
    finished: Mutex<Option<RunSummary>>,
    errors: Mutex<Vec<String>>,
}

impl Timeline {
    pub fn steps(&self) -> Vec<TimedStep> {
        self.steps.lock().unwrap().clone()
    }

    pub fn triples(&self) -> Vec<(String, ChannelValue, Duration)> {
        self.steps()
            .into_iter()
            .map(|s| (s.channel, s.value, s.hold))
            .collect()
    }

    pub fn finished(&self) -> Option<RunSummary> {
        self.finished.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl RunObserver for Timeline {
    fn on_start(&self, _start: &StartDoc) {
        *self.started.lock().unwrap() = Some(Instant::now());
    }

    fn on_step(&self, event: &EventDoc) {
        let at = self
            .started
            .lock()
            .unwrap()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.steps.lock().unwrap().push(TimedStep {
            at,
            channel: event.channel.clone(),
            value: event.value,
            hold: event.hold(),
        });
    }

    fn on_complete(&self, summary: &RunSummary) {
        *self.finished.lock().unwrap() = Some(summary.clone());
    }

    fn on_error(&self, error: &DaqError, summary: &RunSummary) {
        self.errors.lock().unwrap().push(error.to_string());
        *self.finished.lock().unwrap() = Some(summary.clone());
    }
}

/// Tolerance levels for timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// Exact match - only for simulated time with `start_paused = true`
    Exact,
    /// 20% tolerance - real clock on a developer machine
    Normal,
}

impl TimingTolerance {
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Exact => 0.0,
            TimingTolerance::Normal => 0.20,
        }
    }
}

/// Assert that a duration is within tolerance of an expected value.
pub fn assert_duration_near(
    actual: Duration,
    expected: Duration,
    tolerance: TimingTolerance,
    context: &str,
) {
    let factor = tolerance.factor();
    let min = expected.mul_f64(1.0 - factor);
    let max = expected.mul_f64(1.0 + factor);

    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} ±{:.0}%, got {:?}",
        context,
        expected,
        factor * 100.0,
        actual
    );
}
