//! Action plans and the built-in templates.
//!
//! An [`ActionPlan`] is an ordered list of [`Step`]s, each holding one or more
//! [`Action`]s, plus an optional [`RestState`] restored after the run. Order is
//! execution order.

use std::time::Duration;

use serde::Serialize;

use crate::config::channels::{LED_BRIGHTNESS, SHUTTER_ENABLE};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::ChannelValue;

/// One channel write followed by a hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    channel: String,
    value: ChannelValue,
    #[serde(with = "duration_secs")]
    hold: Duration,
    readback: bool,
}

impl Action {
    /// Write `value` to `channel` with no hold.
    pub fn set(channel: &str, value: impl Into<ChannelValue>) -> Self {
        Self {
            channel: channel.to_string(),
            value: value.into(),
            hold: Duration::ZERO,
            readback: false,
        }
    }

    /// Hold for `hold` after the write.
    pub fn hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Read the channel back after the write and report the reading.
    pub fn with_readback(mut self) -> Self {
        self.readback = true;
        self
    }

    /// Target channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Value to write.
    pub fn value(&self) -> ChannelValue {
        self.value
    }

    /// Wait after the write.
    pub fn hold_duration(&self) -> Duration {
        self.hold
    }

    /// True if the channel is read back after the write.
    pub fn readback(&self) -> bool {
        self.readback
    }
}

/// Actions sourced from one plan entry (one template instruction, one sweep
/// point, or one table row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// 1-based index in the plan's source (row number for table plans)
    pub source_index: usize,
    /// Writes in execution order
    pub actions: Vec<Action>,
}

/// Channel values to restore after a run, in write order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestState {
    entries: Vec<(String, ChannelValue)>,
}

impl RestState {
    /// Empty rest state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a channel's rest value. A replaced channel keeps its position.
    pub fn with(mut self, channel: &str, value: impl Into<ChannelValue>) -> Self {
        self.insert(channel, value.into());
        self
    }

    /// In-place form of [`with`](Self::with).
    pub fn insert(&mut self, channel: &str, value: ChannelValue) {
        match self.entries.iter_mut().find(|(name, _)| name == channel) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((channel.to_string(), value)),
        }
    }

    /// Rest value for `channel`, if declared.
    pub fn get(&self, channel: &str) -> Option<ChannelValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, v)| *v)
    }

    /// Entries in write order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ChannelValue)> {
        self.entries.iter().map(|(name, v)| (name.as_str(), *v))
    }

    /// Number of channels restored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is restored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered sequence of steps plus an optional rest state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionPlan {
    name: String,
    source: String,
    steps: Vec<Step>,
    rest_state: Option<RestState>,
}

impl ActionPlan {
    /// Start a plan; the source defaults to `name`.
    pub fn builder(name: &str) -> ActionPlanBuilder {
        ActionPlanBuilder {
            name: name.to_string(),
            source: name.to_string(),
            steps: Vec::new(),
            rest_state: None,
        }
    }

    /// Plan name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the plan came from (template id or file path).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// All actions in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }

    /// Number of individual writes.
    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }

    /// Values restored after the run, if any.
    pub fn rest_state(&self) -> Option<&RestState> {
        self.rest_state.as_ref()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of every hold in the plan.
    pub fn total_hold(&self) -> Duration {
        self.actions().map(Action::hold_duration).sum()
    }
}

/// Builder for [`ActionPlan`]. Refuses to produce a plan without actions.
#[derive(Debug)]
pub struct ActionPlanBuilder {
    name: String,
    source: String,
    steps: Vec<Step>,
    rest_state: Option<RestState>,
}

impl ActionPlanBuilder {
    /// Where the plan came from.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Append a single-action step.
    pub fn action(self, action: Action) -> Self {
        self.step(vec![action])
    }

    /// Append a step; its source index is its 1-based position in the plan.
    pub fn step(mut self, actions: Vec<Action>) -> Self {
        let source_index = self.steps.len() + 1;
        self.steps.push(Step {
            source_index,
            actions,
        });
        self
    }

    /// Append a step with an explicit source index (e.g. a table row number).
    pub fn step_at(mut self, source_index: usize, actions: Vec<Action>) -> Self {
        self.steps.push(Step {
            source_index,
            actions,
        });
        self
    }

    /// Values to restore after the run.
    pub fn rest_state(mut self, rest_state: RestState) -> Self {
        self.rest_state = Some(rest_state);
        self
    }

    /// Fails with `EmptyPlan` if no step carries an action.
    pub fn build(self) -> AppResult<ActionPlan> {
        if self.steps.iter().all(|s| s.actions.is_empty()) {
            return Err(DaqError::EmptyPlan(format!("plan '{}' contains no actions", self.name)));
        }
        Ok(ActionPlan {
            name: self.name,
            source: self.source,
            steps: self.steps,
            rest_state: self.rest_state,
        })
    }
}

// =============================================================================
// Built-in templates
// =============================================================================

/// Built-in plan templates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Template {
    /// LED on, open shutter, close shutter, LED off.
    SmokeTest,
    /// Evenly spaced LED brightness points from 0 to 255 inclusive.
    LinearSweep {
        /// Number of points, endpoints included
        steps: usize,
        /// Hold after each point
        hold: Duration,
    },
}

impl Template {
    /// Template id, used as the plan name and source.
    pub fn id(&self) -> &'static str {
        match self {
            Template::SmokeTest => "smoke_test",
            Template::LinearSweep { .. } => "brightness_sweep",
        }
    }
}

/// Brightness range of the LED driver.
pub const BRIGHTNESS_MIN: f64 = 0.0;
/// Highest LED brightness level.
pub const BRIGHTNESS_MAX: f64 = 255.0;

pub(crate) fn smoke_test() -> AppResult<ActionPlan> {
    ActionPlan::builder(Template::SmokeTest.id())
        .action(Action::set(LED_BRIGHTNESS, 128.0).hold(Duration::from_millis(500)))
        .action(Action::set(SHUTTER_ENABLE, true).hold(Duration::from_secs(1)))
        .action(Action::set(SHUTTER_ENABLE, false))
        .action(Action::set(LED_BRIGHTNESS, 0.0))
        .rest_state(
            RestState::new()
                .with(LED_BRIGHTNESS, 0.0)
                .with(SHUTTER_ENABLE, false),
        )
        .build()
}

pub(crate) fn linear_sweep(steps: usize, hold: Duration) -> AppResult<ActionPlan> {
    if steps == 0 {
        return Err(DaqError::EmptyPlan(
            "brightness sweep needs at least one point".to_string(),
        ));
    }
    let mut builder = ActionPlan::builder(Template::LinearSweep { steps, hold }.id());
    for value in linspace(BRIGHTNESS_MIN, BRIGHTNESS_MAX, steps) {
        builder = builder.action(
            Action::set(LED_BRIGHTNESS, value.round())
                .hold(hold)
                .with_readback(),
        );
    }
    builder
        .rest_state(RestState::new().with(LED_BRIGHTNESS, 0.0))
        .build()
}

/// `n` evenly spaced points over `[start, end]`, endpoints included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
