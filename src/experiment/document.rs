//! Run documents emitted to observers.
//!
//! A run produces a small document stream, modeled on the Bluesky document
//! model:
//!
//! ```text
//! StartDoc (1)          plan name, source, run metadata
//!    │
//!    ├── EventDoc (N)   one per executed action: channel, value, hold
//!    │
//! StopDoc (1)           exit status + RunSummary
//! ```
//!
//! Documents carry uids and nanosecond timestamps so a consumer can correlate
//! them after the fact.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hardware::capabilities::ChannelValue;
use crate::metadata::RunMetadata;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Document types for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Document {
    /// Run started
    Start(StartDoc),
    /// One action applied
    Event(EventDoc),
    /// Run ended
    Stop(StopDoc),
}

impl Document {
    /// Get the document UID
    pub fn uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid,
            Document::Event(d) => &d.uid,
            Document::Stop(d) => &d.uid,
        }
    }

    /// Get the run UID this document belongs to
    pub fn run_uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid, // Start doc UID is the run UID
            Document::Event(d) => &d.run_uid,
            Document::Stop(d) => &d.run_uid,
        }
    }

    /// Get the timestamp in nanoseconds
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Document::Start(d) => d.time_ns,
            Document::Event(d) => d.time_ns,
            Document::Stop(d) => d.time_ns,
        }
    }
}

/// Start document - emitted before the first write of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDoc {
    /// Unique run identifier (this IS the run_uid)
    pub uid: String,
    /// Plan name (template id or `action_table`)
    pub plan_name: String,
    /// Template id or file path the plan was built from
    pub source: String,
    /// Steps in the plan
    pub num_steps: usize,
    /// Writes in the plan
    pub num_actions: usize,
    /// Run metadata
    pub metadata: RunMetadata,
    /// Creation time, ns since the Unix epoch
    pub time_ns: u64,
}

impl StartDoc {
    /// Start document for a run; its uid is the run uid.
    pub fn new(plan_name: &str, source: &str, metadata: RunMetadata) -> Self {
        Self {
            uid: metadata.run_uid.clone(),
            plan_name: plan_name.to_string(),
            source: source.to_string(),
            num_steps: 0,
            num_actions: 0,
            metadata,
            time_ns: now_ns(),
        }
    }

    /// Record the plan's step and action counts.
    pub fn with_counts(mut self, num_steps: usize, num_actions: usize) -> Self {
        self.num_steps = num_steps;
        self.num_actions = num_actions;
        self
    }
}

/// Event document - one executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDoc {
    /// Document uid
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// 0-based action index within the run
    pub index: usize,
    /// 1-based source index of the step this action belongs to
    pub step: usize,
    /// Channel written
    pub channel: String,
    /// Value actually written (after coercion)
    pub value: ChannelValue,
    /// Hold applied after the write, in seconds
    pub hold_s: f64,
    /// Reading taken after the write, when the action asked for one
    pub readback: Option<ChannelValue>,
    /// Creation time, ns since the Unix epoch
    pub time_ns: u64,
}

impl EventDoc {
    /// Event for action `index` of step `step`, recording the value actually written.
    pub fn new(run_uid: &str, index: usize, step: usize, channel: &str, value: ChannelValue) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            index,
            step,
            channel: channel.to_string(),
            value,
            hold_s: 0.0,
            readback: None,
            time_ns: now_ns(),
        }
    }

    /// Record the hold that follows the write.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold_s = hold.as_secs_f64();
        self
    }

    /// Attach the value read back, if any.
    pub fn with_readback(mut self, readback: Option<ChannelValue>) -> Self {
        self.readback = readback;
        self
    }

    /// Hold as a `Duration`.
    pub fn hold(&self) -> Duration {
        Duration::from_secs_f64(self.hold_s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every action ran
    Success,
    /// Stopped early on request
    Cancelled,
    /// Aborted on an error
    Failed,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitStatus::Success => "success",
            ExitStatus::Cancelled => "cancelled",
            ExitStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_uid: String,
    /// How the run ended
    pub exit_status: ExitStatus,
    /// Actions that were written (and held) successfully
    pub steps_completed: usize,
    /// Actions never attempted because the run stopped early
    pub steps_skipped: usize,
    /// 0-based index of the action that failed
    pub failed_step: Option<usize>,
    /// Wall-clock time from first write to end of rest state
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Rest-state writes that failed, channel -> error message
    pub rest_state_errors: BTreeMap<String, String>,
}

impl RunSummary {
    /// True for `ExitStatus::Success`.
    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }
}

/// Stop document - emitted after the rest state has been applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDoc {
    /// Document uid
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// How the run ended
    pub exit_status: ExitStatus,
    /// Reason for cancel/failure
    pub reason: String,
    /// Final run summary
    pub summary: RunSummary,
    /// Creation time, ns since the Unix epoch
    pub time_ns: u64,
}

impl StopDoc {
    /// Stop document closing the run in `summary`.
    pub fn new(summary: &RunSummary, reason: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: summary.run_uid.clone(),
            exit_status: summary.exit_status,
            reason: reason.to_string(),
            summary: summary.clone(),
            time_ns: now_ns(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
