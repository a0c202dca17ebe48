//! Run metadata.
//!
//! `RunMetadata` records who ran what, when, and from which source. It is
//! attached to a run (through the `StartDoc`), never to a plan, and is
//! generated fresh for every invocation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::document::new_uid;

/// Metadata for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Unique run identifier
    pub run_uid: String,
    /// Who ran it
    pub operator: String,
    /// When the run was created
    pub start_time: DateTime<Utc>,
    /// Which template or file the plan came from.
    pub source: String,
    /// Experiment label, e.g. "Sidekick LED Action Scan".
    pub experiment: String,
    /// Extra user-defined keys.
    pub extra: BTreeMap<String, String>,
    /// Version of this software.
    pub software_version: String,
}

impl Default for RunMetadata {
    fn default() -> Self {
        RunMetadataBuilder::new().build()
    }
}

/// A builder for constructing `RunMetadata` instances.
#[derive(Debug, Default)]
pub struct RunMetadataBuilder {
    operator: Option<String>,
    source: Option<String>,
    experiment: Option<String>,
    extra: BTreeMap<String, String>,
}

impl RunMetadataBuilder {
    /// Fresh uid and start time, operator from `$USER`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator name.
    pub fn operator(mut self, operator: &str) -> Self {
        self.operator = Some(operator.to_string());
        self
    }

    /// Template id or file the plan came from.
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Experiment label.
    pub fn experiment(mut self, experiment: &str) -> Self {
        self.experiment = Some(experiment.to_string());
        self
    }

    /// Free-form key/value recorded with the run.
    pub fn extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    /// Stamp the start time and a fresh run uid.
    pub fn build(self) -> RunMetadata {
        RunMetadata {
            run_uid: new_uid(),
            operator: self.operator.unwrap_or_else(|| "unknown".to_string()),
            start_time: Utc::now(),
            source: self.source.unwrap_or_default(),
            experiment: self.experiment.unwrap_or_default(),
            extra: self.extra,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
