//! RunEngine: executes an action plan against a channel registry.
//!
//! # Execution model
//!
//! ```text
//! lock registry ─► StartDoc ─► for each action:
//!                                  cancelled? ──yes──► stop
//!                                  write ──err──► abort
//!                                  readback (optional, failure only logged)
//!                                  EventDoc
//!                                  hold (interruptible by cancel)
//!                 ─► rest state (always) ─► StopDoc / on_error
//! ```
//!
//! Actions run strictly one after another: no action starts before the
//! previous action's hold has elapsed, and no two actions of a run are ever in
//! flight together. Cancellation is checked between actions and during holds,
//! never in the middle of a write.
//!
//! Whatever way the run ends, every channel named in the plan's rest state is
//! written unconditionally. Failures there are logged and collected in the
//! summary; they never replace the error that aborted the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::error::{AppResult, DaqError};
use crate::experiment::document::{EventDoc, ExitStatus, RunSummary, StartDoc};
use crate::experiment::plans::{ActionPlan, RestState};
use crate::experiment::reporter::Reporter;
use crate::hardware::registry::ChannelRegistry;
use crate::metadata::RunMetadata;

// =============================================================================
// CancelToken
// =============================================================================

/// Cooperative cancellation for a run.
///
/// Clones share the same flag. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Token that has not been cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// True once any clone called `cancel()`.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any token clone, including self.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

// =============================================================================
// RunEngine
// =============================================================================

/// Sequencer bound to one channel registry.
///
/// The engine holds a run lock: concurrent `run` calls on the same engine are
/// serialized, so two plans never interleave writes on the registry.
#[derive(Debug)]
pub struct RunEngine {
    registry: Arc<ChannelRegistry>,
    run_lock: Mutex<()>,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed { index: usize, error: DaqError },
}

impl RunEngine {
    /// Engine driving `registry`.
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            run_lock: Mutex::new(()),
        }
    }

    /// Registry the engine writes to.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// True while a run holds the lock.
    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Run `plan` to completion. Waits for any run already in progress.
    pub async fn run(
        &self,
        plan: ActionPlan,
        metadata: RunMetadata,
        reporter: &Reporter,
    ) -> AppResult<RunSummary> {
        self.run_with_cancel(plan, metadata, reporter, CancelToken::new())
            .await
    }

    /// Like [`run`](Self::run), but fails with `RunInProgress` instead of waiting.
    pub async fn try_run(
        &self,
        plan: ActionPlan,
        metadata: RunMetadata,
        reporter: &Reporter,
        cancel: CancelToken,
    ) -> AppResult<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| DaqError::RunInProgress)?;
        self.execute(plan, metadata, reporter, cancel).await
    }

    /// Run `plan`, stopping early if `cancel` fires.
    ///
    /// Returns `Ok` with `ExitStatus::Success` or `ExitStatus::Cancelled`, or
    /// `Err(DaqError::RunFailed)` carrying the failed step and partial summary.
    pub async fn run_with_cancel(
        &self,
        plan: ActionPlan,
        metadata: RunMetadata,
        reporter: &Reporter,
        cancel: CancelToken,
    ) -> AppResult<RunSummary> {
        let _guard = self.run_lock.lock().await;
        self.execute(plan, metadata, reporter, cancel).await
    }

    async fn execute(
        &self,
        plan: ActionPlan,
        metadata: RunMetadata,
        reporter: &Reporter,
        cancel: CancelToken,
    ) -> AppResult<RunSummary> {
        let run_uid = metadata.run_uid.clone();
        let total = plan.action_count();
        let start = StartDoc::new(plan.name(), plan.source(), metadata)
            .with_counts(plan.len(), total);
        reporter.start(&start);

        let started = Instant::now();
        let mut completed = 0usize;
        let outcome = self
            .execute_steps(&plan, &run_uid, reporter, &cancel, &mut completed)
            .await;

        let rest_state_errors = match plan.rest_state() {
            Some(rest) => self.apply_rest_state(rest).await,
            None => BTreeMap::new(),
        };

        let (exit_status, failed_step) = match &outcome {
            Outcome::Completed => (ExitStatus::Success, None),
            Outcome::Cancelled => (ExitStatus::Cancelled, None),
            Outcome::Failed { index, .. } => (ExitStatus::Failed, Some(*index)),
        };
        let summary = RunSummary {
            run_uid,
            exit_status,
            steps_completed: completed,
            steps_skipped: total - completed - usize::from(failed_step.is_some()),
            failed_step,
            elapsed: started.elapsed(),
            rest_state_errors,
        };

        match outcome {
            Outcome::Failed { index, error } => {
                reporter.error(&error, &summary);
                Err(DaqError::RunFailed {
                    step: index,
                    source: Box::new(error),
                    summary: Box::new(summary),
                })
            }
            Outcome::Completed | Outcome::Cancelled => {
                reporter.complete(&summary);
                Ok(summary)
            }
        }
    }

    async fn execute_steps(
        &self,
        plan: &ActionPlan,
        run_uid: &str,
        reporter: &Reporter,
        cancel: &CancelToken,
        completed: &mut usize,
    ) -> Outcome {
        let mut index = 0usize;
        for step in plan.steps() {
            for action in &step.actions {
                if cancel.is_cancelled() {
                    tracing::info!(index, "Run cancelled before step");
                    return Outcome::Cancelled;
                }

                let written = match self.registry.write(action.channel(), action.value()).await {
                    Ok(v) => v,
                    Err(error) => return Outcome::Failed { index, error },
                };

                // The write already landed; a failed readback only loses the reading.
                let readback = if action.readback() {
                    match self.registry.read(action.channel()).await {
                        Ok(v) => Some(v),
                        Err(error) => {
                            tracing::warn!(index, channel = action.channel(), error = %error, "Readback failed");
                            None
                        }
                    }
                } else {
                    None
                };

                reporter.step(
                    &EventDoc::new(run_uid, index, step.source_index, action.channel(), written)
                        .with_hold(action.hold_duration())
                        .with_readback(readback),
                );

                let hold = action.hold_duration();
                if !hold.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(hold) => {}
                        _ = cancel.cancelled() => {
                            // The write landed; count it before stopping.
                            *completed += 1;
                            tracing::info!(index, "Run cancelled during hold");
                            return Outcome::Cancelled;
                        }
                    }
                }

                *completed += 1;
                index += 1;
            }
        }
        Outcome::Completed
    }

    /// Write every rest-state channel, collecting failures instead of stopping.
    async fn apply_rest_state(&self, rest: &RestState) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        for (channel, value) in rest.iter() {
            if let Err(e) = self.registry.write(channel, value).await {
                tracing::error!(channel, value = %value, error = %e, "Failed to apply rest state");
                errors.insert(channel.to_string(), e.to_string());
            }
        }
        errors
    }
}
