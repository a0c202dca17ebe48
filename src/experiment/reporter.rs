//! Run observers.
//!
//! The run engine reports progress through a [`Reporter`], which fans each
//! document out to zero or more [`RunObserver`]s in subscription order. The
//! engine never knows how the documents are presented.
//!
//! Observers are called synchronously from the run task, so they must be cheap
//! and must not block on I/O that could stall a hold.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::error::DaqError;
use crate::experiment::document::{Document, EventDoc, RunSummary, StartDoc, StopDoc};

/// Receives progress from the run engine.
pub trait RunObserver: Send + Sync {
    /// Called once before the first write.
    fn on_start(&self, _start: &StartDoc) {}

    /// Called after each successful write.
    fn on_step(&self, event: &EventDoc);

    /// Called once when the run finished normally or was cancelled.
    fn on_complete(&self, summary: &RunSummary);

    /// Called once when the run aborted on an error.
    fn on_error(&self, error: &DaqError, summary: &RunSummary);
}

/// Fan-out to subscribed observers. Empty by default (a no-op).
#[derive(Clone, Default)]
pub struct Reporter {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Reporter {
    /// Reporter with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer; it is called after those already attached.
    pub fn subscribe(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    /// Builder-style `subscribe`.
    pub fn with(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    /// Number of attached observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True if no observer is attached.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn start(&self, start: &StartDoc) {
        self.observers.iter().for_each(|o| o.on_start(start));
    }

    pub(crate) fn step(&self, event: &EventDoc) {
        self.observers.iter().for_each(|o| o.on_step(event));
    }

    pub(crate) fn complete(&self, summary: &RunSummary) {
        self.observers.iter().for_each(|o| o.on_complete(summary));
    }

    pub(crate) fn error(&self, error: &DaqError, summary: &RunSummary) {
        self.observers.iter().for_each(|o| o.on_error(error, summary));
    }
}

// =============================================================================
// LoggingObserver
// =============================================================================

/// Emits structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RunObserver for LoggingObserver {
    fn on_start(&self, start: &StartDoc) {
        tracing::info!(
            run_uid = %start.uid,
            plan = %start.plan_name,
            source = %start.source,
            operator = %start.metadata.operator,
            steps = start.num_steps,
            "Run started"
        );
    }

    fn on_step(&self, event: &EventDoc) {
        tracing::info!(
            index = event.index,
            step = event.step,
            channel = %event.channel,
            value = %event.value,
            hold_s = event.hold_s,
            readback = ?event.readback,
            "Step"
        );
    }

    fn on_complete(&self, summary: &RunSummary) {
        tracing::info!(
            run_uid = %summary.run_uid,
            status = %summary.exit_status,
            completed = summary.steps_completed,
            skipped = summary.steps_skipped,
            elapsed = ?summary.elapsed,
            "Run finished"
        );
    }

    fn on_error(&self, error: &DaqError, summary: &RunSummary) {
        tracing::error!(
            run_uid = %summary.run_uid,
            failed_step = ?summary.failed_step,
            completed = summary.steps_completed,
            error = %error,
            "Run aborted"
        );
    }
}

// =============================================================================
// LiveTable
// =============================================================================

/// Best-effort text table, one row per step.
///
/// Write errors are ignored: a broken terminal must not abort a run.
pub struct LiveTable<W: Write + Send> {
    out: Mutex<W>,
}

impl LiveTable<std::io::Stdout> {
    /// Table printed to stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LiveTable<W> {
    /// Table written to `out`.
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// Recover the writer (used by tests to inspect the output).
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{text}");
            let _ = out.flush();
        }
    }
}

const RULE: &str = "+-------+------+----------------------+------------+---------+------------+";

impl<W: Write + Send> RunObserver for LiveTable<W> {
    fn on_start(&self, start: &StartDoc) {
        self.line(&format!(
            "Run {} | {} ({}) | operator: {}",
            start.uid.chars().take(8).collect::<String>(),
            start.plan_name,
            start.source,
            start.metadata.operator
        ));
        self.line(RULE);
        self.line(&format!(
            "| {:>5} | {:>4} | {:<20} | {:>10} | {:>7} | {:>10} |",
            "seq", "step", "channel", "value", "hold s", "readback"
        ));
        self.line(RULE);
    }

    fn on_step(&self, event: &EventDoc) {
        let readback = event
            .readback
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        self.line(&format!(
            "| {:>5} | {:>4} | {:<20} | {:>10} | {:>7.3} | {:>10} |",
            event.index + 1,
            event.step,
            event.channel,
            event.value.to_string(),
            event.hold_s,
            readback
        ));
    }

    fn on_complete(&self, summary: &RunSummary) {
        self.line(RULE);
        self.line(&format!(
            "{}: {} steps in {:.3}s ({} skipped)",
            summary.exit_status,
            summary.steps_completed,
            summary.elapsed.as_secs_f64(),
            summary.steps_skipped
        ));
    }

    fn on_error(&self, error: &DaqError, summary: &RunSummary) {
        self.line(RULE);
        self.line(&format!(
            "failed at step {}: {}",
            summary.failed_step.map(|i| i + 1).unwrap_or(0),
            error
        ));
    }
}

// =============================================================================
// DocumentCollector
// =============================================================================

/// Keeps every document in memory.
#[derive(Debug, Default)]
pub struct DocumentCollector {
    docs: Mutex<Vec<Document>>,
}

impl DocumentCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in order.
    pub fn documents(&self) -> Vec<Document> {
        self.docs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Step events only, in arrival order.
    pub fn events(&self) -> Vec<EventDoc> {
        self.documents()
            .into_iter()
            .filter_map(|d| match d {
                Document::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// The stop document, once the run has ended.
    pub fn stop(&self) -> Option<StopDoc> {
        self.documents().into_iter().find_map(|d| match d {
            Document::Stop(s) => Some(s),
            _ => None,
        })
    }

    fn push(&self, doc: Document) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.push(doc);
        }
    }
}

impl RunObserver for DocumentCollector {
    fn on_start(&self, start: &StartDoc) {
        self.push(Document::Start(start.clone()));
    }

    fn on_step(&self, event: &EventDoc) {
        self.push(Document::Event(event.clone()));
    }

    fn on_complete(&self, summary: &RunSummary) {
        self.push(Document::Stop(StopDoc::new(summary, "")));
    }

    fn on_error(&self, error: &DaqError, summary: &RunSummary) {
        self.push(Document::Stop(StopDoc::new(summary, &error.to_string())));
    }
}

// =============================================================================
// BroadcastObserver
// =============================================================================

/// Re-publishes documents on a broadcast channel.
///
/// Sending never blocks; with no receivers the documents are dropped, and slow
/// receivers see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<Document>,
}

impl BroadcastObserver {
    /// Observer backed by a broadcast channel of `capacity`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receiver for documents sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Document> {
        self.tx.subscribe()
    }

    fn send(&self, doc: Document) {
        let _ = self.tx.send(doc);
    }
}

impl RunObserver for BroadcastObserver {
    fn on_start(&self, start: &StartDoc) {
        self.send(Document::Start(start.clone()));
    }

    fn on_step(&self, event: &EventDoc) {
        self.send(Document::Event(event.clone()));
    }

    fn on_complete(&self, summary: &RunSummary) {
        self.send(Document::Stop(StopDoc::new(summary, "")));
    }

    fn on_error(&self, error: &DaqError, summary: &RunSummary) {
        self.send(Document::Stop(StopDoc::new(summary, &error.to_string())));
    }
}
