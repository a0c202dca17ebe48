//! Experiment orchestration.
//!
//! # Architecture
//!
//! - **Plans**: ordered actions plus a rest state (`plans`)
//! - **Loader**: builds plans from templates or CSV tables (`loader`)
//! - **RunEngine**: executes a plan against the channel registry (`run_engine`)
//! - **Documents / Reporter**: progress stream for observers (`document`, `reporter`)
//!
//! # Example
//!
//! ```rust,ignore
//! use sidekick_daq::experiment::{PlanLoader, Reporter, LoggingObserver, RunEngine, Template};
//!
//! let engine = RunEngine::new(Arc::new(ChannelRegistry::simulated(&settings)?));
//! let plan = PlanLoader::load_fixed(Template::SmokeTest)?;
//! let reporter = Reporter::new().with(Arc::new(LoggingObserver));
//!
//! let summary = engine.run(plan, RunMetadataBuilder::new().build(), &reporter).await?;
//! ```

pub mod document;
pub mod loader;
pub mod plans;
pub mod reporter;
pub mod run_engine;

pub use document::{Document, EventDoc, ExitStatus, RunSummary, StartDoc, StopDoc};
pub use loader::{LoadedPlan, PlanLoader, Row, SkippedRow};
pub use plans::{Action, ActionPlan, RestState, Step, Template};
pub use reporter::{
    BroadcastObserver, DocumentCollector, LiveTable, LoggingObserver, Reporter, RunObserver,
};
pub use run_engine::{CancelToken, RunEngine};
