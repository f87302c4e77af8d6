//! Job processing and progress notification engine.
//!
//! This crate provides:
//! - The stage pipeline and the classifier capability
//! - The job runner that walks a job through the pipeline
//! - The job scheduler with its runner registry
//! - The stale job watchdog
//! - The `Engine` facade tying store, scheduler and hub together

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod watchdog;

pub use classifier::{Classification, Classifier, SimulatedClassifier, StaticClassifier};
pub use config::WorkerConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{ClassificationError, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{PipelineError, Stage, StageKind, StagePipeline};
pub use runner::{Heartbeat, JobOutcome, JobRunner, RunnerDeps};
pub use scheduler::{JobScheduler, RunnerHandle};
pub use watchdog::{StaleJobDetector, SweepReport};
