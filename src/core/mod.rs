// src/core/mod.rs — Domain types, run orchestration and the engine facade

pub mod engine;
pub mod history;
pub mod scheduler;
pub mod types;

pub use engine::Engine;
pub use history::{RunMode, RunRecord, RunStatus};
pub use scheduler::{AnalysisScheduler, RunReport, RunRequest};
