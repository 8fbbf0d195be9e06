// src/patterns/mod.rs — Pattern detection pipeline

pub mod activity;
pub mod bank;
pub mod cross_validator;
pub mod dedup;
pub mod detector;
pub mod detectors;
pub mod filter;
pub mod ml;

pub use bank::{BankOutcome, DetectorBank, DetectorFailure};
pub use cross_validator::CrossValidator;
pub use dedup::{deduplicate, DedupStats};
pub use detector::Detector;
pub use filter::{ExclusionReason, FilterStats, PatternFilter};
