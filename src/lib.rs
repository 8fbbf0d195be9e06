// src/lib.rs — Library root for homeminer

pub mod api;
pub mod cli;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod memory;
pub mod patterns;
pub mod provider;
pub mod synergy;
