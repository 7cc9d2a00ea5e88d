//! Training CLI for the S/V regression: fit, inspect and check a posterior.

pub mod config;
pub mod interpretation;
pub mod pipeline;

pub use config::{Mode, TrainerArgs};
pub use interpretation::InterpretationReport;
