//! DAG pipeline execution.

pub mod executor;

pub use executor::{PipelineExecutor, PipelineRunOutcome, PipelineRunRecord, StepRunRecord};
