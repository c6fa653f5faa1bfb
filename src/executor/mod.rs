pub mod batch;
pub mod engine;

pub use batch::{BatchOrchestrator, BatchResult, ScriptResult};
pub use engine::{ExecutionEngine, ExecutionOutcome, ExecutionStatus};
