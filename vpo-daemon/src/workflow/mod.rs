//! Phase execution: transactional application of one policy phase to one
//! file.

mod backup;
mod executor;
mod ops;
mod timestamp_ops;
mod transcode_ops;
mod types;

pub use executor::PhaseExecutor;
pub use types::{OperationResult, PhaseResult};

pub(crate) use types::PhaseExecutionState;

/// Operation-level failure classification inside a phase.
///
/// Constraint skips come from the evaluator refusing to violate a policy
/// floor; they count as informational success. Everything else is a real
/// failure handled per the policy's on_error mode.
#[derive(Debug)]
pub(crate) enum OpError {
    Constraint(String),
    Failed(String),
}

impl From<vpo_policy::PolicyError> for OpError {
    fn from(err: vpo_policy::PolicyError) -> Self {
        OpError::Constraint(err.0)
    }
}

impl From<crate::error::ToolError> for OpError {
    fn from(err: crate::error::ToolError) -> Self {
        OpError::Failed(err.to_string())
    }
}

impl From<vpo_common::Error> for OpError {
    fn from(err: vpo_common::Error) -> Self {
        OpError::Failed(err.to_string())
    }
}
