//! # VPO Policy Library
//!
//! The pure heart of the orchestrator: the policy model, the evaluator
//! that turns an introspected file plus a policy into an ordered plan,
//! and the transcode planner. Nothing in this crate performs I/O or reads
//! a clock; identical inputs always produce identical plans.

pub mod evaluator;
pub mod plan;
pub mod transcode;
pub mod types;
pub mod video_analysis;

use thiserror::Error;

/// Constraint signal from the evaluator.
///
/// Not a failure: the policy is working correctly by refusing to make a
/// change that would violate one of its own floors. The phase executor
/// translates this into a constraint-skipped operation result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PolicyError(pub String);

pub use evaluator::{evaluate_policy, EvaluationInput, EvaluationPolicy, LanguageVerdict};
pub use plan::{
    ActionType, ContainerChange, DispositionAction, Plan, PlannedAction, TrackDisposition,
};
pub use types::{
    OnErrorMode, OperationType, PhaseDefinition, PolicyConfig, PolicySchema,
};
