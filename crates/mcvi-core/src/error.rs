use crate::sim::State;
use thiserror::Error;

/// Fatal conditions surfaced to the planner's main loop.
///
/// Recoverable conditions (an exhausted observation choice during descent)
/// are handled at their call sites and never reach this type.
#[derive(Debug, Error, PartialEq)]
pub enum PlannerError {
    #[error("simulator returned observation {obs}, outside [0, {size})")]
    ObservationOutOfRange { obs: usize, size: usize },

    #[error("action {action} outside [0, {size})")]
    ActionOutOfRange { action: usize, size: usize },

    #[error("posterior observation weights sum to {mass}, expected 1")]
    WeightsNotNormalised { mass: f64 },

    #[error("simulator reported done at state {state}, which is_terminal rejects")]
    TerminalMismatch { state: State },
}
