//! Error taxonomy shared by every lqp crate.
//!
//! The four domain errors map one-to-one onto how a study run reacts:
//!
//! | Error | Scope | Run behaviour |
//! |-------|-------|---------------|
//! | [`TopologyError`] | network | fatal before any solve |
//! | [`InfeasibleBatteryStateError`] | one battery | battery skipped if configured, else fatal |
//! | [`InfeasibilityError`] | one timestep | relaxed, then recorded as a failed step |
//! | [`SolverNumericalError`] | one timestep | retried once, then recorded as a failed step |
//!
//! [`LqpError`] wraps them (plus I/O, parsing and configuration problems)
//! for uniform handling at API boundaries.

use thiserror::Error;

/// Structural problems with a feeder description.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("network contains no buses")]
    Empty,

    #[error("slack bus '{0}' is not defined")]
    MissingSlack(String),

    #[error("bus name '{0}' is defined more than once")]
    DuplicateBus(String),

    #[error("line '{line}' references unknown bus '{bus}'")]
    UnknownBus { line: String, bus: String },

    #[error("line '{0}' connects a bus to itself")]
    SelfLoop(String),

    /// More lines than a tree over the same buses allows.
    #[error("network is not radial: {lines} lines for {buses} buses (line '{closing_line}' closes a loop)")]
    Cycle {
        lines: usize,
        buses: usize,
        closing_line: String,
    },

    #[error("{} bus(es) unreachable from the slack: {}", .0.len(), .0.join(", "))]
    Unreachable(Vec<String>),
}

/// A single battery's parameters or requested state cannot be satisfied.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("battery at bus '{bus}' is infeasible: {reason}")]
pub struct InfeasibleBatteryStateError {
    pub bus: String,
    pub reason: String,
}

impl InfeasibleBatteryStateError {
    pub fn new(bus: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            reason: reason.into(),
        }
    }
}

/// The dispatch QP has no feasible point for a timestep, even after the
/// configured relaxation of voltage bounds.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("dispatch infeasible at timestep {timestep} (relaxed: {relaxed}): {detail}")]
pub struct InfeasibilityError {
    pub timestep: usize,
    pub relaxed: bool,
    pub detail: String,
}

/// The backend failed to reach the requested optimality within its budget.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("solver failed at timestep {timestep} after {attempts} attempt(s): {detail}")]
pub struct SolverNumericalError {
    pub timestep: usize,
    pub attempts: usize,
    pub detail: String,
}

/// Unified error type for lqp operations.
#[derive(Error, Debug)]
pub enum LqpError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Battery(#[from] InfeasibleBatteryStateError),

    #[error(transparent)]
    Infeasible(#[from] InfeasibilityError),

    #[error(transparent)]
    Numerical(#[from] SolverNumericalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LqpError {
    /// Whether this error only invalidates a single timestep of the study.
    pub fn is_per_timestep(&self) -> bool {
        matches!(self, LqpError::Infeasible(_) | LqpError::Numerical(_))
    }
}

pub type LqpResult<T> = Result<T, LqpError>;

impl From<serde_json::Error> for LqpError {
    fn from(err: serde_json::Error) -> Self {
        LqpError::Parse(err.to_string())
    }
}
