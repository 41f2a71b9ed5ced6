use thiserror::Error;

use super::QpProblem;

/// Limits and tolerances handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct QpSettings {
    pub max_iterations: u32,
    pub time_limit_seconds: f64,
    /// Feasibility and duality-gap tolerance.
    pub tolerance: f64,
    pub verbose: bool,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            time_limit_seconds: 30.0,
            tolerance: 1e-8,
            verbose: false,
        }
    }
}

impl QpSettings {
    /// Looser copy for a retry; iteration budget is doubled as well.
    pub fn relaxed(&self, factor: f64) -> Self {
        Self {
            max_iterations: self.max_iterations.saturating_mul(2),
            tolerance: self.tolerance * factor,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    Optimal,
    /// Converged to reduced accuracy.
    AlmostOptimal,
    PrimalInfeasible,
    DualInfeasible,
    IterationLimit,
    TimeLimit,
    NumericalFailure,
}

impl QpStatus {
    pub fn is_solved(self) -> bool {
        matches!(self, QpStatus::Optimal | QpStatus::AlmostOptimal)
    }

    pub fn is_infeasible(self) -> bool {
        matches!(self, QpStatus::PrimalInfeasible)
    }
}

impl std::fmt::Display for QpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QpStatus::Optimal => "optimal",
            QpStatus::AlmostOptimal => "almost optimal",
            QpStatus::PrimalInfeasible => "primal infeasible",
            QpStatus::DualInfeasible => "dual infeasible",
            QpStatus::IterationLimit => "iteration limit",
            QpStatus::TimeLimit => "time limit",
            QpStatus::NumericalFailure => "numerical failure",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub status: QpStatus,
    pub x: Vec<f64>,
    pub objective: f64,
    pub dual_objective: f64,
    pub iterations: u32,
    pub solve_time_seconds: f64,
    pub primal_residual: f64,
    pub dual_residual: f64,
}

impl QpSolution {
    /// `|obj − obj_dual| / max(1, |obj|)`
    pub fn relative_gap(&self) -> f64 {
        (self.objective - self.dual_objective).abs() / self.objective.abs().max(1.0)
    }
}

#[derive(Error, Debug)]
pub enum QpError {
    #[error("QP setup failed: {0}")]
    Setup(String),

    #[error("backend '{0}' is not available")]
    Unavailable(String),
}

/// Numerical QP solver plugged into the dispatch layer.
///
/// A backend reports infeasibility and non-convergence through
/// [`QpSolution::status`]; `Err` is reserved for problems it cannot even
/// start on.
pub trait QpBackend: Send + Sync {
    fn id(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, QpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_trait_is_object_safe() {
        fn _accepts(_b: &dyn QpBackend) {}
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Box<dyn QpBackend>>();
    }

    #[test]
    fn relaxed_settings_scale_tolerance() {
        let base = QpSettings::default();
        let retry = base.relaxed(100.0);
        assert_eq!(retry.max_iterations, 400);
        assert!((retry.tolerance - 1e-6).abs() < 1e-18);
        assert_eq!(retry.time_limit_seconds, base.time_limit_seconds);
    }

    #[test]
    fn relative_gap_is_scaled() {
        let sol = QpSolution {
            status: QpStatus::Optimal,
            x: vec![],
            objective: 200.0,
            dual_objective: 199.0,
            iterations: 10,
            solve_time_seconds: 0.0,
            primal_residual: 0.0,
            dual_residual: 0.0,
        };
        assert!((sol.relative_gap() - 0.005).abs() < 1e-12);
        assert!(QpStatus::AlmostOptimal.is_solved());
        assert!(!QpStatus::TimeLimit.is_solved());
    }
}
