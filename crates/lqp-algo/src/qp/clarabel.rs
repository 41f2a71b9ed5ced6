//! Clarabel interior-point backend.

use ::clarabel::algebra::CscMatrix;
use ::clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use tracing::debug;

use super::{Cone, QpBackend, QpError, QpProblem, QpSettings, QpSolution, QpStatus};

/// Clarabel is pure Rust, so this backend is always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelBackend;

fn map_status(status: SolverStatus) -> QpStatus {
    match status {
        SolverStatus::Solved => QpStatus::Optimal,
        SolverStatus::AlmostSolved => QpStatus::AlmostOptimal,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            QpStatus::PrimalInfeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            QpStatus::DualInfeasible
        }
        SolverStatus::MaxIterations => QpStatus::IterationLimit,
        SolverStatus::MaxTime => QpStatus::TimeLimit,
        _ => QpStatus::NumericalFailure,
    }
}

impl QpBackend for ClarabelBackend {
    fn id(&self) -> &str {
        "clarabel"
    }

    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, QpError> {
        let n = problem.n_var();
        let m = problem.n_rows();

        let (p_ptr, p_idx, p_val) = problem.p_csc();
        let (a_ptr, a_idx, a_val) = problem.a_csc();
        let p_mat = CscMatrix::new(n, n, p_ptr, p_idx, p_val);
        let a_mat = CscMatrix::new(m, n, a_ptr, a_idx, a_val);

        let cones: Vec<SupportedConeT<f64>> = problem
            .cones()
            .iter()
            .map(|c| match *c {
                Cone::Zero(k) => SupportedConeT::ZeroConeT(k),
                Cone::Nonnegative(k) => SupportedConeT::NonnegativeConeT(k),
                Cone::SecondOrder(k) => SupportedConeT::SecondOrderConeT(k),
            })
            .collect();

        let clarabel_settings = DefaultSettingsBuilder::default()
            .verbose(settings.verbose)
            .max_iter(settings.max_iterations)
            .time_limit(settings.time_limit_seconds)
            .tol_gap_abs(settings.tolerance)
            .tol_gap_rel(settings.tolerance)
            .tol_feas(settings.tolerance)
            .build()
            .map_err(|e| QpError::Setup(format!("Clarabel settings error: {:?}", e)))?;

        let mut solver = DefaultSolver::new(
            &p_mat,
            problem.linear(),
            &a_mat,
            problem.rhs(),
            &cones,
            clarabel_settings,
        )
        .map_err(|e| QpError::Setup(format!("Clarabel initialization failed: {:?}", e)))?;

        solver.solve();
        let sol = &solver.solution;
        let status = map_status(sol.status);
        debug!(
            vars = n,
            rows = m,
            iterations = sol.iterations,
            status = %status,
            "clarabel solve finished"
        );

        Ok(QpSolution {
            status,
            x: sol.x.clone(),
            objective: sol.obj_val + problem.constant(),
            dual_objective: sol.obj_val_dual + problem.constant(),
            iterations: sol.iterations,
            solve_time_seconds: sol.solve_time,
            primal_residual: sol.r_prim,
            dual_residual: sol.r_dual,
        })
    }
}
