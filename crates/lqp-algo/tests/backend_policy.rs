//! Retry and failure handling around a pluggable QP backend.
//!
//! The mock backends here wrap [`ClarabelBackend`] and corrupt its answers
//! in controlled ways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lqp_algo::dispatch::{DispatchConfig, DispatchSolver, ObjectiveWeights};
use lqp_algo::qp::{ClarabelBackend, QpBackend, QpError, QpProblem, QpSettings, QpSolution, QpStatus};
use lqp_algo::StepStatus;
use lqp_core::*;
use lqp_ts::ProfileSet;

fn feeder() -> Network {
    let battery = BatteryState::new("bess", KilowattHours(40.0), Kilowatts(10.0), KilovoltAmperes(12.0));
    NetworkBuilder::new("retry", SystemBase::new(KilovoltAmperes(100.0), Kilovolts(0.4)), "sub")
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("house").with_battery(battery))
        .line(LineSpec::new("sub", "house", 0.01, 0.02))
        .build()
        .unwrap()
}

fn profiles(net: &Network, steps: usize) -> ProfileSet {
    let house = net.bus_by_name("house").unwrap();
    let mut profiles = ProfileSet::zeros(net.bus_count(), (0..steps as i64).map(|t| t * 900).collect(), 0.25).unwrap();
    for t in 0..steps {
        profiles.add_load(t, house, Kilowatts(8.0), Kilovars(2.0));
    }
    profiles
}

fn config() -> DispatchConfig {
    DispatchConfig::new(ObjectiveWeights {
        losses: 1.0,
        voltage_deviation: 1.0,
        throughput: 0.01,
    })
}

/// Reports a numerical failure on its first call, then defers to Clarabel.
struct Flaky {
    calls: Arc<AtomicUsize>,
}

impl QpBackend for Flaky {
    fn id(&self) -> &str {
        "flaky"
    }

    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, QpError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(QpSolution {
                status: QpStatus::NumericalFailure,
                x: vec![0.0; problem.n_var()],
                objective: f64::NAN,
                dual_objective: f64::NAN,
                iterations: 3,
                solve_time_seconds: 0.0,
                primal_residual: f64::INFINITY,
                dual_residual: f64::INFINITY,
            });
        }
        ClarabelBackend.solve(problem, settings)
    }
}

/// Solves correctly but reports a dual bound far from the primal objective.
struct WideGap {
    calls: Arc<AtomicUsize>,
}

impl QpBackend for WideGap {
    fn id(&self) -> &str {
        "wide-gap"
    }

    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, QpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sol = ClarabelBackend.solve(problem, settings)?;
        sol.dual_objective = sol.objective - 10.0;
        Ok(sol)
    }
}

struct Offline;

impl QpBackend for Offline {
    fn id(&self) -> &str {
        "offline"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn solve(&self, _: &QpProblem, _: &QpSettings) -> Result<QpSolution, QpError> {
        Err(QpError::Unavailable(self.id().to_string()))
    }
}

#[test]
fn numerical_failure_is_retried_once() {
    let mut net = feeder();
    let profiles = profiles(&net, 1);
    let calls = Arc::new(AtomicUsize::new(0));
    let solver = DispatchSolver::new(&net, config())
        .unwrap()
        .with_backend(Box::new(Flaky { calls: calls.clone() }));
    assert_eq!(solver.backend_id(), "flaky");

    let results = solver.run(&mut net, &profiles).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(results.steps()[0].status, StepStatus::Solved);
    assert!(results.steps()[0].objective.is_some());
}

#[test]
fn wide_duality_gap_fails_the_step_after_two_attempts() {
    let mut net = feeder();
    let soc_before = net.batteries().next().unwrap().1.soc;
    let profiles = profiles(&net, 3);
    let calls = Arc::new(AtomicUsize::new(0));
    let solver = DispatchSolver::new(&net, config())
        .unwrap()
        .with_backend(Box::new(WideGap { calls: calls.clone() }));

    let results = solver.run(&mut net, &profiles).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    for step in results.steps() {
        assert_eq!(step.status, StepStatus::Failed);
        let msg = step.error.as_deref().unwrap();
        assert!(msg.contains("after 2 attempt(s)"), "{}", msg);
        assert!(msg.contains("relative duality gap"), "{}", msg);
        assert_eq!(step.batteries[0].p, Kilowatts::ZERO);
        assert_eq!(step.batteries[0].soc, soc_before);
    }
    assert_eq!(net.batteries().next().unwrap().1.soc, soc_before);
}

#[test]
fn backend_errors_are_per_timestep_failures() {
    let mut net = feeder();
    let profiles = profiles(&net, 2);
    let solver = DispatchSolver::new(&net, config())
        .unwrap()
        .with_backend(Box::new(Offline));
    let results = solver.run(&mut net, &profiles).unwrap();
    assert_eq!(results.failed_steps().count(), 2);
    assert!(results.steps()[0]
        .error
        .as_deref()
        .unwrap()
        .contains("backend 'offline' is not available"));

    let summary = results.summary(&Default::default());
    assert_eq!(summary.failed_steps, 2);
    assert_eq!(summary.battery_throughput_kwh, 0.0);
}
