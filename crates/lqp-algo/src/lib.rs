//! # lqp-algo: linearized power flow and battery dispatch
//!
//! | Module | Role |
//! |--------|------|
//! | [`lindistflow`] | single-phase voltage/loss sensitivities `A`, `B` |
//! | [`lindist3flow`] | unbalanced three-phase backward/forward sweep |
//! | [`battery`] | per-window battery envelope and SoC recursion |
//! | [`qp`] | backend-neutral conic QP and the Clarabel backend |
//! | [`dispatch`] | L-QP window formulation, horizon and failure policy |
//! | [`results`] | per-step records and summary metrics |
//! | [`export`] | CSV / JSON output |
//!
//! ## Example
//!
//! ```ignore
//! use lqp_algo::dispatch::{DispatchConfig, DispatchSolver, ObjectiveWeights};
//!
//! let config = DispatchConfig::new(ObjectiveWeights {
//!     losses: 1.0,
//!     voltage_deviation: 10.0,
//!     throughput: 0.01,
//! });
//! let solver = DispatchSolver::new(&network, config)?;
//! let results = solver.run(&mut network, &profiles)?;
//! println!("{:?}", results.summary(&Default::default()));
//! ```

pub mod battery;
pub mod dispatch;
pub mod export;
pub mod lindist3flow;
pub mod lindistflow;
pub mod qp;
pub mod results;

pub use dispatch::{DispatchConfig, DispatchSolver, ObjectiveWeights, WindowSolution};
pub use lindist3flow::{LinDist3Flow, ThreePhaseResult};
pub use lindistflow::LinDistFlow;
pub use qp::{ClarabelBackend, QpBackend, QpProblem, QpSettings, QpSolution, QpStatus};
pub use results::{DispatchSolution, ResultsAggregator, StepStatus, SummaryMetrics, TariffConfig};
