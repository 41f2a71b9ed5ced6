//! Dispatch study configuration.
//!
//! Objective weights are required: there is no defensible default trade-off
//! between losses, voltage deviation and battery throughput, so a config
//! without `[weights]` fails to deserialize. Everything else has a default.

use lqp_core::{LqpError, LqpResult, PerUnit};
use serde::{Deserialize, Serialize};

use crate::battery::TerminalBand;
use crate::qp::QpSettings;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectiveWeights {
    /// Per p.u.·h of active line loss.
    pub losses: f64,
    /// Per (p.u.²)² of squared-voltage deviation, per bus and step.
    pub voltage_deviation: f64,
    /// Per p.u.·h of charge plus discharge energy.
    pub throughput: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundMode {
    #[default]
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaxationConfig {
    /// Retry an infeasible hard-bounded solve with slacks.
    pub enabled: bool,
    /// Penalty per p.u.² of squared-voltage slack.
    pub penalty: f64,
    /// Largest violation a slack may absorb, in p.u. of voltage.
    pub max_violation_pu: f64,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            penalty: 1e3,
            max_violation_pu: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoltageConfig {
    pub target_pu: f64,
    /// Default lower bound for buses without their own.
    pub min_pu: f64,
    pub max_pu: f64,
    /// `soft` always carries slacks; `hard` only after an infeasible solve.
    pub mode: BoundMode,
    pub relaxation: RelaxationConfig,
}

impl Default for VoltageConfig {
    fn default() -> Self {
        Self {
            target_pu: 1.0,
            min_pu: 0.95,
            max_pu: 1.05,
            mode: BoundMode::Hard,
            relaxation: RelaxationConfig::default(),
        }
    }
}

impl VoltageConfig {
    pub fn default_limits(&self) -> (PerUnit, PerUnit) {
        (PerUnit(self.min_pu), PerUnit(self.max_pu))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HorizonMode {
    /// Receding horizon: solve a window, apply its first step, move on.
    #[default]
    Rolling,
    /// One solve over the whole study.
    Joint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HorizonConfig {
    pub mode: HorizonMode,
    /// Window length for rolling mode.
    pub window_steps: usize,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            mode: HorizonMode::Rolling,
            window_steps: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalScope {
    /// Band the SoC at the last step of the study.
    #[default]
    HorizonEnd,
    /// Band the SoC at the end of every solved window.
    EveryWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalSocConfig {
    pub target_fraction: f64,
    #[serde(default = "default_terminal_tolerance")]
    pub tolerance_fraction: f64,
    #[serde(default)]
    pub scope: TerminalScope,
}

fn default_terminal_tolerance() -> f64 {
    0.01
}

impl TerminalSocConfig {
    pub fn band(&self) -> TerminalBand {
        TerminalBand::new(self.target_fraction, self.tolerance_fraction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Coordination {
    /// One QP coupling every battery, observing every bus.
    #[default]
    Centralized,
    /// One QP per battery, observing only its own bus.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverOptions {
    pub max_iterations: u32,
    pub time_limit_seconds: f64,
    pub tolerance: f64,
    /// Largest accepted relative duality gap.
    pub optimality_tolerance: f64,
    /// Tolerance multiplier for the single numerical retry.
    pub retry_tolerance_factor: f64,
    /// Quadratic weight on battery powers that makes the objective strictly
    /// convex.
    pub regularization: f64,
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            time_limit_seconds: 30.0,
            tolerance: 1e-8,
            optimality_tolerance: 1e-6,
            retry_tolerance_factor: 100.0,
            regularization: 1e-6,
            verbose: false,
        }
    }
}

impl SolverOptions {
    pub fn qp_settings(&self) -> QpSettings {
        QpSettings {
            max_iterations: self.max_iterations,
            time_limit_seconds: self.time_limit_seconds,
            tolerance: self.tolerance,
            verbose: self.verbose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    pub weights: ObjectiveWeights,
    #[serde(default)]
    pub voltage: VoltageConfig,
    #[serde(default)]
    pub horizon: HorizonConfig,
    #[serde(default)]
    pub terminal_soc: Option<TerminalSocConfig>,
    #[serde(default)]
    pub coordination: Coordination,
    #[serde(default)]
    pub solver: SolverOptions,
    /// Drop batteries with contradictory parameters instead of aborting.
    #[serde(default)]
    pub skip_invalid_batteries: bool,
}

impl DispatchConfig {
    pub fn new(weights: ObjectiveWeights) -> Self {
        Self {
            weights,
            voltage: VoltageConfig::default(),
            horizon: HorizonConfig::default(),
            terminal_soc: None,
            coordination: Coordination::default(),
            solver: SolverOptions::default(),
            skip_invalid_batteries: false,
        }
    }

    pub fn validate(&self) -> LqpResult<()> {
        let w = &self.weights;
        for (name, value) in [
            ("weights.losses", w.losses),
            ("weights.voltage_deviation", w.voltage_deviation),
            ("weights.throughput", w.throughput),
            ("voltage.relaxation.penalty", self.voltage.relaxation.penalty),
            ("solver.regularization", self.solver.regularization),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LqpError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        let v = &self.voltage;
        if !(v.min_pu > 0.0 && v.min_pu <= v.max_pu) {
            return Err(LqpError::Config(format!(
                "voltage bounds [{}, {}] are not ordered and positive",
                v.min_pu, v.max_pu
            )));
        }
        if v.relaxation.max_violation_pu < 0.0 || v.relaxation.max_violation_pu >= v.min_pu {
            return Err(LqpError::Config(format!(
                "relaxation.max_violation_pu {} must lie in [0, min_pu)",
                v.relaxation.max_violation_pu
            )));
        }
        if self.horizon.mode == HorizonMode::Rolling && self.horizon.window_steps == 0 {
            return Err(LqpError::Config("horizon.window_steps must be at least 1".into()));
        }
        if let Some(t) = &self.terminal_soc {
            if !(0.0..=1.0).contains(&t.target_fraction) || t.tolerance_fraction < 0.0 {
                return Err(LqpError::Config(format!(
                    "terminal SoC target {} or tolerance {} out of range",
                    t.target_fraction, t.tolerance_fraction
                )));
            }
        }
        let s = &self.solver;
        if s.max_iterations == 0
            || s.tolerance <= 0.0
            || s.optimality_tolerance <= 0.0
            || s.retry_tolerance_factor < 1.0
            || s.time_limit_seconds <= 0.0
        {
            return Err(LqpError::Config(
                "solver limits and tolerances must be positive (retry factor ≥ 1)".into(),
            ));
        }
        Ok(())
    }
}
