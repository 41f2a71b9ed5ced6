//! L-QP battery dispatch over a study horizon.
//!
//! [`DispatchSolver::solve_window`] is a pure function of the battery states
//! and a window of profile data; [`DispatchSolver::run`] walks the study,
//! applies accepted setpoints and carries SoC forward through
//! [`Network::battery_mut`]. Per-timestep failures (infeasible or numerically
//! unsolved windows) are recorded with the batteries idle and never abort the
//! run.
//!
//! Failure handling for one window:
//!
//! 1. Interval screen of the reachable voltage range. Unreachable hard bounds
//!    go straight to the relaxed problem, unreachable relaxed bounds are an
//!    [`InfeasibilityError`].
//! 2. Backend solve. Non-convergence, or a duality gap above the optimality
//!    tolerance, is retried once with every tolerance scaled by
//!    `retry_tolerance_factor`, then reported as a [`SolverNumericalError`].
//! 3. A primal-infeasible hard-bounded solve is retried with slacks when
//!    relaxation is enabled.
//! 4. Under local coordination each battery's QP sees the others idle, so
//!    every observed bus is re-evaluated with the combined setpoints.

pub mod config;
pub mod formulation;

pub use config::{
    BoundMode, Coordination, DispatchConfig, HorizonConfig, HorizonMode, ObjectiveWeights,
    RelaxationConfig, SolverOptions, TerminalScope, TerminalSocConfig, VoltageConfig,
};
pub use formulation::Setpoint;

use lqp_core::{
    BatteryState, BusId, InfeasibilityError, InfeasibleBatteryStateError, Kilovars,
    KilovoltAmperes, Kilowatts, LqpError, LqpResult, Network, SolverNumericalError,
};
use lqp_ts::ProfileSet;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::battery::{self, TerminalBand};
use crate::lindistflow::LinDistFlow;
use crate::qp::{ClarabelBackend, QpBackend, QpSolution};
use crate::results::{BatteryDispatch, DispatchSolution, ResultsAggregator, StepStatus};
use formulation::{Formulation, Injection, ObservedBus, Relaxation, WindowBattery, WindowQp};

/// Slack (p.u.²) above which a step counts as relaxed.
const SLACK_EPS: f64 = 1e-7;

/// Solved window: setpoints `[step][battery]` in the order the batteries
/// were passed in. Idle batteries hold their SoC.
#[derive(Debug, Clone)]
pub struct WindowSolution {
    pub start: usize,
    pub setpoints: Vec<Vec<Setpoint>>,
    /// Voltage slacks in use, per step.
    pub relaxed: Vec<bool>,
    pub objective: f64,
    pub iterations: u32,
}

impl WindowSolution {
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }
}

struct GroupOutcome {
    setpoints: Vec<Vec<Setpoint>>,
    relaxed: Vec<bool>,
    objective: f64,
    iterations: u32,
}

pub struct DispatchSolver {
    ldf: LinDistFlow,
    config: DispatchConfig,
    backend: Box<dyn QpBackend>,
    s_base: KilovoltAmperes,
    bus_names: Vec<String>,
    observed: Vec<ObservedBus>,
}

impl std::fmt::Debug for DispatchSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSolver")
            .field("backend", &self.backend.id())
            .field("buses", &self.bus_names.len())
            .field("config", &self.config)
            .finish()
    }
}

impl DispatchSolver {
    /// Validate `config` and linearize `network`. Topology problems surface
    /// here, before any solve.
    pub fn new(network: &Network, config: DispatchConfig) -> LqpResult<Self> {
        config.validate()?;
        let ldf = LinDistFlow::build(network)?;
        let default_limits = config.voltage.default_limits();
        let observed = ldf
            .columns()
            .iter()
            .enumerate()
            .map(|(row, &bus)| {
                let (vmin, vmax) = network.voltage_limits(bus, default_limits);
                ObservedBus {
                    bus,
                    name: network.bus(bus).name.clone(),
                    row,
                    vmin: vmin.value(),
                    vmax: vmax.value(),
                }
            })
            .collect();
        Ok(Self {
            ldf,
            config,
            backend: Box::new(ClarabelBackend),
            s_base: network.base().s_base,
            bus_names: network.buses().iter().map(|b| b.name.clone()).collect(),
            observed,
        })
    }

    pub fn with_backend(mut self, backend: Box<dyn QpBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn linearization(&self) -> &LinDistFlow {
        &self.ldf
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    fn formulation(&self, dt_hours: f64) -> Formulation<'_> {
        Formulation {
            ldf: &self.ldf,
            dt_hours,
            weights: self.config.weights,
            target_pu: self.config.voltage.target_pu,
            regularization: self.config.solver.regularization,
        }
    }

    fn relaxation(&self) -> Relaxation {
        let r = self.config.voltage.relaxation;
        Relaxation {
            penalty: r.penalty,
            max_violation_pu: r.max_violation_pu,
        }
    }

    /// Terminal band for a window of `len` steps starting at study step
    /// `start`, placed on the window's last step.
    ///
    /// Under [`TerminalScope::HorizonEnd`] every window is banded: windows
    /// that end before the study does get the SoC interval from which the
    /// study-end band is still reachable in the remaining steps.
    fn terminal(&self, start: usize, len: usize, total: usize) -> Option<(usize, TerminalBand)> {
        let t = self.config.terminal_soc?;
        if len == 0 {
            return None;
        }
        let band = t.band();
        match t.scope {
            TerminalScope::EveryWindow => Some((len - 1, band)),
            TerminalScope::HorizonEnd => {
                Some((len - 1, band.ahead_of(total.saturating_sub(start + len))))
            }
        }
    }

    /// Solve one horizon window starting at study step `start`.
    ///
    /// `terminal` bands the end-of-step SoC of one window step. A band the
    /// batteries cannot reach within the window is moved to the closest
    /// reachable SoC and every step of the window is marked relaxed.
    pub fn solve_window(
        &self,
        start: usize,
        window: &ProfileSet,
        batteries: &[(BusId, BatteryState)],
        terminal: Option<(usize, TerminalBand)>,
    ) -> LqpResult<WindowSolution> {
        let steps = window.len();
        let dt = window.dt_hours();
        let fixed: Vec<Injection> = (0..steps)
            .map(|t| {
                let (p, q) = window.net_injection_pu(t, self.s_base);
                Injection { p, q }
            })
            .collect();

        let mut setpoints = vec![Vec::with_capacity(batteries.len()); steps];
        let mut active: Vec<(usize, WindowBattery)> = Vec::new();
        let mut clipped_any = false;
        for (i, (bus, state)) in batteries.iter().enumerate() {
            let hold = Setpoint {
                soc: state.soc.to_per_unit(self.s_base),
                ..Setpoint::default()
            };
            for row in setpoints.iter_mut() {
                row.push(hold);
            }
            let Some(column) = self.ldf.column(*bus) else {
                continue;
            };
            if battery::is_idle(state) {
                continue;
            }
            let bus_name = &self.bus_names[bus.value()];
            let (set, clipped) =
                battery::constraint_set_clipped(state, bus_name, self.s_base, dt, steps, terminal)?;
            if clipped {
                clipped_any = true;
                warn!(
                    battery = %state.name,
                    timestep = start,
                    "terminal SoC band unreachable in this window; using the closest reachable SoC"
                );
            }
            active.push((
                i,
                WindowBattery {
                    bus: *bus,
                    column,
                    set,
                },
            ));
        }

        let formulation = self.formulation(dt);
        let mut relaxed = vec![false; steps];
        let mut objective = 0.0;
        let mut iterations = 0;

        let mut apply = |members: &[usize], outcome: GroupOutcome| {
            for (t, row) in outcome.setpoints.iter().enumerate() {
                for (&i, sp) in members.iter().zip(row) {
                    setpoints[t][i] = *sp;
                }
            }
            for (flag, r) in relaxed.iter_mut().zip(outcome.relaxed) {
                *flag |= r;
            }
            objective += outcome.objective;
            iterations += outcome.iterations;
        };

        match self.config.coordination {
            Coordination::Centralized => {
                let members: Vec<usize> = active.iter().map(|(i, _)| *i).collect();
                let group: Vec<WindowBattery> = active.into_iter().map(|(_, b)| b).collect();
                let outcome = self.solve_group(start, &formulation, &fixed, &group, &self.observed)?;
                apply(&members, outcome);
            }
            Coordination::Local => {
                // Buses no battery solves for are screened against the whole fleet.
                let uncovered: Vec<ObservedBus> = self
                    .observed
                    .iter()
                    .filter(|o| active.iter().all(|(_, b)| b.bus != o.bus))
                    .cloned()
                    .collect();
                if !uncovered.is_empty() {
                    let fleet: Vec<WindowBattery> = active.iter().map(|(_, b)| b.clone()).collect();
                    let miss = self.screen(start, &formulation, &fixed, &fleet, &uncovered)?;
                    apply(
                        &[],
                        GroupOutcome {
                            setpoints: vec![Vec::new(); steps],
                            relaxed: vec![miss.is_some(); steps],
                            objective: 0.0,
                            iterations: 0,
                        },
                    );
                }
                for (i, bat) in active {
                    let own: Vec<ObservedBus> = self
                        .observed
                        .iter()
                        .filter(|o| o.bus == bat.bus)
                        .cloned()
                        .collect();
                    let outcome = self.solve_group(
                        start,
                        &formulation,
                        &fixed,
                        std::slice::from_ref(&bat),
                        &own,
                    )?;
                    apply(&[i], outcome);
                }
                // Each QP saw the other batteries idle; hold every bus to its
                // bounds under the combined setpoints.
                let buses: Vec<BusId> = batteries.iter().map(|(bus, _)| *bus).collect();
                self.check_dispatch(
                    start,
                    &formulation,
                    &fixed,
                    &buses,
                    &setpoints,
                    &self.observed,
                    &mut relaxed,
                )?;
            }
        }
        if clipped_any {
            relaxed.fill(true);
        }

        Ok(WindowSolution {
            start,
            setpoints,
            relaxed,
            objective,
            iterations,
        })
    }

    /// Interval screen of the window. Returns the hard-bound miss when slacks
    /// are needed, or an [`InfeasibilityError`] when the miss cannot be relaxed.
    fn screen(
        &self,
        start: usize,
        formulation: &Formulation<'_>,
        fixed: &[Injection],
        group: &[WindowBattery],
        observed: &[ObservedBus],
    ) -> LqpResult<Option<String>> {
        let voltage = &self.config.voltage;
        let may_relax = voltage.mode == BoundMode::Soft || voltage.relaxation.enabled;
        let Some(detail) = formulation.screen(fixed, group, observed, None) else {
            return Ok(None);
        };
        let infeasible = |relaxed: bool, detail: String| -> LqpError {
            InfeasibilityError {
                timestep: start,
                relaxed,
                detail,
            }
            .into()
        };
        if !may_relax {
            return Err(infeasible(false, detail));
        }
        if let Some(relaxed) = formulation.screen(fixed, group, observed, Some(self.relaxation())) {
            return Err(infeasible(true, relaxed));
        }
        debug!(timestep = start, %detail, "hard voltage bounds unreachable; relaxing");
        Ok(Some(detail))
    }

    /// Re-evaluate `observed` under the combined setpoints `[step][battery]`
    /// of a window. A step off its hard bounds is marked relaxed when it
    /// stays within the relaxation caps, otherwise the window is an
    /// [`InfeasibilityError`].
    #[allow(clippy::too_many_arguments)]
    fn check_dispatch(
        &self,
        start: usize,
        formulation: &Formulation<'_>,
        fixed: &[Injection],
        buses: &[BusId],
        setpoints: &[Vec<Setpoint>],
        observed: &[ObservedBus],
        relaxed: &mut [bool],
    ) -> LqpResult<()> {
        let voltage = &self.config.voltage;
        let may_relax = voltage.mode == BoundMode::Soft || voltage.relaxation.enabled;
        for (t, (inj, row)) in fixed.iter().zip(setpoints).enumerate() {
            let dispatch: Vec<(BusId, Setpoint)> =
                buses.iter().copied().zip(row.iter().copied()).collect();
            let Some(detail) = formulation.check_step(inj, &dispatch, observed, None) else {
                continue;
            };
            let relaxed_miss = may_relax
                .then(|| formulation.check_step(inj, &dispatch, observed, Some(self.relaxation())))
                .flatten();
            if !may_relax || relaxed_miss.is_some() {
                return Err(InfeasibilityError {
                    timestep: start,
                    relaxed: may_relax,
                    detail: format!(
                        "step {} after local dispatch: {}",
                        t,
                        relaxed_miss.unwrap_or(detail)
                    ),
                }
                .into());
            }
            debug!(timestep = start, step = t, %detail, "local dispatch misses a hard bound; step relaxed");
            relaxed[t] = true;
        }
        Ok(())
    }

    fn solve_group(
        &self,
        start: usize,
        formulation: &Formulation<'_>,
        fixed: &[Injection],
        group: &[WindowBattery],
        observed: &[ObservedBus],
    ) -> LqpResult<GroupOutcome> {
        let voltage = &self.config.voltage;
        let soft = voltage.mode == BoundMode::Soft;
        let may_relax = soft || voltage.relaxation.enabled;
        let relax = self.relaxation();
        let infeasible = |relaxed: bool, detail: String| -> LqpError {
            InfeasibilityError {
                timestep: start,
                relaxed,
                detail,
            }
            .into()
        };

        let hard_miss = self.screen(start, formulation, fixed, group, observed)?;
        let mut use_slacks = soft || hard_miss.is_some();

        if group.is_empty() {
            return Ok(GroupOutcome {
                setpoints: vec![Vec::new(); fixed.len()],
                relaxed: vec![hard_miss.is_some(); fixed.len()],
                objective: 0.0,
                iterations: 0,
            });
        }

        let build = |slacks: bool| formulation.build(fixed, group, observed, slacks.then_some(relax));
        let mut qp = build(use_slacks);
        let mut solution = self.solve_qp(start, &qp)?;
        if solution.is_none() && !use_slacks && may_relax {
            debug!(timestep = start, "hard-bounded window infeasible; retrying with slacks");
            use_slacks = true;
            qp = build(true);
            solution = self.solve_qp(start, &qp)?;
        }
        let Some(sol) = solution else {
            return Err(infeasible(
                use_slacks,
                format!("backend '{}' reports the window primal infeasible", self.backend.id()),
            ));
        };

        Ok(GroupOutcome {
            setpoints: qp.setpoints(&sol.x, group),
            relaxed: qp
                .slack_by_step(&sol.x)
                .into_iter()
                .map(|s| s > SLACK_EPS)
                .collect(),
            objective: sol.objective,
            iterations: sol.iterations,
        })
    }

    /// `Ok(None)` when the backend proves the problem infeasible.
    fn solve_qp(&self, start: usize, qp: &WindowQp) -> LqpResult<Option<QpSolution>> {
        let options = &self.config.solver;
        let base = options.qp_settings();
        let factor = options.retry_tolerance_factor;
        let mut detail = String::new();

        for attempt in 1..=2 {
            let (settings, gap_tol) = if attempt == 1 {
                (base.clone(), options.optimality_tolerance)
            } else {
                (base.relaxed(factor), options.optimality_tolerance * factor)
            };
            match self.backend.solve(&qp.problem, &settings) {
                Ok(sol) if sol.status.is_infeasible() => return Ok(None),
                Ok(sol) if sol.status.is_solved() && sol.relative_gap() <= gap_tol => {
                    debug!(
                        timestep = start,
                        attempt,
                        iterations = sol.iterations,
                        objective = sol.objective,
                        "window solved"
                    );
                    return Ok(Some(sol));
                }
                Ok(sol) => {
                    detail = format!(
                        "status {}, relative duality gap {:.3e}",
                        sol.status,
                        sol.relative_gap()
                    );
                }
                Err(e) => detail = e.to_string(),
            }
            if attempt == 1 {
                warn!(timestep = start, %detail, factor, "solve not accepted; retrying with relaxed tolerances");
            }
        }

        Err(SolverNumericalError {
            timestep: start,
            attempts: 2,
            detail,
        }
        .into())
    }

    /// Check every battery before the first solve. Invalid batteries are
    /// dropped when `skip_invalid_batteries` is set, otherwise fatal.
    fn admit_batteries(
        &self,
        network: &Network,
        profiles: &ProfileSet,
        results: &mut ResultsAggregator,
    ) -> LqpResult<Vec<(BusId, BatteryState)>> {
        let total = profiles.len();
        let study_end = match self.config.terminal_soc {
            Some(t) if t.scope == TerminalScope::HorizonEnd && total > 0 => {
                Some((total - 1, t.band()))
            }
            _ => None,
        };

        let mut fleet = Vec::new();
        for (bus, state) in network.batteries() {
            let bus_name = &network.bus(bus).name;
            let check = battery::validate(state, bus_name).and_then(|_| {
                if self.ldf.column(bus).is_none() {
                    return Err(InfeasibleBatteryStateError::new(
                        bus_name.as_str(),
                        "battery on the slack bus cannot influence feeder voltages",
                    ));
                }
                match study_end {
                    Some(band) if !battery::is_idle(state) => battery::constraint_set(
                        state,
                        bus_name,
                        self.s_base,
                        profiles.dt_hours(),
                        total,
                        Some(band),
                    )
                    .map(|_| ()),
                    _ => Ok(()),
                }
            });
            match check {
                Ok(()) => fleet.push((bus, state.clone())),
                Err(err) if self.config.skip_invalid_batteries => {
                    warn!(battery = %state.name, error = %err, "skipping battery");
                    results.record_skipped(state.name.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(fleet)
    }

    /// Run the whole study, mutating battery SoC in `network` step by step.
    pub fn run(&self, network: &mut Network, profiles: &ProfileSet) -> LqpResult<ResultsAggregator> {
        if profiles.bus_count() != network.bus_count() && !profiles.is_empty() {
            return Err(LqpError::Validation(format!(
                "profiles cover {} buses but the network has {}",
                profiles.bus_count(),
                network.bus_count()
            )));
        }
        if network.bus_count() != self.bus_names.len() {
            return Err(LqpError::Validation(
                "network differs from the one the solver was built for".into(),
            ));
        }

        let mut results = ResultsAggregator::new(
            network,
            profiles.dt_hours(),
            self.config.voltage.default_limits(),
        );
        let mut fleet = self.admit_batteries(network, profiles, &mut results)?;
        let started = Instant::now();
        info!(
            steps = profiles.len(),
            batteries = fleet.len(),
            mode = ?self.config.horizon.mode,
            coordination = ?self.config.coordination,
            "starting dispatch study"
        );

        match self.config.horizon.mode {
            HorizonMode::Joint if !profiles.is_empty() => {
                let terminal = self.terminal(0, profiles.len(), profiles.len());
                match self.solve_window(0, profiles, &fleet, terminal) {
                    Ok(window) => {
                        for t in 0..window.len() {
                            let (objective, iterations) = if t == 0 {
                                (Some(window.objective), window.iterations)
                            } else {
                                (None, 0)
                            };
                            let status = if window.relaxed[t] {
                                StepStatus::Relaxed
                            } else {
                                StepStatus::Solved
                            };
                            let record = self.apply_step(
                                network,
                                profiles,
                                &mut fleet,
                                t,
                                Some(&window.setpoints[t]),
                                status,
                            );
                            results.push(DispatchSolution {
                                objective,
                                iterations,
                                ..record
                            });
                        }
                    }
                    Err(err) if err.is_per_timestep() => {
                        warn!(error = %err, "joint solve failed; falling back to one-step rolling windows");
                        self.run_rolling(network, profiles, &mut fleet, 1, &mut results)?;
                    }
                    Err(err) => return Err(err),
                }
            }
            HorizonMode::Joint => {}
            HorizonMode::Rolling => {
                let window = self.config.horizon.window_steps;
                self.run_rolling(network, profiles, &mut fleet, window, &mut results)?;
            }
        }

        let failed = results.failed_steps().count();
        info!(
            steps = results.len(),
            failed,
            elapsed_s = started.elapsed().as_secs_f64(),
            "dispatch study finished"
        );
        Ok(results)
    }

    fn run_rolling(
        &self,
        network: &mut Network,
        profiles: &ProfileSet,
        fleet: &mut [(BusId, BatteryState)],
        window_steps: usize,
        results: &mut ResultsAggregator,
    ) -> LqpResult<()> {
        let total = profiles.len();
        for t in 0..total {
            let window = profiles.window(t, window_steps.max(1));
            let terminal = self.terminal(t, window.len(), total);
            match self.solve_window(t, &window, fleet, terminal) {
                Ok(sol) => {
                    let status = if sol.relaxed[0] {
                        StepStatus::Relaxed
                    } else {
                        StepStatus::Solved
                    };
                    let record =
                        self.apply_step(network, profiles, fleet, t, Some(&sol.setpoints[0]), status);
                    results.push(DispatchSolution {
                        objective: Some(sol.objective),
                        iterations: sol.iterations,
                        ..record
                    });
                }
                Err(err) if err.is_per_timestep() => {
                    warn!(timestep = t, error = %err, "timestep failed; batteries idle");
                    let record =
                        self.apply_step(network, profiles, fleet, t, None, StepStatus::Failed);
                    results.push(DispatchSolution {
                        error: Some(err.to_string()),
                        ..record
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Apply one step's setpoints (or idle the fleet when `None`), carry SoC
    /// forward, and evaluate the feeder with and without battery action.
    fn apply_step(
        &self,
        network: &mut Network,
        profiles: &ProfileSet,
        fleet: &mut [(BusId, BatteryState)],
        t: usize,
        setpoints: Option<&[Setpoint]>,
        status: StepStatus,
    ) -> DispatchSolution {
        let dt = profiles.dt_hours();
        let s_base = self.s_base;
        let (p_fixed, q_fixed) = profiles.net_injection_pu(t, s_base);
        let mut p = p_fixed.clone();
        let mut q = q_fixed.clone();

        let mut dispatched = Vec::with_capacity(fleet.len());
        for (i, (bus, state)) in fleet.iter_mut().enumerate() {
            let sp = setpoints.and_then(|s| s.get(i)).copied().unwrap_or_default();
            p[bus.value()] += sp.p;
            q[bus.value()] += sp.q;
            let soc = battery::advance(state, sp.p_charge, sp.p_discharge, dt, s_base);
            state.soc = soc;
            if let Some(live) = network.battery_mut(*bus) {
                live.soc = soc;
            }
            dispatched.push(BatteryDispatch {
                battery: state.name.clone(),
                bus: *bus,
                bus_name: self.bus_names[bus.value()].clone(),
                p: Kilowatts::from_per_unit(sp.p, s_base),
                q: Kilovars::from_per_unit(sp.q, s_base),
                charge: Kilowatts::from_per_unit(sp.p_charge, s_base),
                discharge: Kilowatts::from_per_unit(sp.p_discharge, s_base),
                soc,
            });
        }

        let voltages = self.ldf.voltages(&p, &q);
        let baseline_voltages = self.ldf.voltages(&p_fixed, &q_fixed);
        let (loss, _) = self.ldf.losses(&p, &q);
        let (baseline_loss, _) = self.ldf.losses(&p_fixed, &q_fixed);
        let (slack_p, slack_q) = self.ldf.slack_injection(&p, &q);
        let max_violation_pu = self
            .observed
            .iter()
            .map(|o| {
                let v = voltages[o.bus.value()];
                (o.vmin - v).max(v - o.vmax).max(0.0)
            })
            .fold(0.0, f64::max);

        DispatchSolution {
            timestep: t,
            timestamp: profiles.timestamp(t),
            status,
            batteries: dispatched,
            voltages,
            baseline_voltages,
            losses: Kilowatts::from_per_unit(loss, s_base),
            baseline_losses: Kilowatts::from_per_unit(baseline_loss, s_base),
            slack_p: Kilowatts::from_per_unit(slack_p, s_base),
            slack_q: Kilovars::from_per_unit(slack_q, s_base),
            max_violation_pu,
            objective: None,
            iterations: 0,
            error: None,
        }
    }
}
