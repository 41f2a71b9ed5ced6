//! Window QP for battery dispatch on a LinDistFlow feeder.
//!
//! # Variables
//!
//! Per window step `t` and active battery `b`:
//! `p_ch, p_dis ≥ 0` (charge/discharge), net injection `p = p_dis − p_ch`,
//! reactive injection `q`, and end-of-step `soc`. Per step and observed bus
//! `i`: squared voltage `y`, plus slacks `s_lo, s_hi` when relaxed.
//!
//! # Objective
//!
//! ```text
//! Σ_t  w_loss·Δt·(pᵀ Rc p + qᵀ Rc q)/v₀²        p, q = fixed + battery
//!    + w_v·Σ_i (y_ti − v*²)²
//!    + w_thr·Δt·Σ_b (p_ch + p_dis)
//!    + ρ·Σ_i (s_lo + s_hi)
//!    + ε·Σ_b (p_ch² + p_dis² + q²)
//! ```
//!
//! # Constraints
//!
//! ```text
//! y_ti − Σ_b (A_ib·p_b + B_ib·q_b) = y_fixed_ti
//! soc_t − soc_{t−1} − ηc·Δt·p_ch + Δt/ηd·p_dis = 0
//! 0 ≤ p_ch ≤ c̄_t,  0 ≤ p_dis ≤ d̄_t,  soc ∈ [soc_lo, soc_hi]
//! ‖(p, q)‖₂ ≤ S
//! vmin² ≤ y (+ s_lo),   y (− s_hi) ≤ vmax²
//! ```

use lqp_core::BusId;

use super::config::ObjectiveWeights;
use crate::battery::{project_to_disk, BatteryConstraintSet};
use crate::lindistflow::LinDistFlow;
use crate::qp::QpProblem;

const SCREEN_TOL: f64 = 1e-9;
/// Solver round-off allowed when re-checking a dispatched step, p.u.².
const CHECK_TOL: f64 = 1e-6;

/// Fixed (non-battery) injections for one step, arena-indexed p.u.
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub p: Vec<f64>,
    pub q: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct WindowBattery {
    pub bus: BusId,
    /// LinDistFlow column of `bus`.
    pub column: usize,
    pub set: BatteryConstraintSet,
}

#[derive(Debug, Clone)]
pub struct ObservedBus {
    pub bus: BusId,
    pub name: String,
    /// LinDistFlow row of `bus`.
    pub row: usize,
    pub vmin: f64,
    pub vmax: f64,
}

/// Voltage-bound slacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relaxation {
    pub penalty: f64,
    pub max_violation_pu: f64,
}

impl Relaxation {
    /// Largest slack on `y` that keeps the voltage within
    /// `max_violation_pu` of each bound.
    pub fn caps(&self, vmin: f64, vmax: f64) -> (f64, f64) {
        let d = self.max_violation_pu;
        let lo = vmin * vmin - (vmin - d).max(0.0).powi(2);
        let hi = (vmax + d).powi(2) - vmax * vmax;
        (lo, hi)
    }
}

/// Battery setpoint for one step, p.u.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoint {
    pub p_charge: f64,
    pub p_discharge: f64,
    pub p: f64,
    pub q: f64,
    /// End-of-step SoC, p.u.·h.
    pub soc: f64,
}

#[derive(Debug, Clone, Copy)]
struct BatteryVars {
    p_ch: usize,
    p_dis: usize,
    p: usize,
    q: usize,
    soc: usize,
}

#[derive(Debug, Clone, Copy)]
struct VoltageVars {
    y: usize,
    slack: Option<(usize, usize)>,
}

/// A built window problem and the variable layout needed to read it back.
#[derive(Debug, Clone)]
pub struct WindowQp {
    pub problem: QpProblem,
    batteries: Vec<Vec<BatteryVars>>,
    voltages: Vec<Vec<VoltageVars>>,
}

impl WindowQp {
    /// Setpoints `[step][battery]` from a primal solution, clamped back onto
    /// the battery envelope so that solver round-off never leaks past the
    /// power boxes, the inverter disk or `[0, capacity]`.
    pub fn setpoints(&self, x: &[f64], batteries: &[WindowBattery]) -> Vec<Vec<Setpoint>> {
        let steps = self.voltages.len();
        let mut out = vec![Vec::with_capacity(batteries.len()); steps];
        for (bat, vars) in batteries.iter().zip(&self.batteries) {
            let set = &bat.set;
            let mut soc = set.soc0;
            for (t, v) in vars.iter().enumerate() {
                let env = set.steps[t];
                let mut p_ch = x[v.p_ch].clamp(0.0, env.charge_max);
                let mut p_dis = x[v.p_dis].clamp(0.0, env.discharge_max);
                let p = p_dis - p_ch;
                let (p_disk, q) = project_to_disk(p, x[v.q], set.s_max);
                if p != 0.0 {
                    let k = p_disk / p;
                    p_ch *= k;
                    p_dis *= k;
                }
                soc = set.soc_after(soc, p_ch, p_dis).clamp(0.0, set.capacity);
                out[t].push(Setpoint {
                    p_charge: p_ch,
                    p_discharge: p_dis,
                    p: p_dis - p_ch,
                    q,
                    soc,
                });
            }
        }
        out
    }

    /// Largest voltage-bound slack in use at each step, p.u.².
    pub fn slack_by_step(&self, x: &[f64]) -> Vec<f64> {
        self.voltages
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|v| v.slack)
                    .map(|(lo, hi)| x[lo].max(x[hi]))
                    .fold(0.0, f64::max)
            })
            .collect()
    }

    /// Squared voltages `[step][observed]` as the solver saw them.
    pub fn squared_voltages(&self, x: &[f64]) -> Vec<Vec<f64>> {
        self.voltages
            .iter()
            .map(|row| row.iter().map(|v| x[v.y]).collect())
            .collect()
    }
}

/// Objective and bound parameters shared by every window of a study.
#[derive(Debug, Clone)]
pub struct Formulation<'a> {
    pub ldf: &'a LinDistFlow,
    pub dt_hours: f64,
    pub weights: ObjectiveWeights,
    pub target_pu: f64,
    pub regularization: f64,
}

impl<'a> Formulation<'a> {
    fn column_values(&self, arena: &[f64]) -> Vec<f64> {
        self.ldf.columns().iter().map(|b| arena[b.value()]).collect()
    }

    /// Squared voltages at every bus for the fixed injections alone.
    pub fn fixed_squared_voltages(&self, fixed: &Injection) -> Vec<f64> {
        self.ldf.squared_voltages(&fixed.p, &fixed.q)
    }

    pub fn build(
        &self,
        fixed: &[Injection],
        batteries: &[WindowBattery],
        observed: &[ObservedBus],
        relaxation: Option<Relaxation>,
    ) -> WindowQp {
        let steps = fixed.len();
        let dt = self.dt_hours;

        let mut n = 0;
        let mut battery_vars: Vec<Vec<BatteryVars>> = Vec::with_capacity(batteries.len());
        for _ in batteries {
            let mut per_step = Vec::with_capacity(steps);
            for _ in 0..steps {
                per_step.push(BatteryVars {
                    p_ch: n,
                    p_dis: n + 1,
                    p: n + 2,
                    q: n + 3,
                    soc: n + 4,
                });
                n += 5;
            }
            battery_vars.push(per_step);
        }
        let mut voltage_vars: Vec<Vec<VoltageVars>> = Vec::with_capacity(steps);
        for _ in 0..steps {
            let mut row = Vec::with_capacity(observed.len());
            for _ in observed {
                let y = n;
                n += 1;
                let slack = relaxation.map(|_| {
                    n += 2;
                    (n - 2, n - 1)
                });
                row.push(VoltageVars { y, slack });
            }
            voltage_vars.push(row);
        }

        let mut qp = QpProblem::new(n);
        let w = self.weights;
        let k_loss = w.losses * dt / self.ldf.slack_voltage_sq();
        let v_target_sq = self.target_pu * self.target_pu;

        for t in 0..steps {
            // Losses, expanded around the fixed injections.
            if k_loss != 0.0 {
                let pc = self.column_values(&fixed[t].p);
                let qc = self.column_values(&fixed[t].q);
                let mut base = 0.0;
                for j in 0..pc.len() {
                    for k in 0..pc.len() {
                        let r = self.ldf.r_common(j, k);
                        base += r * (pc[j] * pc[k] + qc[j] * qc[k]);
                    }
                }
                qp.add_constant(k_loss * base);

                for (b, bat) in batteries.iter().enumerate() {
                    let vars = battery_vars[b][t];
                    let (mut rp, mut rq) = (0.0, 0.0);
                    for k in 0..pc.len() {
                        let r = self.ldf.r_common(bat.column, k);
                        rp += r * pc[k];
                        rq += r * qc[k];
                    }
                    qp.add_linear(vars.p, 2.0 * k_loss * rp);
                    qp.add_linear(vars.q, 2.0 * k_loss * rq);
                    for (b2, other) in batteries.iter().enumerate() {
                        let r = self.ldf.r_common(bat.column, other.column);
                        let v2 = battery_vars[b2][t];
                        qp.add_quadratic(vars.p, v2.p, k_loss * r);
                        qp.add_quadratic(vars.q, v2.q, k_loss * r);
                    }
                }
            }

            for vars in battery_vars.iter().map(|v| v[t]) {
                qp.add_linear(vars.p_ch, w.throughput * dt);
                qp.add_linear(vars.p_dis, w.throughput * dt);
                qp.add_quadratic(vars.p_ch, vars.p_ch, self.regularization);
                qp.add_quadratic(vars.p_dis, vars.p_dis, self.regularization);
                qp.add_quadratic(vars.q, vars.q, self.regularization);
            }

            for v in &voltage_vars[t] {
                qp.add_quadratic(v.y, v.y, w.voltage_deviation);
                qp.add_linear(v.y, -2.0 * w.voltage_deviation * v_target_sq);
                qp.add_constant(w.voltage_deviation * v_target_sq * v_target_sq);
                if let (Some((lo, hi)), Some(relax)) = (v.slack, relaxation) {
                    qp.add_linear(lo, relax.penalty);
                    qp.add_linear(hi, relax.penalty);
                }
            }
        }

        for (bat, vars) in batteries.iter().zip(&battery_vars) {
            let set = &bat.set;
            for (t, v) in vars.iter().enumerate() {
                qp.push_eq(&[(v.p, 1.0), (v.p_dis, -1.0), (v.p_ch, 1.0)], 0.0);
                let charge = (v.p_ch, -set.eta_c * dt);
                let discharge = (v.p_dis, dt / set.eta_d);
                if t == 0 {
                    qp.push_eq(&[(v.soc, 1.0), charge, discharge], set.soc0);
                } else {
                    qp.push_eq(&[(v.soc, 1.0), (vars[t - 1].soc, -1.0), charge, discharge], 0.0);
                }

                let env = set.steps[t];
                qp.push_bounds(v.p_ch, 0.0, env.charge_max);
                qp.push_bounds(v.p_dis, 0.0, env.discharge_max);
                let (mut lo, mut hi) = (set.soc_lower, set.soc_upper);
                if let Some((step, band_lo, band_hi)) = set.terminal {
                    if step == t {
                        lo = lo.max(band_lo);
                        hi = hi.min(band_hi);
                    }
                }
                qp.push_bounds(v.soc, lo, hi);
                qp.push_soc(set.s_max, &[&[(v.p, 1.0)], &[(v.q, 1.0)]]);
            }
        }

        for t in 0..steps {
            let y_fixed = self.fixed_squared_voltages(&fixed[t]);
            for (obs, v) in observed.iter().zip(&voltage_vars[t]) {
                let mut row = Vec::with_capacity(1 + 2 * batteries.len());
                row.push((v.y, 1.0));
                for (bat, vars) in batteries.iter().zip(&battery_vars) {
                    row.push((vars[t].p, -self.ldf.a(obs.row, bat.column)));
                    row.push((vars[t].q, -self.ldf.b(obs.row, bat.column)));
                }
                qp.push_eq(&row, y_fixed[obs.bus.value()]);

                let (lo_sq, hi_sq) = (obs.vmin * obs.vmin, obs.vmax * obs.vmax);
                match (v.slack, relaxation) {
                    (Some((s_lo, s_hi)), Some(relax)) => {
                        let (cap_lo, cap_hi) = relax.caps(obs.vmin, obs.vmax);
                        qp.push_leq(&[(v.y, -1.0), (s_lo, -1.0)], -lo_sq);
                        qp.push_leq(&[(v.y, 1.0), (s_hi, -1.0)], hi_sq);
                        qp.push_bounds(s_lo, 0.0, cap_lo);
                        qp.push_bounds(s_hi, 0.0, cap_hi);
                    }
                    _ => qp.push_bounds(v.y, lo_sq, hi_sq),
                }
            }
        }

        WindowQp {
            problem: qp,
            batteries: battery_vars,
            voltages: voltage_vars,
        }
    }

    /// Interval check on the reachable squared-voltage range of every
    /// observed bus, ignoring SoC coupling. `Some(detail)` means no battery
    /// action can satisfy the bounds, so the backend need not run.
    pub fn screen(
        &self,
        fixed: &[Injection],
        batteries: &[WindowBattery],
        observed: &[ObservedBus],
        relaxation: Option<Relaxation>,
    ) -> Option<String> {
        for (t, inj) in fixed.iter().enumerate() {
            let y_fixed = self.fixed_squared_voltages(inj);
            for obs in observed {
                let base = y_fixed[obs.bus.value()];
                let (mut reach_lo, mut reach_hi) = (base, base);
                for bat in batteries {
                    let (lo, hi) = self.injection_reach(obs.row, bat, t);
                    reach_lo += lo;
                    reach_hi += hi;
                }
                let (cap_lo, cap_hi) = relaxation
                    .map(|r| r.caps(obs.vmin, obs.vmax))
                    .unwrap_or((0.0, 0.0));
                let lo_sq = obs.vmin * obs.vmin - cap_lo;
                let hi_sq = obs.vmax * obs.vmax + cap_hi;
                if reach_hi < lo_sq - SCREEN_TOL {
                    return Some(format!(
                        "bus '{}' step {}: voltage reaches at most {:.5} p.u. against a floor of {:.5} p.u.",
                        obs.name,
                        t,
                        reach_hi.max(0.0).sqrt(),
                        lo_sq.max(0.0).sqrt()
                    ));
                }
                if reach_lo > hi_sq + SCREEN_TOL {
                    return Some(format!(
                        "bus '{}' step {}: voltage stays at or above {:.5} p.u. against a ceiling of {:.5} p.u.",
                        obs.name,
                        t,
                        reach_lo.max(0.0).sqrt(),
                        hi_sq.sqrt()
                    ));
                }
            }
        }
        None
    }

    /// Bound check of `observed` at one step with battery setpoints added to
    /// the fixed injections. `Some(detail)` names the first bus out of bounds.
    pub fn check_step(
        &self,
        fixed: &Injection,
        dispatch: &[(BusId, Setpoint)],
        observed: &[ObservedBus],
        relaxation: Option<Relaxation>,
    ) -> Option<String> {
        let mut p = fixed.p.clone();
        let mut q = fixed.q.clone();
        for (bus, sp) in dispatch {
            p[bus.value()] += sp.p;
            q[bus.value()] += sp.q;
        }
        let y = self.ldf.squared_voltages(&p, &q);
        for obs in observed {
            let (cap_lo, cap_hi) = relaxation
                .map(|r| r.caps(obs.vmin, obs.vmax))
                .unwrap_or((0.0, 0.0));
            let lo_sq = obs.vmin * obs.vmin - cap_lo;
            let hi_sq = obs.vmax * obs.vmax + cap_hi;
            let v = y[obs.bus.value()];
            if v < lo_sq - CHECK_TOL {
                return Some(format!(
                    "bus '{}': voltage {:.5} p.u. is below the floor of {:.5} p.u.",
                    obs.name,
                    v.max(0.0).sqrt(),
                    lo_sq.max(0.0).sqrt()
                ));
            }
            if v > hi_sq + CHECK_TOL {
                return Some(format!(
                    "bus '{}': voltage {:.5} p.u. is above the ceiling of {:.5} p.u.",
                    obs.name,
                    v.sqrt(),
                    hi_sq.sqrt()
                ));
            }
        }
        None
    }

    /// Outer bound on `A_ib·p + B_ib·q` over the battery's box and disk.
    fn injection_reach(&self, row: usize, bat: &WindowBattery, t: usize) -> (f64, f64) {
        let a = self.ldf.a(row, bat.column);
        let b = self.ldf.b(row, bat.column);
        let s = bat.set.s_max;
        let env = bat.set.steps[t];
        let (p_lo, p_hi) = (-env.charge_max.min(s), env.discharge_max.min(s));

        let box_hi = if a >= 0.0 { a * p_hi } else { a * p_lo } + b.abs() * s;
        let box_lo = if a >= 0.0 { a * p_lo } else { a * p_hi } - b.abs() * s;
        let disk = s * a.hypot(b);
        (box_lo.max(-disk), box_hi.min(disk))
    }
}
