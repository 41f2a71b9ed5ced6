//! Convex operating envelope of a battery over a dispatch window.
//!
//! All quantities here are per-unit on the system base: power in p.u.,
//! energy in p.u.·h. The SoC recursion is
//!
//! ```text
//! soc[t] = soc[t-1] + ηc·p_ch[t]·Δt − p_dis[t]·Δt/ηd
//! ```
//!
//! A battery that starts outside its reserve band may not drift further
//! from it: the per-step SoC bounds are widened just enough to contain the
//! starting point.

use lqp_core::{BatteryState, InfeasibleBatteryStateError, KilovoltAmperes, KilowattHours};

/// Power capability below this (p.u.) counts as none.
pub const IDLE_EPS: f64 = 1e-9;

/// Terminal band misses up to this (p.u.·h) are solver round-off, not clipping.
pub const CLIP_TOL: f64 = 1e-7;

/// Per-step power caps (p.u.).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEnvelope {
    pub charge_max: f64,
    pub discharge_max: f64,
}

/// Requested SoC band at a given step, as capacity fractions.
///
/// `steps_after` is the number of study steps that still follow the banded
/// step. The band is then widened to every SoC from which the requested band
/// stays reachable in that many steps at full power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalBand {
    pub target_fraction: f64,
    pub tolerance_fraction: f64,
    pub steps_after: usize,
}

impl TerminalBand {
    pub fn new(target_fraction: f64, tolerance_fraction: f64) -> Self {
        Self {
            target_fraction,
            tolerance_fraction,
            steps_after: 0,
        }
    }

    pub fn ahead_of(self, steps_after: usize) -> Self {
        Self {
            steps_after,
            ..self
        }
    }
}

/// Everything the dispatch QP needs to constrain one battery over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryConstraintSet {
    pub dt: f64,
    pub capacity: f64,
    pub soc0: f64,
    pub soc_lower: f64,
    pub soc_upper: f64,
    pub eta_c: f64,
    pub eta_d: f64,
    /// Inverter apparent-power limit; `p² + q² ≤ s_max²`.
    pub s_max: f64,
    pub steps: Vec<StepEnvelope>,
    /// Caps of any step after the first.
    pub sustained: StepEnvelope,
    /// `(step, lo, hi)` band on end-of-step SoC.
    pub terminal: Option<(usize, f64, f64)>,
}

impl BatteryConstraintSet {
    pub fn horizon(&self) -> usize {
        self.steps.len()
    }

    /// SoC after one step of the given charge/discharge (unclamped).
    pub fn soc_after(&self, soc: f64, p_ch: f64, p_dis: f64) -> f64 {
        soc + self.eta_c * p_ch * self.dt - p_dis * self.dt / self.eta_d
    }
}

/// Reject contradictory parameters.
pub fn validate(state: &BatteryState, bus: &str) -> Result<(), InfeasibleBatteryStateError> {
    let fail = |reason: String| Err(InfeasibleBatteryStateError::new(bus, reason));

    let finite = [
        state.capacity.value(),
        state.soc.value(),
        state.charge_limit.value(),
        state.discharge_limit.value(),
        state.inverter_limit.value(),
        state.charge_efficiency,
        state.discharge_efficiency,
        state.soc_min_fraction,
        state.soc_max_fraction,
    ];
    if finite.iter().any(|v| !v.is_finite()) {
        return fail("non-finite parameter".into());
    }
    for (label, eta) in [
        ("charge", state.charge_efficiency),
        ("discharge", state.discharge_efficiency),
    ] {
        if eta <= 0.0 || eta > 1.0 {
            return fail(format!("{} efficiency {} outside (0, 1]", label, eta));
        }
    }
    if state.capacity.value() < 0.0 {
        return fail(format!("negative capacity {}", state.capacity));
    }
    if state.charge_limit.value() < 0.0
        || state.discharge_limit.value() < 0.0
        || state.inverter_limit.value() < 0.0
    {
        return fail("negative power limit".into());
    }
    if state.soc.value() < -1e-9 || state.soc.value() > state.capacity.value() + 1e-9 {
        return fail(format!(
            "state of charge {} outside [0, {}]",
            state.soc, state.capacity
        ));
    }
    if state.soc_min_fraction < 0.0
        || state.soc_max_fraction > 1.0
        || state.soc_min_fraction > state.soc_max_fraction
    {
        return fail(format!(
            "reserve band [{}, {}] is not an ordered sub-range of [0, 1]",
            state.soc_min_fraction, state.soc_max_fraction
        ));
    }
    Ok(())
}

/// `true` when the battery has no power capability worth a decision variable.
pub fn is_idle(state: &BatteryState) -> bool {
    state.inverter_limit.value() <= IDLE_EPS || state.capacity.value() <= IDLE_EPS
}

fn soc_bounds(capacity: f64, soc0: f64, state: &BatteryState) -> (f64, f64) {
    let lo = capacity * state.soc_min_fraction;
    let hi = capacity * state.soc_max_fraction;
    (lo.min(soc0), hi.max(soc0))
}

/// Build the window's constraint set. `terminal` is `(step, band)` with
/// `step` the 0-based index of the step whose end-of-step SoC is banded.
///
/// Fails when parameters are contradictory or the band cannot be reached
/// from the current SoC by `step`.
pub fn constraint_set(
    state: &BatteryState,
    bus: &str,
    s_base: KilovoltAmperes,
    dt_hours: f64,
    steps: usize,
    terminal: Option<(usize, TerminalBand)>,
) -> Result<BatteryConstraintSet, InfeasibleBatteryStateError> {
    let set = envelope(state, bus, s_base, dt_hours, steps)?;
    let terminal = match terminal {
        None => None,
        Some((step, band)) => {
            let (lo, hi) = band_bounds(&set, band);
            let (reach_lo, reach_hi) = reachable_range(&set, step + 1);
            if hi < reach_lo - 1e-9 || lo > reach_hi + 1e-9 || lo > hi {
                return Err(InfeasibleBatteryStateError::new(
                    bus,
                    format!(
                        "terminal SoC band [{:.4}, {:.4}] p.u.h unreachable in {} step(s); reachable [{:.4}, {:.4}]",
                        lo,
                        hi,
                        step + 1,
                        reach_lo,
                        reach_hi
                    ),
                ));
            }
            let (lo, hi) = (lo.max(reach_lo), hi.min(reach_hi));
            if lo > hi {
                // touching within tolerance
                let mid = 0.5 * (lo + hi);
                Some((step, mid, mid))
            } else {
                Some((step, lo, hi))
            }
        }
    };
    Ok(BatteryConstraintSet { terminal, ..set })
}

/// Like [`constraint_set`], but an unreachable terminal band is moved to the
/// reachable SoC closest to it instead of failing.
pub fn constraint_set_clipped(
    state: &BatteryState,
    bus: &str,
    s_base: KilovoltAmperes,
    dt_hours: f64,
    steps: usize,
    terminal: Option<(usize, TerminalBand)>,
) -> Result<(BatteryConstraintSet, bool), InfeasibleBatteryStateError> {
    let set = envelope(state, bus, s_base, dt_hours, steps)?;
    let Some((step, band)) = terminal else {
        return Ok((set, false));
    };
    let (lo, hi) = band_bounds(&set, band);
    let (reach_lo, reach_hi) = reachable_range(&set, step + 1);
    let (band_lo, band_hi, clipped) = if hi < reach_lo {
        (reach_lo, reach_lo, reach_lo - hi > CLIP_TOL)
    } else if lo > reach_hi {
        (reach_hi, reach_hi, lo - reach_hi > CLIP_TOL)
    } else {
        (lo.max(reach_lo), hi.min(reach_hi), false)
    };
    Ok((
        BatteryConstraintSet {
            terminal: Some((step, band_lo, band_hi)),
            ..set
        },
        clipped,
    ))
}

fn band_bounds(set: &BatteryConstraintSet, band: TerminalBand) -> (f64, f64) {
    let target = band.target_fraction * set.capacity;
    let tol = band.tolerance_fraction.abs() * set.capacity;
    let (lo, hi) = approach_range(set, target - tol, target + tol, band.steps_after);
    (lo.max(set.soc_lower), hi.min(set.soc_upper))
}

/// SoC interval from which `[lo, hi]` can still be reached in `k` more steps
/// at the sustained power caps. Not clamped to the SoC limits.
pub fn approach_range(set: &BatteryConstraintSet, lo: f64, hi: f64, k: usize) -> (f64, f64) {
    let k = k as f64;
    let charge = set.eta_c * set.sustained.charge_max * set.dt;
    let discharge = set.sustained.discharge_max * set.dt / set.eta_d;
    (lo - k * charge, hi + k * discharge)
}

fn envelope(
    state: &BatteryState,
    bus: &str,
    s_base: KilovoltAmperes,
    dt_hours: f64,
    steps: usize,
) -> Result<BatteryConstraintSet, InfeasibleBatteryStateError> {
    validate(state, bus)?;
    if dt_hours <= 0.0 {
        return Err(InfeasibleBatteryStateError::new(
            bus,
            format!("timestep {} h is not positive", dt_hours),
        ));
    }

    let capacity = state.capacity.to_per_unit(s_base);
    let soc0 = state.soc.to_per_unit(s_base).clamp(0.0, capacity);
    let (lo, hi) = soc_bounds(capacity, soc0, state);
    let eta_c = state.charge_efficiency;
    let eta_d = state.discharge_efficiency;
    let s_max = state.inverter_limit.to_per_unit(s_base);

    let charge_limit = state.charge_limit.to_per_unit(s_base).min(s_max);
    let discharge_limit = state.discharge_limit.to_per_unit(s_base).min(s_max);
    let band = hi - lo;
    let steady = StepEnvelope {
        charge_max: charge_limit.min(band / (eta_c * dt_hours)),
        discharge_max: discharge_limit.min(band * eta_d / dt_hours),
    };
    let first = StepEnvelope {
        charge_max: steady.charge_max.min((hi - soc0) / (eta_c * dt_hours)).max(0.0),
        discharge_max: steady
            .discharge_max
            .min((soc0 - lo) * eta_d / dt_hours)
            .max(0.0),
    };

    let mut envelopes = Vec::with_capacity(steps);
    for t in 0..steps {
        envelopes.push(if t == 0 { first } else { steady });
    }

    Ok(BatteryConstraintSet {
        dt: dt_hours,
        capacity,
        soc0,
        soc_lower: lo,
        soc_upper: hi,
        eta_c,
        eta_d,
        s_max,
        steps: envelopes,
        sustained: steady,
        terminal: None,
    })
}

/// SoC range reachable after `k` steps at full charge or discharge.
pub fn reachable_range(set: &BatteryConstraintSet, k: usize) -> (f64, f64) {
    let mut lo = set.soc0;
    let mut hi = set.soc0;
    for env in set.steps.iter().take(k) {
        hi = (hi + set.eta_c * env.charge_max * set.dt).min(set.soc_upper);
        lo = (lo - env.discharge_max * set.dt / set.eta_d).max(set.soc_lower);
    }
    (lo, hi)
}

/// Carry a battery forward by one accepted step (powers in p.u.).
pub fn advance(
    state: &BatteryState,
    p_ch: f64,
    p_dis: f64,
    dt_hours: f64,
    s_base: KilovoltAmperes,
) -> KilowattHours {
    let delta = (state.charge_efficiency * p_ch - p_dis / state.discharge_efficiency) * dt_hours;
    let next = state.soc + KilowattHours::from_per_unit(delta, s_base);
    next.max(KilowattHours::ZERO).min(state.capacity)
}

/// Scale `(p, q)` back onto the disk of radius `s_max` if it lies outside.
pub fn project_to_disk(p: f64, q: f64, s_max: f64) -> (f64, f64) {
    let s = p.hypot(q);
    if s > s_max && s > 0.0 {
        let k = s_max / s;
        (p * k, q * k)
    } else {
        (p, q)
    }
}
