//! Per-timestep dispatch records and study-level summary metrics.

use std::collections::BTreeMap;

use lqp_core::{BusId, Kilovars, Kilowatts, KilowattHours, Network, PerUnit};
use serde::{Deserialize, Serialize};

/// Voltage excursions smaller than this (p.u.) are not counted.
const VIOLATION_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Solved,
    /// Solved with voltage-bound slacks in use.
    Relaxed,
    /// No accepted solution; batteries idled for the step.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepStatus::Solved => "solved",
            StepStatus::Relaxed => "relaxed",
            StepStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryDispatch {
    pub battery: String,
    pub bus: BusId,
    pub bus_name: String,
    /// Net injection, discharge positive.
    pub p: Kilowatts,
    pub q: Kilovars,
    pub charge: Kilowatts,
    pub discharge: Kilowatts,
    /// State of charge at the end of the step.
    pub soc: KilowattHours,
}

/// Applied outcome of one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSolution {
    pub timestep: usize,
    pub timestamp: i64,
    pub status: StepStatus,
    pub batteries: Vec<BatteryDispatch>,
    /// LinDistFlow voltage estimate per bus (arena order), with batteries.
    pub voltages: Vec<f64>,
    /// Same, without battery action.
    pub baseline_voltages: Vec<f64>,
    pub losses: Kilowatts,
    pub baseline_losses: Kilowatts,
    pub slack_p: Kilowatts,
    pub slack_q: Kilovars,
    /// Largest excursion outside the bus voltage limits, p.u.
    pub max_violation_pu: f64,
    pub objective: Option<f64>,
    pub iterations: u32,
    pub error: Option<String>,
}

impl DispatchSolution {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Prices used for the bill and cost impact estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TariffConfig {
    /// Customer retail price, per kWh.
    pub retail_price_per_kwh: f64,
    /// Utility energy cost, per kWh of losses.
    pub energy_cost_per_kwh: f64,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            retail_price_per_kwh: 0.15,
            energy_cost_per_kwh: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageExtreme {
    pub voltage_pu: f64,
    pub bus: String,
    pub timestep: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub steps: usize,
    pub solved_steps: usize,
    pub relaxed_steps: usize,
    pub failed_steps: usize,
    pub skipped_batteries: usize,
    pub total_losses_kwh: f64,
    pub baseline_losses_kwh: f64,
    pub loss_reduction_kwh: f64,
    pub loss_reduction_pct: f64,
    pub min_voltage: Option<VoltageExtreme>,
    pub max_voltage: Option<VoltageExtreme>,
    pub baseline_min_voltage_pu: Option<f64>,
    pub voltage_violations: usize,
    pub baseline_voltage_violations: usize,
    pub battery_throughput_kwh: f64,
    /// Charge minus discharge energy; positive means the batteries drew
    /// energy from the grid.
    pub battery_net_energy_kwh: f64,
    pub customer_bill_impact: f64,
    pub utility_cost_impact: f64,
}

impl SummaryMetrics {
    /// Flat key-value view for reports.
    pub fn to_key_values(&self) -> BTreeMap<String, serde_json::Value> {
        let mut kv = BTreeMap::new();
        let mut put = |k: &str, v: serde_json::Value| {
            kv.insert(k.to_string(), v);
        };
        put("steps", self.steps.into());
        put("solved_steps", self.solved_steps.into());
        put("relaxed_steps", self.relaxed_steps.into());
        put("failed_steps", self.failed_steps.into());
        put("skipped_batteries", self.skipped_batteries.into());
        put("total_losses_kwh", self.total_losses_kwh.into());
        put("baseline_losses_kwh", self.baseline_losses_kwh.into());
        put("loss_reduction_kwh", self.loss_reduction_kwh.into());
        put("loss_reduction_pct", self.loss_reduction_pct.into());
        if let Some(v) = &self.min_voltage {
            put("min_voltage_pu", v.voltage_pu.into());
            put("min_voltage_bus", v.bus.clone().into());
            put("min_voltage_timestep", v.timestep.into());
        }
        if let Some(v) = &self.max_voltage {
            put("max_voltage_pu", v.voltage_pu.into());
            put("max_voltage_bus", v.bus.clone().into());
            put("max_voltage_timestep", v.timestep.into());
        }
        if let Some(v) = self.baseline_min_voltage_pu {
            put("baseline_min_voltage_pu", v.into());
        }
        put("voltage_violations", self.voltage_violations.into());
        put(
            "baseline_voltage_violations",
            self.baseline_voltage_violations.into(),
        );
        put("battery_throughput_kwh", self.battery_throughput_kwh.into());
        put("battery_net_energy_kwh", self.battery_net_energy_kwh.into());
        put("customer_bill_impact", self.customer_bill_impact.into());
        put("utility_cost_impact", self.utility_cost_impact.into());
        kv
    }
}

/// Owns the solution history of a study run. Never feeds back into solves.
#[derive(Debug, Clone)]
pub struct ResultsAggregator {
    bus_names: Vec<String>,
    slack: BusId,
    limits: Vec<(f64, f64)>,
    dt_hours: f64,
    steps: Vec<DispatchSolution>,
    skipped: Vec<String>,
}

impl ResultsAggregator {
    pub fn new(network: &Network, dt_hours: f64, default_limits: (PerUnit, PerUnit)) -> Self {
        let limits = network
            .buses()
            .iter()
            .map(|b| {
                let (lo, hi) = network.voltage_limits(b.id, default_limits);
                (lo.value(), hi.value())
            })
            .collect();
        Self {
            bus_names: network.buses().iter().map(|b| b.name.clone()).collect(),
            slack: network.slack(),
            limits,
            dt_hours,
            steps: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn push(&mut self, step: DispatchSolution) {
        self.steps.push(step);
    }

    pub fn record_skipped(&mut self, battery: impl Into<String>) {
        self.skipped.push(battery.into());
    }

    pub fn skipped_batteries(&self) -> &[String] {
        &self.skipped
    }

    pub fn steps(&self) -> &[DispatchSolution] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn dt_hours(&self) -> f64 {
        self.dt_hours
    }

    pub fn bus_names(&self) -> &[String] {
        &self.bus_names
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &DispatchSolution> {
        self.steps.iter().filter(|s| s.is_failed())
    }

    /// `bus`'s voltage at every recorded step.
    pub fn voltage_profile(&self, bus: BusId) -> Vec<f64> {
        self.steps.iter().map(|s| s.voltages[bus.value()]).collect()
    }

    /// One battery's dispatch at every recorded step, by battery name.
    pub fn battery_trajectory(&self, battery: &str) -> Vec<&BatteryDispatch> {
        self.steps
            .iter()
            .filter_map(|s| s.batteries.iter().find(|b| b.battery == battery))
            .collect()
    }

    fn violations(&self, voltages: &[f64]) -> usize {
        voltages
            .iter()
            .zip(&self.limits)
            .enumerate()
            .filter(|(i, _)| *i != self.slack.value())
            .filter(|(_, (v, (lo, hi)))| **v < lo - VIOLATION_TOL || **v > hi + VIOLATION_TOL)
            .count()
    }

    fn extreme(&self, best: impl Fn(f64, f64) -> bool) -> Option<VoltageExtreme> {
        let mut found: Option<VoltageExtreme> = None;
        for step in &self.steps {
            for (i, &v) in step.voltages.iter().enumerate() {
                if i == self.slack.value() {
                    continue;
                }
                if found.as_ref().map_or(true, |e| best(v, e.voltage_pu)) {
                    found = Some(VoltageExtreme {
                        voltage_pu: v,
                        bus: self.bus_names[i].clone(),
                        timestep: step.timestep,
                    });
                }
            }
        }
        found
    }

    pub fn summary(&self, tariff: &TariffConfig) -> SummaryMetrics {
        let count = |status: StepStatus| self.steps.iter().filter(|s| s.status == status).count();
        let dt = self.dt_hours;

        let total_losses_kwh: f64 = self.steps.iter().map(|s| s.losses.value() * dt).sum();
        let baseline_losses_kwh: f64 = self
            .steps
            .iter()
            .map(|s| s.baseline_losses.value() * dt)
            .sum();
        let loss_reduction_kwh = baseline_losses_kwh - total_losses_kwh;
        let loss_reduction_pct = if baseline_losses_kwh > 0.0 {
            100.0 * loss_reduction_kwh / baseline_losses_kwh
        } else {
            0.0
        };

        let mut throughput = 0.0;
        let mut net_energy = 0.0;
        for b in self.steps.iter().flat_map(|s| &s.batteries) {
            throughput += (b.charge.value() + b.discharge.value()) * dt;
            net_energy += (b.charge.value() - b.discharge.value()) * dt;
        }

        let baseline_min_voltage_pu = self
            .steps
            .iter()
            .flat_map(|s| {
                s.baseline_voltages
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != self.slack.value())
                    .map(|(_, v)| *v)
            })
            .reduce(f64::min);

        SummaryMetrics {
            steps: self.steps.len(),
            solved_steps: count(StepStatus::Solved),
            relaxed_steps: count(StepStatus::Relaxed),
            failed_steps: count(StepStatus::Failed),
            skipped_batteries: self.skipped.len(),
            total_losses_kwh,
            baseline_losses_kwh,
            loss_reduction_kwh,
            loss_reduction_pct,
            min_voltage: self.extreme(|v, cur| v < cur),
            max_voltage: self.extreme(|v, cur| v > cur),
            baseline_min_voltage_pu,
            voltage_violations: self.steps.iter().map(|s| self.violations(&s.voltages)).sum(),
            baseline_voltage_violations: self
                .steps
                .iter()
                .map(|s| self.violations(&s.baseline_voltages))
                .sum(),
            battery_throughput_kwh: throughput,
            battery_net_energy_kwh: net_energy,
            customer_bill_impact: tariff.retail_price_per_kwh * net_energy,
            utility_cost_impact: tariff.energy_cost_per_kwh * (total_losses_kwh - baseline_losses_kwh),
        }
    }
}
