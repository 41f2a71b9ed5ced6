//! Native feeder JSON.
//!
//! ```json
//! {
//!   "name": "two-house",
//!   "base": { "s_base_kva": 1000.0, "v_base_kv": 4.16 },
//!   "slack": { "bus": "sub", "voltage_pu": 1.0 },
//!   "buses": [ { "name": "sub" }, { "name": "h1", "vmin_pu": 0.95 } ],
//!   "lines": [ { "from": "sub", "to": "h1", "r_ohm": 0.35, "x_ohm": 0.7 } ],
//!   "batteries": [ { "bus": "h1", "capacity_kwh": 13.5, "power_kw": 5.0 } ],
//!   "loads": [ { "bus": "h1", "p_kw": 3.0, "q_kvar": 1.0 } ]
//! }
//! ```
//!
//! Line impedances may be given in per-unit (`r_pu`/`x_pu`) or in ohms
//! (`r_ohm`/`x_ohm`), which are converted on the system impedance base.
//! Battery parameters are copied as-is; whether they make sense is checked by
//! the dispatch layer so that a bad battery can be skipped rather than
//! failing the whole import.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use lqp_core::{
    BatteryState, BusSpec, Diagnostics, KilovoltAmperes, Kilovolts, KilowattHours, Kilowatts,
    Kilovars, LineSpec, NetworkBuilder, PerUnit, SystemBase,
};
use serde::{Deserialize, Serialize};

use crate::{FeederImport, StaticLoad};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederFile {
    #[serde(default = "default_name")]
    pub name: String,
    pub base: BaseSpec,
    pub slack: SlackSpec,
    pub buses: Vec<BusEntry>,
    #[serde(default)]
    pub lines: Vec<LineEntry>,
    #[serde(default)]
    pub batteries: Vec<BatteryEntry>,
    #[serde(default)]
    pub loads: Vec<LoadEntry>,
}

fn default_name() -> String {
    "feeder".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseSpec {
    pub s_base_kva: f64,
    pub v_base_kv: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSpec {
    pub bus: String,
    #[serde(default = "one")]
    pub voltage_pu: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEntry {
    pub name: String,
    pub base_kv: Option<f64>,
    pub vmin_pu: Option<f64>,
    pub vmax_pu: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineEntry {
    pub name: Option<String>,
    pub from: String,
    pub to: String,
    pub r_pu: Option<f64>,
    pub x_pu: Option<f64>,
    pub r_ohm: Option<f64>,
    pub x_ohm: Option<f64>,
    pub rating_kva: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryEntry {
    pub name: Option<String>,
    pub bus: String,
    pub capacity_kwh: f64,
    #[serde(default = "half")]
    pub initial_soc_fraction: f64,
    /// Shorthand for equal charge and discharge limits.
    pub power_kw: Option<f64>,
    pub charge_limit_kw: Option<f64>,
    pub discharge_limit_kw: Option<f64>,
    pub inverter_kva: Option<f64>,
    pub charge_efficiency: Option<f64>,
    pub discharge_efficiency: Option<f64>,
    pub round_trip_efficiency: Option<f64>,
    #[serde(default)]
    pub soc_min_fraction: f64,
    #[serde(default = "one")]
    pub soc_max_fraction: f64,
}

fn half() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadEntry {
    pub bus: String,
    pub p_kw: f64,
    #[serde(default)]
    pub q_kvar: f64,
}

pub fn load_feeder(path: &Path) -> Result<FeederImport> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading feeder {}", path.display()))?;
    parse_feeder(&text).with_context(|| format!("importing feeder {}", path.display()))
}

pub fn parse_feeder(text: &str) -> Result<FeederImport> {
    let file: FeederFile = serde_json::from_str(text).context("parsing feeder JSON")?;
    build_feeder(file)
}

pub fn build_feeder(file: FeederFile) -> Result<FeederImport> {
    if file.base.s_base_kva <= 0.0 || file.base.v_base_kv <= 0.0 {
        bail!(
            "system base must be positive (s_base_kva={}, v_base_kv={})",
            file.base.s_base_kva,
            file.base.v_base_kv
        );
    }
    let base = SystemBase::new(
        KilovoltAmperes(file.base.s_base_kva),
        Kilovolts(file.base.v_base_kv),
    );
    let z_base = base.z_base_ohms();
    let mut diagnostics = Diagnostics::new();

    let mut batteries: Vec<Option<BatteryState>> = vec![None; file.buses.len()];
    for (i, entry) in file.batteries.iter().enumerate() {
        let slot = file
            .buses
            .iter()
            .position(|b| b.name == entry.bus)
            .ok_or_else(|| anyhow!("battery #{} references unknown bus '{}'", i, entry.bus))?;
        if batteries[slot].is_some() {
            bail!("bus '{}' has more than one battery", entry.bus);
        }
        batteries[slot] = Some(battery_from_entry(entry, &mut diagnostics)?);
    }

    let mut builder = NetworkBuilder::new(&file.name, base, &file.slack.bus)
        .slack_voltage(PerUnit(file.slack.voltage_pu));

    for (entry, battery) in file.buses.iter().zip(batteries) {
        let mut spec = BusSpec::new(&entry.name);
        if let Some(kv) = entry.base_kv {
            spec = spec.with_base_kv(Kilovolts(kv));
        }
        spec.vmin_pu = entry.vmin_pu.map(PerUnit);
        spec.vmax_pu = entry.vmax_pu.map(PerUnit);
        spec.battery = battery;
        builder.add_bus(spec);
    }

    for entry in &file.lines {
        let (r, x) = line_impedance(entry, z_base)?;
        let mut spec = LineSpec::new(&entry.from, &entry.to, r, x);
        if let Some(name) = &entry.name {
            spec = spec.named(name);
        }
        if let Some(rating) = entry.rating_kva {
            spec = spec.with_rating(KilovoltAmperes(rating));
        }
        builder.add_line(spec);
    }

    let network = builder.build().context("building feeder topology")?;

    let mut static_loads = Vec::with_capacity(file.loads.len());
    for load in &file.loads {
        match network.bus_by_name(&load.bus) {
            Some(bus) => static_loads.push(StaticLoad {
                bus,
                p: Kilowatts(load.p_kw),
                q: Kilovars(load.q_kvar),
            }),
            None => diagnostics.add_warning_with_entity(
                "reference",
                "load on unknown bus skipped",
                &load.bus,
            ),
        }
    }

    network.validate_into(&mut diagnostics);

    Ok(FeederImport {
        network,
        static_loads,
        diagnostics,
    })
}

fn line_impedance(entry: &LineEntry, z_base: f64) -> Result<(f64, f64)> {
    let label = entry
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-{}", entry.from, entry.to));
    match (entry.r_pu, entry.x_pu, entry.r_ohm, entry.x_ohm) {
        (Some(r), Some(x), None, None) => Ok((r, x)),
        (None, None, Some(r), Some(x)) => Ok((r / z_base, x / z_base)),
        (None, None, None, None) => bail!("line '{}' has no impedance", label),
        _ => bail!(
            "line '{}' must give either r_pu/x_pu or r_ohm/x_ohm, not a mix",
            label
        ),
    }
}

fn battery_from_entry(entry: &BatteryEntry, diag: &mut Diagnostics) -> Result<BatteryState> {
    let charge = entry
        .charge_limit_kw
        .or(entry.power_kw)
        .ok_or_else(|| anyhow!("battery at '{}' needs power_kw or charge_limit_kw", entry.bus))?;
    let discharge = entry.discharge_limit_kw.or(entry.power_kw).unwrap_or(charge);
    let inverter = match entry.inverter_kva {
        Some(kva) => kva,
        None => {
            diag.add_warning_with_entity(
                "battery",
                "inverter_kva missing, using the larger power limit",
                &entry.bus,
            );
            charge.max(discharge)
        }
    };

    let name = entry
        .name
        .clone()
        .unwrap_or_else(|| format!("bess-{}", entry.bus));
    let mut battery = BatteryState::new(
        name,
        KilowattHours(entry.capacity_kwh),
        Kilowatts(charge),
        KilovoltAmperes(inverter),
    )
    .with_limits(Kilowatts(charge), Kilowatts(discharge))
    .with_soc_fraction(entry.initial_soc_fraction)
    .with_reserve_band(entry.soc_min_fraction, entry.soc_max_fraction);

    battery = match (
        entry.charge_efficiency,
        entry.discharge_efficiency,
        entry.round_trip_efficiency,
    ) {
        (None, None, Some(rt)) => battery.with_round_trip_efficiency(rt),
        (c, d, None) => battery.with_efficiencies(c.unwrap_or(1.0), d.unwrap_or(1.0)),
        (_, _, Some(_)) => bail!(
            "battery at '{}' gives both leg and round-trip efficiencies",
            entry.bus
        ),
    };
    Ok(battery)
}
