//! # lqp-core: radial feeder model
//!
//! Data structures shared by the lqp crates: the bus/line arena of a radial
//! distribution feeder, battery state, unit newtypes and the error taxonomy.
//!
//! ## Arena layout
//!
//! A [`Network`] owns a `Vec<Bus>` and a `Vec<Line>`; [`BusId`] and
//! [`LineId`] index into them. Each bus stores its parent line and child
//! lines, so upstream and downstream walks are plain index chasing. Topology
//! is fixed at [`NetworkBuilder::build`]; afterwards only battery state can
//! change, through [`Network::battery_mut`].
//!
//! ```
//! use lqp_core::*;
//!
//! let base = SystemBase::new(KilovoltAmperes(1000.0), Kilovolts(4.16));
//! let network = NetworkBuilder::new("demo", base, "sub")
//!     .bus(BusSpec::new("sub"))
//!     .bus(BusSpec::new("house").with_battery(
//!         BatteryState::new("bess", KilowattHours(13.5), Kilowatts(5.0), KilovoltAmperes(5.0)),
//!     ))
//!     .line(LineSpec::new("house", "sub", 0.01, 0.02))
//!     .build()
//!     .unwrap();
//!
//! let house = network.bus_by_name("house").unwrap();
//! assert_eq!(network.parent(house), Some(network.slack()));
//! assert_eq!(network.batteries().count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod diagnostics;
pub mod error;
pub mod three_phase;
pub mod topology;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{
    InfeasibilityError, InfeasibleBatteryStateError, LqpError, LqpResult, SolverNumericalError,
    TopologyError,
};
pub use units::{Kilovars, KilovoltAmperes, Kilovolts, KilowattHours, Kilowatts, PerUnit};

use topology::{Edge, RadialTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(usize);

impl BusId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BusId(value)
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl LineId {
    #[inline]
    pub fn new(value: usize) -> Self {
        LineId(value)
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub base_kv: Kilovolts,
    pub parent_line: Option<LineId>,
    pub child_lines: Vec<LineId>,
    pub vmin_pu: Option<PerUnit>,
    pub vmax_pu: Option<PerUnit>,
    pub battery: Option<BatteryState>,
}

/// Series branch oriented parent (`from`) to child (`to`).
#[derive(Debug, Clone)]
pub struct Line {
    pub id: LineId,
    pub name: String,
    pub from: BusId,
    pub to: BusId,
    pub resistance_pu: f64,
    pub reactance_pu: f64,
    pub rating: Option<KilovoltAmperes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemBase {
    pub s_base: KilovoltAmperes,
    pub v_base: Kilovolts,
}

impl SystemBase {
    pub fn new(s_base: KilovoltAmperes, v_base: Kilovolts) -> Self {
        Self { s_base, v_base }
    }

    pub fn z_base_ohms(&self) -> f64 {
        self.v_base.impedance_base_ohms(self.s_base)
    }
}

/// Behind-the-meter storage at one bus.
///
/// Energy is tracked in kWh. The reserve band is a pair of capacity
/// fractions; dispatch keeps `soc` inside `[soc_min, soc_max]` once it has
/// entered the band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub name: String,
    pub capacity: KilowattHours,
    pub soc: KilowattHours,
    pub soc_min_fraction: f64,
    pub soc_max_fraction: f64,
    pub charge_limit: Kilowatts,
    pub discharge_limit: Kilowatts,
    pub inverter_limit: KilovoltAmperes,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
}

impl BatteryState {
    /// Lossless battery at half charge with symmetric power limits and the
    /// full capacity as its band.
    pub fn new(
        name: impl Into<String>,
        capacity: KilowattHours,
        power_limit: Kilowatts,
        inverter_limit: KilovoltAmperes,
    ) -> Self {
        Self {
            name: name.into(),
            capacity,
            soc: capacity * 0.5,
            soc_min_fraction: 0.0,
            soc_max_fraction: 1.0,
            charge_limit: power_limit,
            discharge_limit: power_limit,
            inverter_limit,
            charge_efficiency: 1.0,
            discharge_efficiency: 1.0,
        }
    }

    pub fn with_soc(mut self, soc: KilowattHours) -> Self {
        self.soc = soc;
        self
    }

    pub fn with_soc_fraction(mut self, fraction: f64) -> Self {
        self.soc = self.capacity * fraction;
        self
    }

    pub fn with_reserve_band(mut self, min_fraction: f64, max_fraction: f64) -> Self {
        self.soc_min_fraction = min_fraction;
        self.soc_max_fraction = max_fraction;
        self
    }

    pub fn with_limits(mut self, charge: Kilowatts, discharge: Kilowatts) -> Self {
        self.charge_limit = charge;
        self.discharge_limit = discharge;
        self
    }

    pub fn with_efficiencies(mut self, charge: f64, discharge: f64) -> Self {
        self.charge_efficiency = charge;
        self.discharge_efficiency = discharge;
        self
    }

    /// Split a round-trip efficiency evenly between charge and discharge.
    pub fn with_round_trip_efficiency(self, round_trip: f64) -> Self {
        let leg = round_trip.sqrt();
        self.with_efficiencies(leg, leg)
    }

    pub fn round_trip_efficiency(&self) -> f64 {
        self.charge_efficiency * self.discharge_efficiency
    }

    pub fn soc_min(&self) -> KilowattHours {
        self.capacity * self.soc_min_fraction
    }

    pub fn soc_max(&self) -> KilowattHours {
        self.capacity * self.soc_max_fraction
    }

    pub fn soc_fraction(&self) -> f64 {
        if self.capacity.value() > 0.0 {
            self.soc / self.capacity
        } else {
            0.0
        }
    }
}

/// Radial feeder arena. Built by [`NetworkBuilder`].
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    base: SystemBase,
    buses: Vec<Bus>,
    lines: Vec<Line>,
    slack: BusId,
    slack_voltage: PerUnit,
    tree: RadialTree,
    by_name: HashMap<String, BusId>,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> SystemBase {
        self.base
    }

    pub fn slack(&self) -> BusId {
        self.slack
    }

    pub fn slack_voltage(&self) -> PerUnit {
        self.slack_voltage
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn bus(&self, id: BusId) -> &Bus {
        &self.buses[id.0]
    }

    pub fn line(&self, id: LineId) -> &Line {
        &self.lines[id.0]
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn bus_by_name(&self, name: &str) -> Option<BusId> {
        self.by_name.get(name).copied()
    }

    /// Buses in breadth-first order from the slack (slack first).
    pub fn bfs_order(&self) -> impl Iterator<Item = BusId> + '_ {
        self.tree.order.iter().map(|&i| BusId(i))
    }

    pub fn parent(&self, bus: BusId) -> Option<BusId> {
        self.tree.parent[bus.0].map(BusId)
    }

    pub fn children(&self, bus: BusId) -> impl Iterator<Item = BusId> + '_ {
        self.buses[bus.0]
            .child_lines
            .iter()
            .map(move |l| self.lines[l.0].to)
    }

    pub fn depth(&self, bus: BusId) -> usize {
        self.tree.depth[bus.0]
    }

    /// `true` when `bus` is `root` or lies downstream of it.
    pub fn in_subtree(&self, root: BusId, bus: BusId) -> bool {
        self.tree.in_subtree(root.0, bus.0)
    }

    /// Lines from the slack down to `bus`, slack side first.
    pub fn path_from_slack(&self, bus: BusId) -> Vec<LineId> {
        let mut path = Vec::with_capacity(self.depth(bus));
        let mut cursor = bus;
        while let Some(line) = self.buses[cursor.0].parent_line {
            path.push(line);
            cursor = self.lines[line.0].from;
        }
        path.reverse();
        path
    }

    pub fn batteries(&self) -> impl Iterator<Item = (BusId, &BatteryState)> {
        self.buses
            .iter()
            .filter_map(|b| b.battery.as_ref().map(|bat| (b.id, bat)))
    }

    pub fn battery_mut(&mut self, bus: BusId) -> Option<&mut BatteryState> {
        self.buses.get_mut(bus.0).and_then(|b| b.battery.as_mut())
    }

    /// Effective voltage limits for a bus, falling back to `default`.
    pub fn voltage_limits(&self, bus: BusId, default: (PerUnit, PerUnit)) -> (PerUnit, PerUnit) {
        let b = &self.buses[bus.0];
        (
            b.vmin_pu.unwrap_or(default.0),
            b.vmax_pu.unwrap_or(default.1),
        )
    }

    /// Structural warnings that do not prevent a study from running.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        for line in &self.lines {
            if line.resistance_pu < 0.0 || line.reactance_pu < 0.0 {
                diag.add_error_with_entity("physical", "negative series impedance", &line.name);
            } else if line.resistance_pu == 0.0 && line.reactance_pu == 0.0 {
                diag.add_warning_with_entity("physical", "zero-impedance line", &line.name);
            }
        }
        for bus in &self.buses {
            if let (Some(lo), Some(hi)) = (bus.vmin_pu, bus.vmax_pu) {
                if lo > hi {
                    diag.add_error_with_entity("validation", "vmin above vmax", &bus.name);
                }
            }
        }
        if self.batteries().next().is_none() {
            diag.add_warning("structure", "network has no batteries");
        }
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            num_buses: self.buses.len(),
            num_lines: self.lines.len(),
            num_batteries: self.batteries().count(),
            max_depth: self.tree.depth.iter().copied().max().unwrap_or(0),
            total_capacity: self.batteries().map(|(_, b)| b.capacity).sum(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_lines: usize,
    pub num_batteries: usize,
    pub max_depth: usize,
    pub total_capacity: KilowattHours,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses, {} lines, {} batteries ({}), depth {}",
            self.num_buses, self.num_lines, self.num_batteries, self.total_capacity, self.max_depth
        )
    }
}

#[derive(Debug, Clone)]
pub struct BusSpec {
    pub name: String,
    pub base_kv: Option<Kilovolts>,
    pub vmin_pu: Option<PerUnit>,
    pub vmax_pu: Option<PerUnit>,
    pub battery: Option<BatteryState>,
}

impl BusSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_kv: None,
            vmin_pu: None,
            vmax_pu: None,
            battery: None,
        }
    }

    pub fn with_base_kv(mut self, kv: Kilovolts) -> Self {
        self.base_kv = Some(kv);
        self
    }

    pub fn with_limits(mut self, vmin: PerUnit, vmax: PerUnit) -> Self {
        self.vmin_pu = Some(vmin);
        self.vmax_pu = Some(vmax);
        self
    }

    pub fn with_battery(mut self, battery: BatteryState) -> Self {
        self.battery = Some(battery);
        self
    }
}

/// Line between two named buses, in either direction.
#[derive(Debug, Clone)]
pub struct LineSpec {
    pub name: String,
    pub a: String,
    pub b: String,
    pub resistance_pu: f64,
    pub reactance_pu: f64,
    pub rating: Option<KilovoltAmperes>,
}

impl LineSpec {
    pub fn new(a: impl Into<String>, b: impl Into<String>, r_pu: f64, x_pu: f64) -> Self {
        let a = a.into();
        let b = b.into();
        Self {
            name: format!("{}-{}", a, b),
            a,
            b,
            resistance_pu: r_pu,
            reactance_pu: x_pu,
            rating: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rating(mut self, rating: KilovoltAmperes) -> Self {
        self.rating = Some(rating);
        self
    }
}

pub struct NetworkBuilder {
    name: String,
    base: SystemBase,
    slack: String,
    slack_voltage: PerUnit,
    buses: Vec<BusSpec>,
    lines: Vec<LineSpec>,
}

impl NetworkBuilder {
    pub fn new(name: impl Into<String>, base: SystemBase, slack: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base,
            slack: slack.into(),
            slack_voltage: PerUnit::ONE,
            buses: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn slack_voltage(mut self, v: PerUnit) -> Self {
        self.slack_voltage = v;
        self
    }

    pub fn bus(mut self, spec: BusSpec) -> Self {
        self.buses.push(spec);
        self
    }

    pub fn line(mut self, spec: LineSpec) -> Self {
        self.lines.push(spec);
        self
    }

    pub fn add_bus(&mut self, spec: BusSpec) {
        self.buses.push(spec);
    }

    pub fn add_line(&mut self, spec: LineSpec) {
        self.lines.push(spec);
    }

    /// Validate radiality and orient every line away from the slack.
    pub fn build(self) -> Result<Network, TopologyError> {
        if self.buses.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut by_name = HashMap::with_capacity(self.buses.len());
        for (i, spec) in self.buses.iter().enumerate() {
            if by_name.insert(spec.name.clone(), BusId(i)).is_some() {
                return Err(TopologyError::DuplicateBus(spec.name.clone()));
            }
        }
        let slack = *by_name
            .get(&self.slack)
            .ok_or_else(|| TopologyError::MissingSlack(self.slack.clone()))?;

        let lookup = |line: &LineSpec, bus: &str| -> Result<usize, TopologyError> {
            by_name
                .get(bus)
                .map(|id| id.0)
                .ok_or_else(|| TopologyError::UnknownBus {
                    line: line.name.clone(),
                    bus: bus.to_string(),
                })
        };
        let mut ends = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            ends.push((lookup(line, &line.a)?, lookup(line, &line.b)?));
        }

        let names: Vec<String> = self.buses.iter().map(|b| b.name.clone()).collect();
        let edges: Vec<Edge<'_>> = self
            .lines
            .iter()
            .zip(&ends)
            .map(|(l, &(a, b))| Edge {
                a,
                b,
                name: &l.name,
            })
            .collect();
        let tree = topology::radial_tree(&names, slack.0, &edges)?;

        let mut buses: Vec<Bus> = self
            .buses
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Bus {
                id: BusId(i),
                name: spec.name,
                base_kv: spec.base_kv.unwrap_or(self.base.v_base),
                parent_line: None,
                child_lines: Vec::new(),
                vmin_pu: spec.vmin_pu,
                vmax_pu: spec.vmax_pu,
                battery: spec.battery,
            })
            .collect();

        let mut lines: Vec<Line> = self
            .lines
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Line {
                id: LineId(i),
                name: spec.name,
                from: BusId(ends[i].0),
                to: BusId(ends[i].1),
                resistance_pu: spec.resistance_pu,
                reactance_pu: spec.reactance_pu,
                rating: spec.rating,
            })
            .collect();

        for &bus in &tree.order {
            if let (Some(edge), Some(parent)) = (tree.parent_edge[bus], tree.parent[bus]) {
                lines[edge].from = BusId(parent);
                lines[edge].to = BusId(bus);
                buses[bus].parent_line = Some(LineId(edge));
                buses[parent].child_lines.push(LineId(edge));
            }
        }

        Ok(Network {
            name: self.name,
            base: self.base,
            buses,
            lines,
            slack,
            slack_voltage: self.slack_voltage,
            tree,
            by_name,
        })
    }
}
