//! JSON exported from an OpenDSS circuit.
//!
//! Layout:
//!
//! ```json
//! {
//!   "nodes": ["632", "671", "rg60"],
//!   "general": { "s_base_mva": 1.0, "v_base_kv_ll": 4.16 },
//!   "lines": [ { "name": "650632", "from": "rg60", "to": "632", "length": 2000.0,
//!                "r_matrix": [[...],[...],[...]], "x_matrix": [[...],[...],[...]] } ],
//!   "loads": [ { "bus": "671", "p_load": [385.0, 385.0, 385.0], "q_load": [220.0, 220.0, 220.0] } ]
//! }
//! ```
//!
//! `r_matrix`/`x_matrix` are 3×3 totals in ohms (already multiplied by the
//! line length); loads are per phase in kW/kvar. Node names are compared
//! case-insensitively, as OpenDSS does.
//!
//! The three-phase feeder uses per-phase per-unit (phase base `S/3`, same
//! impedance base), so a balanced feeder gives the same voltages as the
//! positive-sequence network built alongside it.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use lqp_core::three_phase::{PhaseLine, PhaseMatrix, ThreePhaseFeeder};
use lqp_core::{
    BusSpec, Diagnostics, KilovoltAmperes, Kilovolts, Kilowatts, Kilovars, LineSpec, Network,
    NetworkBuilder, SystemBase,
};
use serde::Deserialize;

use crate::{FeederImport, StaticLoad};

/// Preferred reference buses, in order.
pub const ROOT_CANDIDATES: [&str; 4] = ["sourcebus", "source", "650", "rg60"];

#[derive(Debug, Deserialize)]
struct DssJson {
    nodes: Vec<String>,
    general: General,
    #[serde(default)]
    lines: Vec<DssLine>,
    #[serde(default)]
    loads: Vec<DssLoad>,
}

#[derive(Debug, Deserialize)]
struct General {
    s_base_mva: f64,
    v_base_kv_ll: f64,
}

#[derive(Debug, Deserialize)]
struct DssLine {
    name: String,
    from: String,
    to: String,
    r_matrix: PhaseMatrix,
    x_matrix: PhaseMatrix,
}

#[derive(Debug, Deserialize)]
struct DssLoad {
    bus: String,
    p_load: [f64; 3],
    q_load: [f64; 3],
}

#[derive(Debug)]
pub struct DssImport {
    pub feeder: ThreePhaseFeeder,
    pub network: Network,
    pub static_loads: Vec<StaticLoad>,
    pub diagnostics: Diagnostics,
}

impl DssImport {
    pub fn into_feeder_import(self) -> FeederImport {
        FeederImport {
            network: self.network,
            static_loads: self.static_loads,
            diagnostics: self.diagnostics,
        }
    }
}

pub fn load_dss_json(path: &Path) -> Result<DssImport> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_dss_json(&text).with_context(|| format!("importing OpenDSS export {}", path.display()))
}

pub fn parse_dss_json(text: &str) -> Result<DssImport> {
    let data: DssJson = serde_json::from_str(text).context("parsing OpenDSS JSON")?;
    if data.nodes.is_empty() {
        bail!("OpenDSS export has no nodes");
    }
    if data.general.s_base_mva <= 0.0 || data.general.v_base_kv_ll <= 0.0 {
        bail!("OpenDSS export has a non-positive base");
    }

    let mut diagnostics = Diagnostics::new();
    let nodes: Vec<String> = data.nodes.iter().map(|n| n.to_lowercase()).collect();
    let root = pick_root(&nodes, &mut diagnostics);

    let base = SystemBase::new(
        KilovoltAmperes(data.general.s_base_mva * 1000.0),
        Kilovolts(data.general.v_base_kv_ll),
    );
    let z_base = base.z_base_ohms();
    // per-phase quantities live on a per-phase base of S/3
    let phase_base_kw = base.s_base.value() / 3.0;

    let index_of = |name: &str| nodes.iter().position(|n| n == &name.to_lowercase());

    let mut phase_lines = Vec::with_capacity(data.lines.len());
    for line in &data.lines {
        let (Some(from), Some(to)) = (index_of(&line.from), index_of(&line.to)) else {
            diagnostics.add_warning_with_entity(
                "reference",
                "line references a node outside the node list, skipped",
                &line.name,
            );
            continue;
        };
        phase_lines.push(PhaseLine {
            name: line.name.clone(),
            from,
            to,
            r: scale(&line.r_matrix, 1.0 / z_base),
            x: scale(&line.x_matrix, 1.0 / z_base),
        });
    }

    let mut feeder = ThreePhaseFeeder::new(nodes.clone(), root, phase_lines.clone())
        .context("building three-phase topology")?;

    let mut builder = NetworkBuilder::new("opendss", base, &nodes[root]);
    for name in &nodes {
        builder.add_bus(BusSpec::new(name));
    }
    for line in &phase_lines {
        let r1 = positive_sequence(&line.r);
        let x1 = positive_sequence(&line.x);
        if r1 <= 0.0 && x1 <= 0.0 {
            diagnostics.add_warning_with_entity(
                "physical",
                "line has no positive-sequence impedance",
                &line.name,
            );
        }
        builder.add_line(
            LineSpec::new(&nodes[line.from], &nodes[line.to], r1, x1).named(&line.name),
        );
    }
    let network = builder.build().context("building positive-sequence network")?;

    let mut static_loads = Vec::new();
    for load in &data.loads {
        let Some(node) = index_of(&load.bus) else {
            diagnostics.add_warning_with_entity(
                "reference",
                "load on a node outside the network, skipped",
                &load.bus,
            );
            continue;
        };
        let p_pu = load.p_load.map(|p| p / phase_base_kw);
        let q_pu = load.q_load.map(|q| q / phase_base_kw);
        feeder.add_load(node, p_pu, q_pu);

        if let Some(bus) = network.bus_by_name(&nodes[node]) {
            static_loads.push(StaticLoad {
                bus,
                p: Kilowatts(load.p_load.iter().sum()),
                q: Kilovars(load.q_load.iter().sum()),
            });
        }
    }

    Ok(DssImport {
        feeder,
        network,
        static_loads,
        diagnostics,
    })
}

fn pick_root(nodes: &[String], diag: &mut Diagnostics) -> usize {
    for candidate in ROOT_CANDIDATES {
        if let Some(i) = nodes.iter().position(|n| n == candidate) {
            return i;
        }
    }
    diag.add_warning_with_entity(
        "reference",
        "no known source bus found, using the first node as reference",
        &nodes[0],
    );
    0
}

fn scale(m: &PhaseMatrix, k: f64) -> PhaseMatrix {
    m.map(|row| row.map(|v| v * k))
}

/// `z1 = z_self - z_mutual`, averaged over the phases that are present
/// (non-zero diagonal).
pub fn positive_sequence(m: &PhaseMatrix) -> f64 {
    let active: Vec<usize> = (0..3).filter(|&i| m[i][i] != 0.0).collect();
    if active.is_empty() {
        return 0.0;
    }
    let self_avg = active.iter().map(|&i| m[i][i]).sum::<f64>() / active.len() as f64;
    let mut mutual = 0.0;
    let mut pairs = 0;
    for &i in &active {
        for &j in &active {
            if i != j {
                mutual += m[i][j];
                pairs += 1;
            }
        }
    }
    let mutual_avg = if pairs > 0 { mutual / pairs as f64 } else { 0.0 };
    self_avg - mutual_avg
}

#[cfg(test)]
mod tests {
    use super::*;
    use lqp_core::TopologyError;

    fn feeder_json(extra_line: &str, root: &str) -> String {
        format!(
            r#"{{
            "nodes": ["{root}", "632", "671", "675"],
            "general": {{ "s_base_mva": 1.0, "v_base_kv_ll": 4.16 }},
            "lines": [
                {{ "name": "L1", "from": "{root}", "to": "632", "length": 1.0,
                   "r_matrix": [[0.6,0.2,0.2],[0.2,0.6,0.2],[0.2,0.2,0.6]],
                   "x_matrix": [[1.2,0.4,0.4],[0.4,1.2,0.4],[0.4,0.4,1.2]] }},
                {{ "name": "L2", "from": "671", "to": "632", "length": 1.0,
                   "r_matrix": [[0.3,0,0],[0,0.3,0],[0,0,0.3]],
                   "x_matrix": [[0.6,0,0],[0,0.6,0],[0,0,0.6]] }},
                {{ "name": "L3", "from": "671", "to": "675", "length": 1.0,
                   "r_matrix": [[0.3,0,0],[0,0,0],[0,0,0]],
                   "x_matrix": [[0.6,0,0],[0,0,0],[0,0,0]] }}
                {extra_line}
            ],
            "loads": [
                {{ "bus": "675", "p_load": [100.0, 0.0, 0.0], "q_load": [50.0, 0.0, 0.0] }},
                {{ "bus": "634", "p_load": [10.0, 10.0, 10.0], "q_load": [1.0, 1.0, 1.0] }}
            ]
        }}"#
        )
    }

    #[test]
    fn imports_feeder_export_layout() {
        let import = parse_dss_json(&feeder_json("", "RG60")).unwrap();
        let net = &import.network;
        assert_eq!(net.bus(net.slack()).name, "rg60");
        assert_eq!(net.bus_count(), 4);

        // z_base = 17.3056 ohm; L1 z1 = (0.6 - 0.2) / 17.3056
        let b632 = net.bus_by_name("632").unwrap();
        let l1 = net.line(net.bus(b632).parent_line.unwrap());
        assert!((l1.resistance_pu - 0.4 / 17.3056).abs() < 1e-12);
        assert!((l1.reactance_pu - 0.8 / 17.3056).abs() < 1e-12);

        // L2 was declared child-to-parent; the builder flips it
        let b671 = net.bus_by_name("671").unwrap();
        assert_eq!(net.parent(b671), Some(b632));

        // single-phase line keeps its diagonal as z1
        let b675 = net.bus_by_name("675").unwrap();
        let l3 = net.line(net.bus(b675).parent_line.unwrap());
        assert!((l3.resistance_pu - 0.3 / 17.3056).abs() < 1e-12);

        assert_eq!(import.static_loads.len(), 1);
        assert_eq!(import.static_loads[0].p, Kilowatts(100.0));
        let node = import.feeder.node_index("675").unwrap();
        // 100 kW on a 1000/3 kVA phase base
        assert!((import.feeder.load_p(node)[0] - 0.3).abs() < 1e-12);

        // load on 634 skipped
        assert_eq!(import.diagnostics.issues_by_category("reference").count(), 1);
    }

    #[test]
    fn skips_dangling_lines_with_warning() {
        let extra = r#", { "name": "L9", "from": "675", "to": "999",
            "r_matrix": [[0.1,0,0],[0,0,0],[0,0,0]], "x_matrix": [[0.1,0,0],[0,0,0],[0,0,0]] }"#;
        let import = parse_dss_json(&feeder_json(extra, "650")).unwrap();
        assert_eq!(import.network.lines().len(), 3);
        assert!(import
            .diagnostics
            .warnings()
            .any(|w| w.entity.as_deref() == Some("L9")));
    }

    #[test]
    fn falls_back_to_first_node() {
        let import = parse_dss_json(&feeder_json("", "head")).unwrap();
        assert_eq!(import.network.bus(import.network.slack()).name, "head");
        assert!(import
            .diagnostics
            .warnings()
            .any(|w| w.message.contains("first node")));
    }

    #[test]
    fn rejects_loops() {
        let extra = r#", { "name": "tie", "from": "675", "to": "650",
            "r_matrix": [[0.1,0,0],[0,0.1,0],[0,0,0.1]], "x_matrix": [[0.1,0,0],[0,0.1,0],[0,0,0.1]] }"#;
        let err = parse_dss_json(&feeder_json(extra, "650")).unwrap_err();
        assert!(err.downcast_ref::<TopologyError>().is_some());
    }

    #[test]
    fn positive_sequence_of_balanced_matrix() {
        let m = [[0.5, 0.1, 0.1], [0.1, 0.5, 0.1], [0.1, 0.1, 0.5]];
        assert!((positive_sequence(&m) - 0.4).abs() < 1e-12);
        assert_eq!(positive_sequence(&[[0.0; 3]; 3]), 0.0);
    }
}
