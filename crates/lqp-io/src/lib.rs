//! # lqp-io: feeder import
//!
//! Two JSON layouts are supported:
//!
//! | Format | Module | Produces |
//! |--------|--------|----------|
//! | Native feeder | [`feeder`] | [`lqp_core::Network`] with batteries and optional static loads |
//! | OpenDSS export | [`dss_json`] | three-phase feeder, positive-sequence `Network`, static loads |
//!
//! Both importers return the network together with a
//! [`lqp_core::Diagnostics`] describing anything that was skipped or
//! defaulted. Radiality violations surface as
//! [`lqp_core::TopologyError`] inside the returned `anyhow::Error`.

use std::path::Path;

use lqp_core::{BusId, Diagnostics, Kilovars, Kilowatts, Network};

pub mod dss_json;
pub mod feeder;

pub use dss_json::{load_dss_json, parse_dss_json, DssImport};
pub use feeder::{load_feeder, parse_feeder};

/// Constant load attached to a bus, consumption positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticLoad {
    pub bus: BusId,
    pub p: Kilowatts,
    pub q: Kilovars,
}

/// Imported network plus everything the importer learned along the way.
#[derive(Debug)]
pub struct FeederImport {
    pub network: Network,
    pub static_loads: Vec<StaticLoad>,
    pub diagnostics: Diagnostics,
}

impl FeederImport {
    pub fn static_load_tuples(&self) -> Vec<(BusId, Kilowatts, Kilovars)> {
        self.static_loads.iter().map(|l| (l.bus, l.p, l.q)).collect()
    }
}

/// Load either format, choosing by content: a top-level `nodes` array marks
/// the OpenDSS export.
pub fn load_any(path: &Path) -> anyhow::Result<FeederImport> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading feeder {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing feeder {}", path.display()))?;
    if value.get("nodes").is_some() {
        let import = parse_dss_json(&text)
            .with_context(|| format!("importing OpenDSS export {}", path.display()))?;
        Ok(import.into_feeder_import())
    } else {
        parse_feeder(&text).with_context(|| format!("importing feeder {}", path.display()))
    }
}
