use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use lqp_algo::LinDist3Flow;
use lqp_io::load_dss_json;
use tabwriter::TabWriter;
use tracing::info;

use super::log_diagnostics;

pub fn handle(feeder: &Path, json: bool) -> Result<()> {
    let import = load_dss_json(feeder)?;
    log_diagnostics(&import.diagnostics);

    let sweep = LinDist3Flow::new(&import.feeder);
    let result = sweep.solve();
    let nodes = import.feeder.nodes();
    info!(
        nodes = nodes.len(),
        min_voltage_pu = result.min_voltage(),
        "three-phase sweep finished"
    );

    if json {
        let voltages: BTreeMap<&str, [f64; 3]> = nodes
            .iter()
            .zip(&result.voltage)
            .map(|(name, v)| (name.as_str(), *v))
            .collect();
        println!("{}", serde_json::to_string_pretty(&voltages)?);
        return Ok(());
    }

    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "NODE\tVA\tVB\tVC")?;
    for &node in &import.feeder.tree().order {
        let v = result.voltage[node];
        writeln!(writer, "{}\t{:.5}\t{:.5}\t{:.5}", nodes[node], v[0], v[1], v[2])?;
    }
    writer.flush()?;
    Ok(())
}
