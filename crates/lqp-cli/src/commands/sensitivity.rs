use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, Result};
use lqp_algo::LinDistFlow;
use lqp_io::load_any;
use tabwriter::TabWriter;

use super::log_diagnostics;

/// Print `∂v²/∂p` and `∂v²/∂q` for one bus against every injection bus, or
/// the self-sensitivities of every bus.
pub fn handle(feeder: &Path, bus: Option<&str>) -> Result<()> {
    let import = load_any(feeder)?;
    log_diagnostics(&import.diagnostics);
    let network = &import.network;
    let ldf = LinDistFlow::build(network)?;
    let name = |col: usize| network.bus(ldf.columns()[col]).name.as_str();

    let mut writer = TabWriter::new(io::stdout());
    match bus {
        Some(bus) => {
            let id = network
                .bus_by_name(bus)
                .ok_or_else(|| anyhow!("bus '{}' not found in {}", bus, feeder.display()))?;
            let row = ldf
                .column(id)
                .ok_or_else(|| anyhow!("'{}' is the slack bus; its voltage is fixed", bus))?;
            println!("Sensitivity of v²({}) per p.u. injection:", bus);
            writeln!(writer, "BUS\tdV2/dP\tdV2/dQ")?;
            for k in 0..ldf.dim() {
                writeln!(writer, "{}\t{:.6}\t{:.6}", name(k), ldf.a(row, k), ldf.b(row, k))?;
            }
        }
        None => {
            writeln!(writer, "BUS\tDEPTH\tA_jj\tB_jj")?;
            for (j, &id) in ldf.columns().iter().enumerate() {
                writeln!(
                    writer,
                    "{}\t{}\t{:.6}\t{:.6}",
                    name(j),
                    network.depth(id),
                    ldf.a(j, j),
                    ldf.b(j, j)
                )?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
