use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use lqp_algo::battery;
use lqp_io::load_any;
use tabwriter::TabWriter;

/// Load a feeder, report structural issues and check each battery.
///
/// Topology errors (loops, unreachable buses) fail the import itself.
pub fn handle(feeder: &Path) -> Result<()> {
    let import = load_any(feeder).context("feeder failed validation")?;
    let mut diag = import.diagnostics.clone();
    let network = &import.network;

    for (bus, state) in network.batteries() {
        let bus_name = &network.bus(bus).name;
        if let Err(err) = battery::validate(state, bus_name) {
            diag.add_error_with_entity("battery", &err.reason, &state.name);
        } else if bus == network.slack() {
            diag.add_error_with_entity("battery", "battery on the slack bus", &state.name);
        }
    }

    println!("{}: {}", network.name(), network.stats());
    if diag.has_issues() {
        let mut writer = TabWriter::new(io::stdout());
        writeln!(writer, "SEVERITY\tCATEGORY\tENTITY\tMESSAGE")?;
        for issue in diag.errors().chain(diag.warnings()) {
            writeln!(
                writer,
                "{:?}\t{}\t{}\t{}",
                issue.severity,
                issue.category,
                issue.entity.as_deref().unwrap_or("-"),
                issue.message
            )?;
        }
        writer.flush()?;
    }
    println!("{}", diag.summary());

    if diag.has_errors() {
        bail!("{} has {}", feeder.display(), diag.summary());
    }
    Ok(())
}
