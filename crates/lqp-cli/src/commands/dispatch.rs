use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use lqp_algo::export::export_all;
use lqp_algo::DispatchSolver;
use lqp_cli::{HorizonArg, RunConfig};
use lqp_io::load_any;
use lqp_ts::{read_profiles, ProfileSet};
use tabwriter::TabWriter;
use tracing::{info, warn};

use super::log_diagnostics;

#[derive(Debug)]
pub struct DispatchOptions {
    pub feeder: PathBuf,
    pub config: PathBuf,
    pub load: Option<PathBuf>,
    pub pv: Option<PathBuf>,
    pub steps: usize,
    pub dt_hours: f64,
    pub horizon: Option<HorizonArg>,
    pub window: Option<usize>,
    pub out: PathBuf,
}

pub fn handle(opts: &DispatchOptions) -> Result<()> {
    let import = load_any(&opts.feeder)?;
    log_diagnostics(&import.diagnostics);

    let mut run = RunConfig::load_from(&opts.config)?;
    if let Some(horizon) = opts.horizon {
        run.dispatch.horizon.mode = horizon.into();
    }
    if let Some(window) = opts.window {
        run.dispatch.horizon.window_steps = window;
    }
    run.dispatch.validate().context("applying command-line overrides")?;

    let mut network = import.network.clone();
    let profiles = match (&opts.load, &opts.pv) {
        (Some(load), pv) => read_profiles(load, pv.as_deref(), &network, opts.dt_hours)?,
        (None, Some(_)) => bail!("--pv needs a --load profile to align with"),
        (None, None) => {
            info!(
                steps = opts.steps,
                loads = import.static_loads.len(),
                "no load profile given; holding the feeder's static loads"
            );
            ProfileSet::constant(&network, opts.steps, opts.dt_hours, &import.static_load_tuples())?
        }
    };

    info!(
        feeder = network.name(),
        stats = %network.stats(),
        steps = profiles.len(),
        dt_hours = profiles.dt_hours(),
        "running dispatch"
    );
    let solver = DispatchSolver::new(&network, run.dispatch.clone())?;
    let results = solver.run(&mut network, &profiles)?;

    let failed = results.failed_steps().count();
    if failed > 0 {
        warn!(failed, steps = results.len(), "some timesteps failed; batteries idled there");
    }

    let written = export_all(&results, &run.tariff, &opts.out)?;
    let summary = results.summary(&run.tariff);

    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "METRIC\tVALUE")?;
    for (key, value) in summary.to_key_values() {
        writeln!(writer, "{}\t{}", key, value)?;
    }
    writer.flush()?;

    println!("Wrote {} file(s) to {}", written.len(), opts.out.display());
    Ok(())
}
