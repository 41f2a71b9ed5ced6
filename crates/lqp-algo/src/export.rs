//! Tabular export of a dispatch study.
//!
//! | File | Rows |
//! |------|------|
//! | `dispatch.csv` | one per step and battery |
//! | `voltages.csv` | one per step and bus |
//! | `steps.csv` | one per step |
//! | `summary.json` | flat key-value summary |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::results::{ResultsAggregator, TariffConfig};

pub const DISPATCH_FILE: &str = "dispatch.csv";
pub const VOLTAGES_FILE: &str = "voltages.csv";
pub const STEPS_FILE: &str = "steps.csv";
pub const SUMMARY_FILE: &str = "summary.json";

pub fn write_dispatch_csv(results: &ResultsAggregator, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;
    wtr.write_record([
        "timestep",
        "timestamp",
        "battery",
        "bus",
        "p_kw",
        "q_kvar",
        "charge_kw",
        "discharge_kw",
        "soc_kwh",
    ])
    .context("writing CSV header")?;

    for step in results.steps() {
        for b in &step.batteries {
            wtr.write_record([
                step.timestep.to_string(),
                step.timestamp.to_string(),
                b.battery.clone(),
                b.bus_name.clone(),
                b.p.value().to_string(),
                b.q.value().to_string(),
                b.charge.value().to_string(),
                b.discharge.value().to_string(),
                b.soc.value().to_string(),
            ])
            .context("writing CSV record")?;
        }
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

pub fn write_voltages_csv(results: &ResultsAggregator, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;
    wtr.write_record(["timestep", "bus", "voltage_pu", "baseline_voltage_pu"])
        .context("writing CSV header")?;

    let names = results.bus_names();
    for step in results.steps() {
        for (i, name) in names.iter().enumerate() {
            wtr.write_record([
                step.timestep.to_string(),
                name.clone(),
                step.voltages[i].to_string(),
                step.baseline_voltages[i].to_string(),
            ])
            .context("writing CSV record")?;
        }
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

pub fn write_steps_csv(results: &ResultsAggregator, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;
    wtr.write_record([
        "timestep",
        "timestamp",
        "status",
        "losses_kw",
        "baseline_losses_kw",
        "slack_p_kw",
        "slack_q_kvar",
        "max_violation_pu",
        "objective",
        "iterations",
        "error",
    ])
    .context("writing CSV header")?;

    for step in results.steps() {
        wtr.write_record([
            step.timestep.to_string(),
            step.timestamp.to_string(),
            step.status.to_string(),
            step.losses.value().to_string(),
            step.baseline_losses.value().to_string(),
            step.slack_p.value().to_string(),
            step.slack_q.value().to_string(),
            step.max_violation_pu.to_string(),
            step.objective.map(|o| o.to_string()).unwrap_or_default(),
            step.iterations.to_string(),
            step.error.clone().unwrap_or_default(),
        ])
        .context("writing CSV record")?;
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

pub fn write_summary_json(
    results: &ResultsAggregator,
    tariff: &TariffConfig,
    path: &Path,
) -> Result<()> {
    let summary = results.summary(tariff).to_key_values();
    let json = serde_json::to_string_pretty(&summary).context("serializing summary to JSON")?;
    std::fs::write(path, json).with_context(|| format!("writing JSON to {}", path.display()))?;
    Ok(())
}

/// Write all four outputs into `dir`, creating it if needed.
pub fn export_all(
    results: &ResultsAggregator,
    tariff: &TariffConfig,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    let dispatch = dir.join(DISPATCH_FILE);
    let voltages = dir.join(VOLTAGES_FILE);
    let steps = dir.join(STEPS_FILE);
    let summary = dir.join(SUMMARY_FILE);
    write_dispatch_csv(results, &dispatch)?;
    write_voltages_csv(results, &voltages)?;
    write_steps_csv(results, &steps)?;
    write_summary_json(results, tariff, &summary)?;
    Ok(vec![dispatch, voltages, steps, summary])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{BatteryDispatch, DispatchSolution, StepStatus};
    use lqp_core::*;
    use tempfile::TempDir;

    fn results() -> ResultsAggregator {
        let net = NetworkBuilder::new(
            "e",
            SystemBase::new(KilovoltAmperes(100.0), Kilovolts(0.4)),
            "s",
        )
        .bus(BusSpec::new("s"))
        .bus(BusSpec::new("a"))
        .line(LineSpec::new("s", "a", 0.01, 0.01))
        .build()
        .unwrap();
        let mut agg = ResultsAggregator::new(&net, 1.0, (PerUnit(0.95), PerUnit(1.05)));
        for t in 0..2 {
            agg.push(DispatchSolution {
                timestep: t,
                timestamp: 900 * t as i64,
                status: if t == 0 { StepStatus::Solved } else { StepStatus::Failed },
                batteries: vec![BatteryDispatch {
                    battery: "bess".into(),
                    bus: BusId::new(1),
                    bus_name: "a".into(),
                    p: Kilowatts(1.5),
                    q: Kilovars(-0.5),
                    charge: Kilowatts::ZERO,
                    discharge: Kilowatts(1.5),
                    soc: KilowattHours(4.0),
                }],
                voltages: vec![1.0, 0.99],
                baseline_voltages: vec![1.0, 0.98],
                losses: Kilowatts(0.1),
                baseline_losses: Kilowatts(0.2),
                slack_p: Kilowatts(0.6),
                slack_q: Kilovars(0.0),
                max_violation_pu: 0.0,
                objective: (t == 0).then_some(1.25),
                iterations: 7,
                error: (t == 1).then(|| "dispatch infeasible".to_string()),
            });
        }
        agg
    }

    #[test]
    fn export_all_writes_four_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("run");
        let written = export_all(&results(), &TariffConfig::default(), &out).unwrap();
        assert_eq!(written.len(), 4);
        for path in &written {
            assert!(path.exists(), "{} missing", path.display());
        }

        let dispatch = std::fs::read_to_string(out.join(DISPATCH_FILE)).unwrap();
        let mut lines = dispatch.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestep,timestamp,battery,bus,p_kw,q_kvar,charge_kw,discharge_kw,soc_kwh"
        );
        assert_eq!(lines.next().unwrap(), "0,0,bess,a,1.5,-0.5,0,1.5,4");

        let voltages = std::fs::read_to_string(out.join(VOLTAGES_FILE)).unwrap();
        assert_eq!(voltages.lines().count(), 1 + 2 * 2);

        let steps = std::fs::read_to_string(out.join(STEPS_FILE)).unwrap();
        assert!(steps.lines().nth(2).unwrap().contains("failed"));
        assert!(steps.contains("dispatch infeasible"));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary["failed_steps"], 1);
        assert_eq!(summary["steps"], 2);
        assert!(summary["min_voltage_pu"].as_f64().unwrap() < 1.0);
    }
}
