//! Load and PV time series for dispatch studies.
//!
//! Profiles are long-format CSV files with one row per (bus, timestamp):
//!
//! ```text
//! bus,timestamp,p_kw,q_kvar
//! 632,0,12.5,4.1
//! 632,900,13.0,4.3
//! ```
//!
//! Timestamps are integer seconds. Every bus listed in a file must carry a
//! sample at every timestamp, and timestamps must be evenly spaced; the
//! spacing becomes the timestep duration. Buses absent from a file have zero
//! load (or zero PV).

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use lqp_core::{BusId, Kilovars, KilovoltAmperes, Kilowatts, Network};
use polars::prelude::*;

/// Time-aligned per-bus samples, indexed `[timestep][bus arena index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSet {
    timestamps: Vec<i64>,
    dt_hours: f64,
    load_p: Vec<Vec<Kilowatts>>,
    load_q: Vec<Vec<Kilovars>>,
    pv_p: Vec<Vec<Kilowatts>>,
    pv_q: Vec<Vec<Kilovars>>,
}

impl ProfileSet {
    /// Zero-valued profiles over `timestamps` for a network of `bus_count`
    /// buses. `fallback_dt_hours` is used when only one timestamp exists.
    pub fn zeros(bus_count: usize, timestamps: Vec<i64>, fallback_dt_hours: f64) -> Result<Self> {
        let dt_hours = uniform_step_hours(&timestamps, fallback_dt_hours)?;
        let n = timestamps.len();
        Ok(Self {
            timestamps,
            dt_hours,
            load_p: vec![vec![Kilowatts::ZERO; bus_count]; n],
            load_q: vec![vec![Kilovars::ZERO; bus_count]; n],
            pv_p: vec![vec![Kilowatts::ZERO; bus_count]; n],
            pv_q: vec![vec![Kilovars::ZERO; bus_count]; n],
        })
    }

    /// The same static load at every one of `steps` timesteps.
    pub fn constant(
        network: &Network,
        steps: usize,
        dt_hours: f64,
        loads: &[(BusId, Kilowatts, Kilovars)],
    ) -> Result<Self> {
        let step_seconds = (dt_hours * 3600.0).round() as i64;
        if step_seconds <= 0 {
            bail!("timestep must be positive, got {} h", dt_hours);
        }
        let timestamps = (0..steps as i64).map(|t| t * step_seconds).collect();
        let mut set = Self::zeros(network.bus_count(), timestamps, dt_hours)?;
        for t in 0..steps {
            for &(bus, p, q) in loads {
                set.add_load(t, bus, p, q);
            }
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn dt_hours(&self) -> f64 {
        self.dt_hours
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn timestamp(&self, t: usize) -> i64 {
        self.timestamps[t]
    }

    pub fn bus_count(&self) -> usize {
        self.load_p.first().map(Vec::len).unwrap_or(0)
    }

    pub fn load(&self, t: usize, bus: BusId) -> (Kilowatts, Kilovars) {
        (self.load_p[t][bus.value()], self.load_q[t][bus.value()])
    }

    pub fn pv(&self, t: usize, bus: BusId) -> (Kilowatts, Kilovars) {
        (self.pv_p[t][bus.value()], self.pv_q[t][bus.value()])
    }

    pub fn add_load(&mut self, t: usize, bus: BusId, p: Kilowatts, q: Kilovars) {
        self.load_p[t][bus.value()] = self.load_p[t][bus.value()] + p;
        self.load_q[t][bus.value()] = self.load_q[t][bus.value()] + q;
    }

    pub fn add_pv(&mut self, t: usize, bus: BusId, p: Kilowatts, q: Kilovars) {
        self.pv_p[t][bus.value()] = self.pv_p[t][bus.value()] + p;
        self.pv_q[t][bus.value()] = self.pv_q[t][bus.value()] + q;
    }

    /// Fixed (non-battery) net injection at step `t` in per-unit,
    /// generation positive: `(pv - load) / s_base`.
    pub fn net_injection_pu(&self, t: usize, s_base: KilovoltAmperes) -> (Vec<f64>, Vec<f64>) {
        let p = self.pv_p[t]
            .iter()
            .zip(&self.load_p[t])
            .map(|(&pv, &load)| (pv - load).to_per_unit(s_base))
            .collect();
        let q = self.pv_q[t]
            .iter()
            .zip(&self.load_q[t])
            .map(|(&pv, &load)| (pv - load).to_per_unit(s_base))
            .collect();
        (p, q)
    }

    /// Owned copy of steps `start..start + len`, clipped to the set.
    pub fn window(&self, start: usize, len: usize) -> ProfileSet {
        let end = (start + len).min(self.len());
        let start = start.min(end);
        ProfileSet {
            timestamps: self.timestamps[start..end].to_vec(),
            dt_hours: self.dt_hours,
            load_p: self.load_p[start..end].to_vec(),
            load_q: self.load_q[start..end].to_vec(),
            pv_p: self.pv_p[start..end].to_vec(),
            pv_q: self.pv_q[start..end].to_vec(),
        }
    }

    /// Uniformly scale load and PV, for sensitivity studies.
    pub fn scaled(&self, load_factor: f64, pv_factor: f64) -> ProfileSet {
        fn scale<T: Copy + std::ops::Mul<f64, Output = T>>(rows: &[Vec<T>], k: f64) -> Vec<Vec<T>> {
            rows.iter()
                .map(|row| row.iter().map(|&v| v * k).collect())
                .collect()
        }
        ProfileSet {
            timestamps: self.timestamps.clone(),
            dt_hours: self.dt_hours,
            load_p: scale(&self.load_p, load_factor),
            load_q: scale(&self.load_q, load_factor),
            pv_p: scale(&self.pv_p, pv_factor),
            pv_q: scale(&self.pv_q, pv_factor),
        }
    }

    /// Total load energy over the set, kWh.
    pub fn total_load_kwh(&self) -> f64 {
        self.load_p
            .iter()
            .map(|row| row.iter().map(|p| p.value()).sum::<f64>() * self.dt_hours)
            .sum()
    }
}

/// One parsed profile file, before alignment with the network.
struct Samples {
    timestamps: Vec<i64>,
    rows: Vec<(BusId, i64, f64, f64)>,
}

/// Read a load CSV and an optional PV CSV for `network`.
pub fn read_profiles(
    load_path: &Path,
    pv_path: Option<&Path>,
    network: &Network,
    fallback_dt_hours: f64,
) -> Result<ProfileSet> {
    let load = read_samples(load_path, network)
        .with_context(|| format!("reading load profile {}", load_path.display()))?;
    let mut set = ProfileSet::zeros(network.bus_count(), load.timestamps.clone(), fallback_dt_hours)
        .with_context(|| format!("load profile {}", load_path.display()))?;
    let index = step_index(&set.timestamps);
    for &(bus, ts, p, q) in &load.rows {
        set.add_load(index[&ts], bus, Kilowatts(p), Kilovars(q));
    }

    if let Some(pv_path) = pv_path {
        let pv = read_samples(pv_path, network)
            .with_context(|| format!("reading PV profile {}", pv_path.display()))?;
        if pv.timestamps != set.timestamps {
            bail!(
                "PV profile {} is not time-aligned with the load profile ({} vs {} timestamps)",
                pv_path.display(),
                pv.timestamps.len(),
                set.timestamps.len()
            );
        }
        for &(bus, ts, p, q) in &pv.rows {
            set.add_pv(index[&ts], bus, Kilowatts(p), Kilovars(q));
        }
    }

    Ok(set)
}

fn step_index(timestamps: &[i64]) -> HashMap<i64, usize> {
    timestamps.iter().enumerate().map(|(i, &t)| (t, i)).collect()
}

fn read_samples(path: &Path, network: &Network) -> Result<Samples> {
    let df = read_frame(path)?;
    if df.height() == 0 {
        bail!("profile has no rows");
    }

    let bus_series = df
        .column("bus")
        .context("profile needs a 'bus' column")?
        .cast(&DataType::Utf8)
        .context("casting bus column to Utf8")?;
    let ts_series = df
        .column("timestamp")
        .context("profile needs a 'timestamp' column")?
        .cast(&DataType::Int64)
        .context("casting timestamp column to Int64")?;
    let p_series = df
        .column("p_kw")
        .context("profile needs a 'p_kw' column")?
        .cast(&DataType::Float64)
        .context("casting p_kw column to Float64")?;
    let q_series = match df.column("q_kvar") {
        Ok(series) => Some(
            series
                .cast(&DataType::Float64)
                .context("casting q_kvar column to Float64")?,
        ),
        Err(_) => None,
    };

    let buses = bus_series.utf8()?;
    let stamps = ts_series.i64()?;
    let p = p_series.f64()?;
    let q = q_series.as_ref().map(|s| s.f64()).transpose()?;

    let mut rows = Vec::with_capacity(df.height());
    let mut seen: HashMap<(BusId, i64), usize> = HashMap::new();
    let mut per_bus: HashMap<BusId, usize> = HashMap::new();
    let mut all_ts = BTreeSet::new();

    for row in 0..df.height() {
        let line = row + 2;
        let name = buses
            .get(row)
            .ok_or_else(|| anyhow!("row {}: missing bus", line))?;
        let bus = network
            .bus_by_name(name)
            .ok_or_else(|| anyhow!("row {}: unknown bus '{}'", line, name))?;
        let ts = stamps
            .get(row)
            .ok_or_else(|| anyhow!("row {}: missing timestamp", line))?;
        let p_kw = p
            .get(row)
            .ok_or_else(|| anyhow!("row {}: missing p_kw", line))?;
        let q_kvar = q.and_then(|q| q.get(row)).unwrap_or(0.0);

        if let Some(first) = seen.insert((bus, ts), line) {
            bail!(
                "row {}: duplicate sample for bus '{}' at {} (first at row {})",
                line,
                name,
                ts,
                first
            );
        }
        *per_bus.entry(bus).or_default() += 1;
        all_ts.insert(ts);
        rows.push((bus, ts, p_kw, q_kvar));
    }

    let expected = all_ts.len();
    for (&bus, &count) in &per_bus {
        if count != expected {
            bail!(
                "bus '{}' has {} samples but the profile spans {} timestamps (misaligned)",
                network.bus(bus).name,
                count,
                expected
            );
        }
    }

    Ok(Samples {
        timestamps: all_ts.into_iter().collect(),
        rows,
    })
}

fn read_frame(path: &Path) -> Result<DataFrame> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    CsvReader::new(&mut file)
        .has_header(true)
        .finish()
        .context("reading CSV file")
}

fn uniform_step_hours(timestamps: &[i64], fallback_dt_hours: f64) -> Result<f64> {
    if timestamps.windows(2).any(|w| w[1] <= w[0]) {
        bail!("timestamps must be strictly increasing");
    }
    match timestamps {
        [] | [_] => {
            if fallback_dt_hours > 0.0 {
                Ok(fallback_dt_hours)
            } else {
                Err(anyhow!("cannot infer timestep from fewer than two timestamps"))
            }
        }
        [first, second, ..] => {
            let step = second - first;
            if let Some(w) = timestamps.windows(2).find(|w| w[1] - w[0] != step) {
                bail!(
                    "non-uniform timestep: {} s between {} and {}, expected {} s",
                    w[1] - w[0],
                    w[0],
                    w[1],
                    step
                );
            }
            Ok(step as f64 / 3600.0)
        }
    }
}
