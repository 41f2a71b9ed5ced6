use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use lqp_algo::dispatch::HorizonMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Linearized-QP battery dispatch for radial feeders", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HorizonArg {
    Rolling,
    Joint,
}

impl From<HorizonArg> for HorizonMode {
    fn from(arg: HorizonArg) -> Self {
        match arg {
            HorizonArg::Rolling => HorizonMode::Rolling,
            HorizonArg::Joint => HorizonMode::Joint,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a dispatch study and write dispatch, voltage, step and summary files
    Dispatch {
        /// Feeder file (native JSON or OpenDSS export)
        #[arg(long, value_hint = ValueHint::FilePath)]
        feeder: PathBuf,
        /// Run configuration (TOML) with objective weights and solver options
        #[arg(long, short, value_hint = ValueHint::FilePath)]
        config: PathBuf,
        /// Load profile CSV (timestamp, bus, p_kw[, q_kvar]); defaults to the
        /// feeder's static loads
        #[arg(long, value_hint = ValueHint::FilePath)]
        load: Option<PathBuf>,
        /// PV profile CSV, same layout as the load profile
        #[arg(long, value_hint = ValueHint::FilePath)]
        pv: Option<PathBuf>,
        /// Steps to simulate when no load profile is given
        #[arg(long, default_value_t = 24)]
        steps: usize,
        /// Timestep in hours for single-row profiles or static loads
        #[arg(long, default_value_t = 1.0)]
        dt_hours: f64,
        /// Override the configured horizon mode
        #[arg(long, value_enum)]
        horizon: Option<HorizonArg>,
        /// Override the configured rolling window length
        #[arg(long)]
        window: Option<usize>,
        /// Output directory
        #[arg(short, long, default_value = "lqp-out", value_hint = ValueHint::DirPath)]
        out: PathBuf,
    },
    /// Print the LinDistFlow voltage sensitivities of one bus
    Sensitivity {
        /// Feeder file (native JSON or OpenDSS export)
        #[arg(long, value_hint = ValueHint::FilePath)]
        feeder: PathBuf,
        /// Bus whose row of A and B to print; all buses when omitted
        #[arg(long)]
        bus: Option<String>,
    },
    /// Three-phase LinDist3Flow sweep of an OpenDSS export with its static loads
    Sweep {
        /// OpenDSS JSON export
        #[arg(long, value_hint = ValueHint::FilePath)]
        feeder: PathBuf,
        /// Write per-node phase voltages as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check that a feeder is radial and its batteries are dispatchable
    Validate {
        /// Feeder file (native JSON or OpenDSS export)
        #[arg(long, value_hint = ValueHint::FilePath)]
        feeder: PathBuf,
    },
}
