use clap::{CommandFactory, Parser};
use lqp_cli::{Cli, Commands};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::dispatch::DispatchOptions;

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {err}");
    }

    let Some(command) = cli.command else {
        // Nothing to run; behave like --help.
        if let Err(e) = Cli::command().print_help() {
            error!("failed to print help: {}", e);
            std::process::exit(1);
        }
        return;
    };

    let (label, result) = match command {
        Commands::Dispatch {
            feeder,
            config,
            load,
            pv,
            steps,
            dt_hours,
            horizon,
            window,
            out,
        } => {
            info!("Dispatching {} with {}", feeder.display(), config.display());
            let opts = DispatchOptions {
                feeder,
                config,
                load,
                pv,
                steps,
                dt_hours,
                horizon,
                window,
                out,
            };
            ("Dispatch", commands::dispatch::handle(&opts))
        }
        Commands::Sensitivity { feeder, bus } => (
            "Sensitivity",
            commands::sensitivity::handle(&feeder, bus.as_deref()),
        ),
        Commands::Sweep { feeder, json } => ("Sweep", commands::sweep::handle(&feeder, json)),
        Commands::Validate { feeder } => {
            info!("Validating feeder {}", feeder.display());
            ("Validation", commands::validate::handle(&feeder))
        }
    };

    match result {
        Ok(()) => info!("{} finished", label),
        Err(e) => {
            error!("{} failed: {:#}", label, e);
            std::process::exit(1);
        }
    }
}
