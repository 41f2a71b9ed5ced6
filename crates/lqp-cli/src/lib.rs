pub mod cli;
pub mod config;

pub use cli::{Cli, Commands, HorizonArg};
pub use config::RunConfig;
