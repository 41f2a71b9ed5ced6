//! TOML run configuration.
//!
//! ```toml
//! [dispatch.weights]
//! losses = 1.0
//! voltage_deviation = 10.0
//! throughput = 0.01
//!
//! [dispatch.horizon]
//! mode = "rolling"
//! window_steps = 4
//!
//! [tariff]
//! retail_price_per_kwh = 0.15
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use lqp_algo::{DispatchConfig, TariffConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub tariff: TariffConfig,
}

impl RunConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading run config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("loading run config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("parsing TOML")?;
        config.dispatch.validate()?;
        Ok(config)
    }
}
