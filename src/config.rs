//! # Pipeline Configuration
//!
//! Environment-supplied configuration loaded through the `config` crate.
//!
//! Only the broker coordinates are part of the core: `AMQP_URL`, `AMQP_QUEUE`
//! and `AMQP_EXCHANGE`. The remaining settings wire up the external
//! collaborators used by the binaries (`DATABASE_URL`,
//! `PIPELINE_DOWNLOAD_DIR`, `PIPELINE_DOWNLOAD_TIMEOUT_SECONDS`).
//!
//! ```rust,no_run
//! use filings_pipeline::config::PipelineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env()?;
//! println!("consuming from {}", config.broker.queue);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::constants::{DEFAULT_AMQP_URL, DEFAULT_EXCHANGE_NAME, DEFAULT_QUEUE_NAME};
use crate::error::PipelineResult;

/// Broker coordinates (target for publish and consume)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BrokerSettings {
    pub url: String,
    pub queue: String,
    pub exchange: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_AMQP_URL.to_string(),
            queue: DEFAULT_QUEUE_NAME.to_string(),
            exchange: DEFAULT_EXCHANGE_NAME.to_string(),
        }
    }
}

impl BrokerSettings {
    /// Load from `AMQP_*` environment variables
    pub fn from_env() -> PipelineResult<Self> {
        Self::load(None)
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn load(source: Option<HashMap<String, String>>) -> PipelineResult<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("url", defaults.url)?
            .set_default("queue", defaults.queue)?
            .set_default("exchange", defaults.exchange)?
            .add_source(Environment::with_prefix("AMQP").source(source))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Connection URL with credentials stripped, safe for logs
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}***{}", &self.url[..scheme_end + 3], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CollaboratorSettings {
    download_dir: Option<PathBuf>,
    download_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSettings {
    url: Option<String>,
}

/// Full process configuration for the pipeline binaries
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub broker: BrokerSettings,
    pub database_url: Option<String>,
    pub download_dir: PathBuf,
    pub download_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> PipelineResult<Self> {
        Self::load(None)
    }

    pub fn load(source: Option<HashMap<String, String>>) -> PipelineResult<Self> {
        let broker = BrokerSettings::load(source.clone())?;

        let collaborators: CollaboratorSettings = Config::builder()
            .set_default("download_timeout_seconds", 60)?
            .add_source(
                Environment::with_prefix("PIPELINE")
                    .try_parsing(true)
                    .source(source.clone()),
            )
            .build()?
            .try_deserialize()?;

        let database: DatabaseSettings = Config::builder()
            .add_source(Environment::with_prefix("DATABASE").source(source))
            .build()?
            .try_deserialize()?;

        Ok(Self {
            broker,
            database_url: database.url,
            download_dir: collaborators
                .download_dir
                .unwrap_or_else(|| std::env::temp_dir().join("filings-downloads")),
            download_timeout: Duration::from_secs(collaborators.download_timeout_seconds),
        })
    }
}
