//! Configuration loading for finflow
//!
//! Settings come from a TOML file resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FINFLOW_CONFIG` environment variable
//! 3. `./finflow.toml` in the working directory
//!
//! The data directory inside the settings can likewise be overridden by
//! a CLI flag or `FINFLOW_DATA_DIR`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of ingestion source, a closed set dispatched from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// CSV exports dropped into a directory
    Spreadsheet,
    /// Extract database produced from the ERP
    Erp,
    /// CRM HTTP API
    Crm,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Spreadsheet => write!(f, "spreadsheet"),
            SourceKind::Erp => write!(f, "erp"),
            SourceKind::Crm => write!(f, "crm"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spreadsheet" => Ok(SourceKind::Spreadsheet),
            "erp" => Ok(SourceKind::Erp),
            "crm" => Ok(SourceKind::Crm),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown source kind: {}",
                other
            ))),
        }
    }
}

/// Connection details for one domain's source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// CSV drop directory; files are matched by `<domain>` name prefix
    Spreadsheet {
        /// Directory scanned for `.csv` files (relative to data_dir)
        path: PathBuf,
        /// Column holding the record's source timestamp
        timestamp_column: String,
    },
    /// SQLite extract database written by the ERP export job
    Erp {
        /// Path to the extract database (relative to data_dir)
        db_path: PathBuf,
        /// Extraction query; must expose a `source_ts` column and take
        /// the watermark as its single `?` bind
        query: String,
    },
    /// CRM HTTP endpoint returning a JSON array of records
    Crm {
        /// Base URL of the record feed
        endpoint: String,
        /// Optional bearer token reference
        api_key: Option<String>,
        /// Payload field holding the record's source timestamp
        timestamp_field: String,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Spreadsheet { .. } => SourceKind::Spreadsheet,
            SourceConfig::Erp { .. } => SourceKind::Erp,
            SourceConfig::Crm { .. } => SourceKind::Crm,
        }
    }
}

/// One data domain: a named pipeline from a source to the warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain name, also the schema contract name
    pub name: String,
    /// Contract version the pipeline validates against
    pub contract_version: u32,
    /// Source connection
    pub source: SourceConfig,
    /// Ingestion poll schedule in minutes (None = manual only)
    #[serde(default)]
    pub poll_minutes: Option<u64>,
    /// Retrain schedule in minutes (None = manual only)
    #[serde(default)]
    pub retrain_minutes: Option<u64>,
}

/// Stage retry policy (bounded exponential backoff)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per stage, including the first
    pub max_attempts: u32,
    /// Initial backoff delay
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
        }
    }
}

/// Warehouse load tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Records committed per transaction; the watermark advances per
    /// committed chunk
    pub chunk_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { chunk_size: 5000 }
    }
}

/// Forecast pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Trailing training window over warehouse facts, in months
    pub window_months: u32,
    /// Months held out of training for evaluation
    pub holdout_months: u32,
    /// Minimum relative MAPE improvement (percent) required to promote
    /// a retrained model over the published one
    pub min_improvement_pct: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            window_months: 24,
            holdout_months: 3,
            min_improvement_pct: 5.0,
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory for the database, contract files and source drops
    pub data_dir: PathBuf,
    /// HTTP API bind port for `serve`
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// Configured data domains
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
}

fn default_port() -> u16 {
    5780
}

impl Settings {
    /// Resolve and load settings.
    ///
    /// `cli_config` / `cli_data_dir` come from the command line and win
    /// over the `FINFLOW_CONFIG` / `FINFLOW_DATA_DIR` environment
    /// variables, which win over the defaults.
    pub fn resolve(cli_config: Option<&Path>, cli_data_dir: Option<&Path>) -> Result<Self> {
        let config_path = match cli_config {
            Some(p) => p.to_path_buf(),
            None => match std::env::var("FINFLOW_CONFIG") {
                Ok(p) => PathBuf::from(p),
                Err(_) => PathBuf::from("finflow.toml"),
            },
        };

        let mut settings = Self::from_file(&config_path)?;

        if let Some(dir) = cli_data_dir {
            settings.data_dir = dir.to_path_buf();
        } else if let Ok(dir) = std::env::var("FINFLOW_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Find a domain by name
    pub fn domain(&self, name: &str) -> Result<&DomainConfig> {
        self.domains
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(format!("Domain not configured: {}", name)))
    }

    /// Path to the warehouse database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("finflow.db")
    }

    /// Directory holding schema contract TOML files
    pub fn contracts_dir(&self) -> PathBuf {
        self.data_dir.join("contracts")
    }

    fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(Error::Config("No domains configured".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate domain name: {}",
                    domain.name
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".to_string()));
        }
        if self.load.chunk_size == 0 {
            return Err(Error::Config("load.chunk_size must be >= 1".to_string()));
        }
        if self.forecast.holdout_months == 0
            || self.forecast.holdout_months >= self.forecast.window_months
        {
            return Err(Error::Config(
                "forecast.holdout_months must be >= 1 and < window_months".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        data_dir = "/var/lib/finflow"

        [retry]
        max_attempts = 3
        base_delay_ms = 100
        max_delay_ms = 2000

        [[domains]]
        name = "dre_lancamentos"
        contract_version = 1
        poll_minutes = 60

        [domains.source]
        type = "spreadsheet"
        path = "drops/dre"
        timestamp_column = "DATA"

        [[domains]]
        name = "base_clientes"
        contract_version = 1

        [domains.source]
        type = "erp"
        db_path = "erp_extract.db"
        query = "SELECT * FROM clientes_extract WHERE source_ts > ?"
    "#;

    #[test]
    fn parses_domains_and_sources() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        assert_eq!(settings.domains.len(), 2);
        assert_eq!(
            settings.domains[0].source.kind(),
            SourceKind::Spreadsheet
        );
        assert_eq!(settings.domains[1].source.kind(), SourceKind::Erp);
        assert_eq!(settings.retry.max_attempts, 3);
        // Unset sections fall back to defaults
        assert_eq!(settings.load.chunk_size, 5000);
        assert_eq!(settings.forecast.window_months, 24);
    }

    #[test]
    fn duplicate_domain_rejected() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        let dup = settings.domains[0].clone();
        settings.domains.push(dup);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn domain_lookup() {
        let settings: Settings = toml::from_str(SAMPLE).unwrap();
        assert!(settings.domain("base_clientes").is_ok());
        assert!(matches!(
            settings.domain("unknown"),
            Err(Error::NotFound(_))
        ));
    }
}
