//! Schema registry
//!
//! Versioned dimensional-model contracts used by validation. Contracts
//! are registered once and never mutated; a version bump is a new
//! registration. Definition files live as human-readable TOML in the
//! data directory's `contracts/` folder and are registered at startup.

use crate::db;
use crate::models::SchemaContract;
use finflow_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Registry facade over the contract store
#[derive(Clone)]
pub struct SchemaRegistry {
    pool: SqlitePool,
}

impl SchemaRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a contract version; NotFound if absent
    pub async fn get(&self, domain: &str, version: u32) -> Result<SchemaContract> {
        db::contracts::get(&self.pool, domain, version).await
    }

    /// Register a new contract version.
    ///
    /// Fails with RegistryConflict if the version already exists;
    /// contracts are immutable once registered.
    pub async fn register(&self, contract: &SchemaContract) -> Result<()> {
        db::contracts::register(&self.pool, contract).await
    }

    /// Registered versions for a domain, ascending
    pub async fn versions(&self, domain: &str) -> Result<Vec<u32>> {
        db::contracts::versions(&self.pool, domain).await
    }

    /// Load every `*.toml` contract file from a directory and register
    /// the versions not yet present. Already-registered versions are
    /// skipped so startup stays idempotent; a changed file for an
    /// existing version is NOT applied (immutability) and logs a warning
    /// when its definition differs from the stored one.
    pub async fn load_directory(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Contracts directory missing, none loaded");
            return Ok(0);
        }

        let mut registered = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "toml").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let content = std::fs::read_to_string(&path)?;
            let contract = SchemaContract::from_toml(&content).map_err(|e| {
                Error::Config(format!("Contract file {}: {}", path.display(), e))
            })?;

            match self.register(&contract).await {
                Ok(()) => registered += 1,
                Err(Error::RegistryConflict { domain, version }) => {
                    let stored = self.get(&domain, version).await?;
                    let stored_json = serde_json::to_string(&stored).unwrap_or_default();
                    let file_json = serde_json::to_string(&contract).unwrap_or_default();
                    if stored_json != file_json {
                        tracing::warn!(
                            domain = %domain,
                            version,
                            file = %path.display(),
                            "Contract file differs from registered version; registered \
                             contract is authoritative, bump the version to change it"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(dir = %dir.display(), registered, "Contract directory loaded");
        Ok(registered)
    }
}
