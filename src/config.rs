//! Server configuration.
//!
//! These structs are the opaque configuration inputs consumed by the core:
//! the enclosing server process loads them from YAML and hands them down.
//! serde does the parsing; `validate()` catches the values the core cannot
//! work with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::DH_KEY_HEX_SIZE;

/// Connection settings for the relational backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    pub database_name: String,

    /// When on, a schema mismatch archives and recreates the table instead
    /// of failing the setup.
    #[serde(default = "default_true")]
    pub auto_schema_update: bool,

    /// Data-store directory holding `*.lua` migration scripts.
    #[serde(default = "default_migration_dir")]
    pub migration_directory: String,
}

/// Settings for one server tier process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    pub listen_port: u16,

    /// Hex rendering of the 1024-bit Diffie-Hellman prime.
    pub dh_prime: String,

    /// When set, every encrypted connection appends decrypted traffic to a
    /// capture file under this directory.
    #[serde(default)]
    pub capture_path: String,

    /// Data-store mounts, first searched first; the last one is writable.
    #[serde(default)]
    pub data_store_paths: Vec<String>,

    pub database: DatabaseConfig,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_true() -> bool {
    true
}

fn default_migration_dir() -> String {
    "/migrations".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.listen_port != 0, "listen_port cannot be 0");
        anyhow::ensure!(
            self.dh_prime.len() == DH_KEY_HEX_SIZE,
            "dh_prime must be exactly {} hex digits (got {})",
            DH_KEY_HEX_SIZE,
            self.dh_prime.len()
        );
        anyhow::ensure!(
            self.dh_prime.bytes().all(|b| b.is_ascii_hexdigit()),
            "dh_prime contains non-hex characters"
        );
        anyhow::ensure!(
            !self.database.database_name.is_empty(),
            "database_name cannot be empty"
        );

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self).context("Failed to serialize config to YAML")?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;
        Ok(())
    }
}
