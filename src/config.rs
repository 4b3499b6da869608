use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::locations::Coordinates;

pub const CONFIG_FILE_NAME: &str = "aprsdb.toml";

/// `[receiver]`: the local station every path ends at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub callsign: String,
    pub symbol: String,
    pub symbol_table: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `DATABASE_URL` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gpsd_address")]
    pub address: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_gps_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_gpsd_address(),
            refresh_interval_secs: default_refresh_interval_secs(),
            timeout_ms: default_gps_timeout_ms(),
        }
    }
}

impl GpsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus exporter port; no exporter when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { ansi: default_ansi() }
    }
}

/// Top-level configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_pool_size() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_gpsd_address() -> String {
    "127.0.0.1:2947".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_gps_timeout_ms() -> u64 {
    2000
}

fn default_ansi() -> bool {
    true
}

impl Config {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config = toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate().with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rx = &self.receiver;
        if rx.callsign.trim().is_empty() {
            bail!("receiver.callsign must not be empty");
        }
        if rx.symbol.chars().count() != 1 {
            bail!("receiver.symbol must be a single character, got {:?}", rx.symbol);
        }
        if rx.symbol_table.chars().count() != 1 {
            bail!("receiver.symbol_table must be a single character, got {:?}", rx.symbol_table);
        }
        if !self.receiver_coordinates().is_valid() {
            bail!("receiver position ({}, {}) is out of range", rx.latitude, rx.longitude);
        }
        if self.database.pool_size == 0 {
            bail!("database.pool_size must be at least 1");
        }
        Ok(())
    }

    pub fn receiver_coordinates(&self) -> Coordinates {
        Coordinates::new(self.receiver.latitude, self.receiver.longitude)
    }

    /// `database.url`, or `DATABASE_URL` from the environment.
    pub fn database_url(&self) -> Result<String> {
        match &self.database.url {
            Some(url) => Ok(url.clone()),
            None => std::env::var("DATABASE_URL")
                .context("No database.url in config and DATABASE_URL is not set"),
        }
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` / `APRSDB_CONFIG`
/// 2. `$HOME/aprsdb.toml`
/// 3. `./aprsdb.toml`
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let mut candidates = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(Path::new(&home).join(CONFIG_FILE_NAME));
    }
    candidates.push(PathBuf::from(".").join(CONFIG_FILE_NAME));

    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .with_context(|| format!("No config file given and none found at {:?}", candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[receiver]
callsign = "N0CALL-10"
symbol = "&"
symbol_table = "/"
latitude = 40.0
longitude = -105.25
"#;

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (_dir, path) = write(MINIMAL);

        let config = Config::load(&path).unwrap();

        assert_eq!(config.receiver.callsign, "N0CALL-10");
        assert_eq!(config.database.pool_size, 2);
        assert_eq!(config.database.connect_timeout_secs, 10);
        assert!(!config.gps.enabled);
        assert_eq!(config.gps.address, "127.0.0.1:2947");
        assert_eq!(config.gps.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.metrics.port, None);
        assert!(config.logging.ansi);
    }

    #[test]
    fn full_config() {
        let contents = format!(
            "{}\n[database]\nurl = \"postgres://localhost/aprs\"\npool_size = 4\n\n[gps]\nenabled = true\ntimeout_ms = 500\n\n[metrics]\nport = 9464\n\n[logging]\nansi = false\n",
            MINIMAL
        );
        let (_dir, path) = write(&contents);

        let config = Config::load(&path).unwrap();

        assert_eq!(config.database_url().unwrap(), "postgres://localhost/aprs");
        assert_eq!(config.database.pool_size, 4);
        assert!(config.gps.enabled);
        assert_eq!(config.gps.timeout(), Duration::from_millis(500));
        assert_eq!(config.metrics.port, Some(9464));
        assert!(!config.logging.ansi);
    }

    #[test]
    fn multi_character_symbol_is_rejected() {
        let (_dir, path) = write(&MINIMAL.replace("symbol = \"&\"", "symbol = \"&&\""));

        let err = Config::load(&path).unwrap_err();

        assert!(format!("{:#}", err).contains("receiver.symbol"));
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let (_dir, path) = write(&MINIMAL.replace("latitude = 40.0", "latitude = 140.0"));

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn missing_receiver_section_is_a_parse_error() {
        let (_dir, path) = write("[database]\npool_size = 2\n");

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let explicit = Path::new("/tmp/elsewhere.toml");

        assert_eq!(config_path(Some(explicit)).unwrap(), explicit);
    }
}
