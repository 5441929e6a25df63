use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde::Deserialize;
use systemair_save::{Catalog, Client, ClientBuilder, RegisterDescriptor, RegisterGroup};

use crate::{Error, Result};

/// Groups polled when no registers are listed explicitly.
pub const DEFAULT_GROUPS: [RegisterGroup; 2] = [RegisterGroup::Operation, RegisterGroup::Sensor];

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub host: String,

    #[serde(
        with = "humantime_serde",
        default = "default_interval",
        alias = "period"
    )]
    pub interval: Duration,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Catalog keys to poll. Empty means [`DEFAULT_GROUPS`].
    #[serde(default, alias = "watch")]
    pub registers: Vec<String>,
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    systemair_save::DEFAULT_TIMEOUT
}

fn default_attempts() -> u32 {
    systemair_save::DEFAULT_ATTEMPTS
}

impl Config {
    pub fn new<H: Into<String>>(host: H) -> Self {
        Self {
            host: host.into(),
            interval: default_interval(),
            timeout: default_timeout(),
            attempts: default_attempts(),
            registers: Vec::new(),
        }
    }

    /// Reads a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn client(&self) -> Result<Client> {
        let client = ClientBuilder::new(self.host.clone())
            .timeout(self.timeout)
            .attempts(self.attempts)
            .build()?;
        Ok(client)
    }

    /// Resolves the configured register keys against `catalog`.
    pub fn watched(&self, catalog: &Catalog) -> Result<Vec<RegisterDescriptor>> {
        if self.registers.is_empty() {
            return Ok(DEFAULT_GROUPS
                .iter()
                .flat_map(|&group| catalog.group(group))
                .copied()
                .collect());
        }

        self.registers
            .iter()
            .map(|key| {
                catalog
                    .get(key)
                    .copied()
                    .ok_or_else(|| Error::UnknownRegister(key.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn parse_minimal_config_defaults() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({ "host": "192.168.1.20" })).unwrap();
    assert_eq!(config.host, "192.168.1.20");
    assert_eq!(config.interval, Duration::from_secs(10));
    assert_eq!(config.timeout, Duration::from_secs(10));
    assert_eq!(config.attempts, 2);
    assert!(config.registers.is_empty());
}

#[test]
fn parse_config_durations_and_aliases() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "host": "save.local",
        "period": "1m 30s",
        "timeout": "500ms",
        "attempts": 3,
        "watch": ["REG_TC_SP", "REG_SENSOR_OAT"],
    }))
    .unwrap();
    assert_eq!(config.interval, Duration::from_secs(90));
    assert_eq!(config.timeout, Duration::from_millis(500));
    assert_eq!(config.attempts, 3);
    assert_eq!(config.registers, ["REG_TC_SP", "REG_SENSOR_OAT"]);
}

#[test]
fn parse_config_requires_host() {
    use serde_json::json;
    assert!(serde_json::from_value::<Config>(json!({ "interval": "10s" })).is_err());
}

#[test]
fn watched_defaults_to_operation_and_sensor_groups() {
    let catalog = Catalog::systemair();
    let watched = Config::new("save.local").watched(&catalog).unwrap();
    assert!(!watched.is_empty());
    assert!(watched
        .iter()
        .all(|r| r.group.as_ref().is_some_and(|g| DEFAULT_GROUPS.contains(g))));
    assert!(watched.iter().any(|r| r.key == "REG_SENSOR_OAT"));
}

#[test]
fn watched_resolves_keys_in_order() {
    let catalog = Catalog::systemair();
    let mut config = Config::new("save.local");
    config.registers = vec!["REG_TC_SP".into(), "REG_ECO_MODE_ON_OFF".into()];
    let keys: Vec<_> = config
        .watched(&catalog)
        .unwrap()
        .iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(keys, ["REG_TC_SP", "REG_ECO_MODE_ON_OFF"]);
}

#[test]
fn watched_rejects_unknown_keys() {
    let catalog = Catalog::systemair();
    let mut config = Config::new("save.local");
    config.registers = vec!["REG_TC_SP".into(), "REG_WARP_DRIVE".into()];
    assert!(matches!(
        config.watched(&catalog),
        Err(Error::UnknownRegister(key)) if key == "REG_WARP_DRIVE"
    ));
}

#[test]
fn from_file_reports_missing_files() {
    assert!(matches!(
        Config::from_file("/nonexistent/systemair.json"),
        Err(Error::IOError(_))
    ));
}
