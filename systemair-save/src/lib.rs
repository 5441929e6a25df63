use std::{collections::HashMap, time::Duration};

use itertools::Itertools;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_aux::prelude::*;
use thiserror::Error;
use tracing::debug;

mod registers;
mod retry;

pub use registers::{
    wire_address, Catalog, RegisterDescriptor, RegisterGroup, RegisterType, Signedness,
};
pub use retry::{is_acknowledgement, is_disconnected, retry_while, ACKNOWLEDGED, DISCONNECTED};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Timeouts and failures to reach the module at all.
    #[error("Error communicating with SAVE Connect - {0}")]
    Communication(#[source] reqwest::Error),

    #[error("SAVE Connect reports its Modbus link is disconnected (after {attempts} attempts)")]
    Disconnected { attempts: u32 },

    #[error(transparent)]
    HttpErr(reqwest::Error),

    #[error("Invalid credentials (HTTP {status})")]
    Authentication { status: u16 },

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(String),

    #[error("Unknown register key {0:?}")]
    UnknownRegisterKey(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Communication(e)
        } else {
            Error::HttpErr(e)
        }
    }
}

impl Error {
    /// `true` when trying again later may succeed. Everything else points at something structurally wrong with the
    /// request or the module's answer.
    pub fn is_communication(&self) -> bool {
        matches!(self, Error::Communication(_) | Error::Disconnected { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ATTEMPTS: u32 = 2;

#[derive(Clone, Debug)]
pub struct ClientBuilder {
    host: String,
    timeout: Duration,
    attempts: u32,
}

impl ClientBuilder {
    /// `host` is the address of the SAVE Connect module, optionally with a port (`192.168.1.20`,
    /// `save.local:8080`).
    pub fn new<H>(host: H) -> Self
    where
        H: Into<String>,
    {
        Self {
            host: host.into(),
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Limit for each individual HTTP attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total number of attempts per request, including the first.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn build(self) -> Result<Client> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(Client {
            http,
            host: self.host,
            attempts: self.attempts,
        })
    }
}

/// Client for the JSON interface of a SAVE Connect module.
///
/// Registers are read with `GET /mread?{"<address>":1,...}` and written with `GET /mwrite?{"<address>":<value>}`,
/// where addresses are 0-based.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    host: String,
    attempts: u32,
}

impl Client {
    pub fn new<H>(host: H) -> Result<Self>
    where
        H: Into<String>,
    {
        ClientBuilder::new(host).build()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Reads the registers at the given 1-based addresses in a single request.
    ///
    /// The returned snapshot is keyed by 0-based wire address.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn read_batch(&self, addresses: &[u16]) -> Result<RawSnapshot> {
        let body = self.request("mread", Some(&read_query(addresses))).await?;
        parse_snapshot(&body)
    }

    /// Writes a raw value to the register at the given 1-based address.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn write(&self, address: u16, value: i64) -> Result<()> {
        let body = self.request("mwrite", Some(&write_query(address, value))).await?;
        if is_acknowledgement(&body) {
            Ok(())
        } else {
            Err(Error::UnexpectedResponse(body))
        }
    }

    /// Issues an empty read, which succeeds once the module is reachable and talking to the unit.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn test_connection(&self) -> Result<()> {
        let body = self.request("mread", Some("{}")).await?;
        parse_snapshot(&body).map(|_| ())
    }

    pub async fn menu(&self) -> Result<Menu> {
        self.get_json("menu").await
    }

    pub async fn unit_version(&self) -> Result<UnitVersion> {
        self.get_json("unit_version").await
    }

    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let Menu { mac } = self.menu().await?;
        let version = self.unit_version().await?;
        Ok(DeviceInfo { mac, version })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_json<T>(&self, endpoint: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.request(endpoint, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn request(&self, endpoint: &str, query: Option<&str>) -> Result<String> {
        let url = match query {
            Some(query) => format!("http://{}/{}?{}", &self.host, endpoint, query),
            None => format!("http://{}/{}", &self.host, endpoint),
        };
        debug!(%url, "URL");
        retry_while(self.attempts, || self.send(&url), is_disconnected).await
    }

    async fn send(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                status: status.as_u16(),
            });
        }

        let body = response.error_for_status()?.text().await?;
        debug!(%body, "response");
        Ok(body)
    }
}

// The module expects JSON in the query string, with quotes percent-encoded.
fn read_query(addresses: &[u16]) -> String {
    let pairs = addresses
        .iter()
        .map(|&address| format!("%22{}%22:1", wire_address(address)))
        .join(",");
    format!("{{{pairs}}}")
}

fn write_query(address: u16, value: i64) -> String {
    format!("{{%22{}%22:{}}}", wire_address(address), value)
}

fn parse_snapshot(body: &str) -> Result<RawSnapshot> {
    if is_acknowledgement(body) {
        return Err(Error::UnexpectedResponse(body.to_owned()));
    }
    Ok(serde_json::from_str(body)?)
}

/// Raw register values from one `mread`, keyed by 0-based wire address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RawSnapshot(#[serde(deserialize_with = "raw_words")] HashMap<u16, i64>);

// The module is not consistent about quoting numbers, e.g.:
//
//      {"2000":215,"12102":"65486"}
fn raw_words<'de, D>(deserializer: D) -> std::result::Result<HashMap<u16, i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct RawWord(#[serde(deserialize_with = "deserialize_number_from_string")] i64);

    let words = HashMap::<u16, RawWord>::deserialize(deserializer)?;
    Ok(words
        .into_iter()
        .map(|(address, RawWord(value))| (address, value))
        .collect())
}

impl RawSnapshot {
    pub fn get(&self, wire_address: u16) -> Option<i64> {
        self.0.get(&wire_address).copied()
    }

    pub fn insert(&mut self, wire_address: u16, value: i64) -> Option<i64> {
        self.0.insert(wire_address, value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, i64)> + '_ {
        self.0.iter().map(|(&address, &value)| (address, value))
    }
}

impl FromIterator<(u16, i64)> for RawSnapshot {
    fn from_iter<I: IntoIterator<Item = (u16, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// {
//     "mac": "00:1E:C0:AA:BB:CC",
//     ...
// }
#[derive(Clone, Debug, Deserialize)]
pub struct Menu {
    pub mac: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UnitVersion {
    #[serde(
        rename = "System Serial Number",
        deserialize_with = "deserialize_string_from_number"
    )]
    pub serial_number: String,
    #[serde(rename = "MB HW version", deserialize_with = "deserialize_string_from_number")]
    pub mb_hw_version: String,
    #[serde(rename = "MB Model")]
    pub mb_model: String,
    #[serde(rename = "MB SW version", deserialize_with = "deserialize_string_from_number")]
    pub mb_sw_version: String,
    #[serde(rename = "IAM SW version", deserialize_with = "deserialize_string_from_number")]
    pub iam_sw_version: String,
}

/// Identity of the unit behind a SAVE Connect module.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub mac: String,
    pub version: UnitVersion,
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn test_read_query() {
    assert_eq!(read_query(&[2001, 12103]), "{%222000%22:1,%2212102%22:1}");
    assert_eq!(read_query(&[]), "{}");
}

#[test]
fn test_write_query() {
    assert_eq!(write_query(2001, 215), "{%222000%22:215}");
    assert_eq!(write_query(2001, -5), "{%222000%22:-5}");
}

#[test]
fn test_deserialize_snapshot() {
    let snapshot = parse_snapshot(r#"{"2000": 215, "12102": "65486", "1110": 0}"#).unwrap();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.get(2000), Some(215));
    assert_eq!(snapshot.get(12102), Some(65486));
    assert_eq!(snapshot.get(1110), Some(0));
    assert_eq!(snapshot.get(1111), None);

    let mut words: Vec<_> = snapshot.iter().collect();
    words.sort();
    assert_eq!(words, [(1110, 0), (2000, 215), (12102, 65486)]);
}

#[test]
fn test_snapshot_rejects_acknowledgement_and_garbage() {
    assert!(matches!(
        parse_snapshot("OK"),
        Err(Error::UnexpectedResponse(body)) if body == "OK"
    ));

    let err = parse_snapshot("<html>").unwrap_err();
    assert!(matches!(err, Error::JSONError(_)));
    assert!(!err.is_communication());

    assert!(matches!(
        parse_snapshot(r#"{"2000": "warm"}"#),
        Err(Error::JSONError(_))
    ));
}

#[test]
fn test_deserialize_unit_version() {
    let json = r#"{
        "System Serial Number": "IAM1234567890",
        "MB HW version": 2,
        "MB Model": "SAVE VTR 300/B",
        "MB SW version": "1.22.0",
        "IAM SW version": "2.0.10"
    }"#;

    let version: UnitVersion = serde_json::from_str(json).unwrap();
    assert_eq!(version.serial_number, "IAM1234567890");
    assert_eq!(version.mb_hw_version, "2");
    assert_eq!(version.mb_model, "SAVE VTR 300/B");
    assert_eq!(version.mb_sw_version, "1.22.0");
    assert_eq!(version.iam_sw_version, "2.0.10");
}
