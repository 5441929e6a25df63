use std::{path::PathBuf, time::Duration};

use clap::Parser;
use humantime_serde::re::humantime::parse_duration;
use systemair_poller::{server, Config, RegisterValue, Result};

#[derive(Parser, Debug)]
#[clap(
    name = "systemair-poller",
    version,
    author,
    about = "Polls a Systemair SAVE unit through its SAVE Connect module"
)]
struct Cli {
    /// Host (and optional port) of the SAVE Connect module
    #[clap(env = "SYSTEMAIR_HOST", required_unless_present = "config")]
    host: Option<String>,

    /// JSON config file. Command line options override its values.
    #[clap(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[clap(short, long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Limit for each HTTP attempt
    #[clap(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Attempts per request while the unit reports it is disconnected
    #[clap(long)]
    attempts: Option<u32>,

    /// Register to poll, by catalog key. Can be repeated.
    #[clap(short, long = "register")]
    registers: Vec<String>,

    /// Write a single register instead of polling, e.g. REG_TC_SP=21.5
    #[clap(long, value_name = "KEY=VALUE", value_parser = parse_assignment)]
    write: Option<(String, RegisterValue)>,
}

fn parse_assignment(s: &str) -> std::result::Result<(String, RegisterValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let value = value.parse().map_err(|e| format!("{value:?}: {e}"))?;
    Ok((key.trim().to_owned(), value))
}

impl Cli {
    fn into_config(self) -> Result<(Config, Option<(String, RegisterValue)>)> {
        let mut config = match (&self.config, self.host) {
            (Some(path), host) => {
                let mut config = Config::from_file(path)?;
                if let Some(host) = host {
                    config.host = host;
                }
                config
            }
            (None, Some(host)) => Config::new(host),
            (None, None) => return Err("no host given".into()),
        };

        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(attempts) = self.attempts {
            config.attempts = attempts;
        }
        if !self.registers.is_empty() {
            config.registers = self.registers;
        }
        Ok((config, self.write))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let (config, write) = Cli::parse().into_config()?;

    match write {
        Some((key, value)) => match server::write(&config, &key, value).await? {
            Some(read_back) => println!("{key} = {read_back}"),
            None => println!("{key} written, but could not be read back"),
        },
        None => server::run(config, tokio::signal::ctrl_c()).await?,
    }

    Ok(())
}
