use std::{future::Future, time::Duration};

use systemair_save::{Catalog, Client, RegisterDescriptor};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    coordinator::{Coordinator, RegisterValue},
    Error,
};

pub struct Server {
    coordinator: Coordinator<Client>,
    watched: Vec<RegisterDescriptor>,
    interval: Duration,
}

/// Polls the configured unit until `shutdown` resolves.
///
/// Only authentication failures end polling early. Other failures are logged and retried on the next tick.
pub async fn run(config: Config, shutdown: impl Future) -> crate::Result<()> {
    let server = Server::new(&config)?;

    let mut ret = Ok(());

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "server error");
                ret = Err(err)
            } else {
                info!("server finished running")
            }
        }

        _ = shutdown => {
            info!("shutting down");
        }
    }

    ret
}

/// Writes a single register and reads it back.
///
/// Returns `None` when the write succeeded but the value could not be read back.
pub async fn write(
    config: &Config,
    key: &str,
    value: RegisterValue,
) -> crate::Result<Option<RegisterValue>> {
    let catalog = Catalog::systemair();
    let register = *catalog
        .get(key)
        .ok_or_else(|| Error::UnknownRegister(key.to_owned()))?;
    if !register.is_writable() {
        return Err(Error::ReadOnlyRegister(key.to_owned()));
    }

    let coordinator = Coordinator::new(catalog, config.client()?);
    coordinator.write_and_refresh(&register, value).await?;

    if !coordinator.is_available() {
        return Ok(None);
    }
    let read_back = coordinator.value(&register);
    info!(key, %value, %read_back, "Wrote register");
    Ok(Some(read_back))
}

impl Server {
    pub fn new(config: &Config) -> crate::Result<Self> {
        let coordinator = Coordinator::new(Catalog::systemair(), config.client()?);
        let watched = config.watched(coordinator.catalog())?;
        Ok(Self {
            coordinator,
            watched,
            interval: config.interval,
        })
    }

    async fn run(&self) -> crate::Result<()> {
        info!(host = self.coordinator.gateway().host(), "Starting up");
        self.identify().await?;

        for register in &self.watched {
            self.coordinator.register_interest(register);
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.coordinator.poll().await {
                Ok(()) => self.report(),
                Err(error @ Error::Gateway(systemair_save::Error::Authentication { .. })) => {
                    return Err(error)
                }
                Err(error) if error.is_communication() => {
                    warn!(%error, "Unit unavailable, retrying next interval");
                }
                Err(error) => error!(%error, "Poll failed"),
            }
        }
    }

    async fn identify(&self) -> crate::Result<()> {
        match self.coordinator.gateway().device_info().await {
            Ok(info) => {
                info!(
                    mac = %info.mac,
                    serial = %info.version.serial_number,
                    model = %info.version.mb_model,
                    firmware = %info.version.mb_sw_version,
                    "Connected"
                );
                Ok(())
            }
            Err(error @ systemair_save::Error::Authentication { .. }) => Err(error.into()),
            Err(error) => {
                warn!(%error, "Could not identify unit");
                Ok(())
            }
        }
    }

    fn report(&self) {
        debug!(registers = self.watched.len(), "Poll succeeded");
        for register in &self.watched {
            let value = self.coordinator.value(register);
            info!(key = register.key, %value, "{}", register.description);
        }
    }
}
