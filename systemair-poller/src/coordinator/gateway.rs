use async_trait::async_trait;
use systemair_save::{Client, RawSnapshot};

/// The requests a [`Coordinator`](super::Coordinator) needs from a unit.
///
/// Addresses are 1-based register addresses as listed in the catalog.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn read_batch(&self, addresses: &[u16]) -> systemair_save::Result<RawSnapshot>;

    async fn write(&self, address: u16, value: i64) -> systemair_save::Result<()>;
}

#[async_trait]
impl Gateway for Client {
    async fn read_batch(&self, addresses: &[u16]) -> systemair_save::Result<RawSnapshot> {
        Client::read_batch(self, addresses).await
    }

    async fn write(&self, address: u16, value: i64) -> systemair_save::Result<()> {
        Client::write(self, address, value).await
    }
}
