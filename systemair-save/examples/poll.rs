use std::time::Duration;

use systemair_save::{Catalog, Client, Error, RegisterGroup};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .expect("must pass host/IP of SAVE Connect module as first argument");

    let client = Client::new(host)?;
    let catalog = Catalog::systemair();
    let addresses: Vec<u16> = catalog
        .group(RegisterGroup::Sensor)
        .map(|r| r.address)
        .collect();

    let mut tick = tokio::time::interval(Duration::from_secs(10));
    loop {
        tick.tick().await;
        let snapshot = client.read_batch(&addresses).await?;
        for (wire_address, raw) in snapshot.iter() {
            match catalog.by_address(wire_address.saturating_add(1)) {
                Some(register) => println!("{} = {}", register.key, raw),
                None => println!("{wire_address} = {raw}"),
            }
        }
    }
}
