use systemair_save::{Catalog, Client, Error};

// Writes a raw value, e.g. `write_register 192.168.1.20 REG_TC_SP 215` for a supply air setpoint of 21.5 °C.
//
// No scaling or clamping happens here, the value is sent to the unit as given.
#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args
        .next()
        .expect("must pass host/IP of SAVE Connect module as first argument");
    let key = args.next().expect("pass register key as second argument");
    let value: i64 = str::parse(&args.next().expect("pass raw value as third argument"))
        .expect("invalid integer");

    let catalog = Catalog::systemair();
    let register = catalog.try_lookup(&key)?;
    let client = Client::new(host)?;

    let was = client.read_batch(&[register.address]).await?;
    println!("{} was {:?}", register.key, was.get(register.wire_address()));

    client.write(register.address, value).await?;

    let is = client.read_batch(&[register.address]).await?;
    println!("{} is now {:?}", register.key, is.get(register.wire_address()));

    Ok(())
}
