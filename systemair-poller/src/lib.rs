pub mod config;
pub mod coordinator;
pub mod server;

mod error;
pub use config::Config;
pub use coordinator::{Coordinator, Gateway, RegisterValue};
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
