pub mod api;
pub mod command;
pub mod error;
pub mod utils;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use api::{DeviceConnector, DeviceSession, Record, RouterTarget, TcpDeviceConnector, Verb};
pub use command::{DeviceClient, Outcome};
pub use error::DeviceError;
