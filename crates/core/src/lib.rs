pub mod error;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod spawn_utils;

pub use error::{RconError, Result};
pub use logging::init_logging;
pub use model::{
    ActionArgument, Category, Complexity, Device, DeviceIdentity, DiscoveryMethod, Direction,
    Range, ScpdDocument, Service, SoapAction, StateVariable,
};
pub use protocol::Protocol;
