// Core infrastructure modules
pub mod core;

// Connection resolution
pub mod config;
pub mod credentials;
pub mod descriptor;

// Facade and binary support
pub mod connector;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{RawEntry, SearchPaths};
pub use connector::{Connector, ConnectorBuilder};
pub use core::db::{IfExists, InsertMethod, SqlType, Table, Value, WriteOptions};
pub use core::{Result, SqlconnectError};
pub use descriptor::{ConnectOption, ConnectionDescriptor};
