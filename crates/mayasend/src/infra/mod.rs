//! Infrastructure adapters for sockets, configuration, and logging.

pub mod config;
pub mod logging;
pub mod transport;
