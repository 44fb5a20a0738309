pub mod analysis;
pub mod batch;
pub mod cache;
pub mod case;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod signal;
pub mod table;

pub use error::{CacheError, ConfigError, DiscoveryError, Error, Result, SignalError};
pub use signal::*;
