//! Shared tracing functionality for Spacekit services

pub mod config;
pub mod correlation;
pub mod init;
pub mod metrics;
pub mod prometheus;

pub use correlation::ConnectionId;

pub mod prelude {
    pub use crate::tracing::correlation::ConnectionId;
    pub use crate::tracing::metrics::{Counter, Gauge, Histogram, Timer, counter, gauge, histogram};

    pub use tracing::{Instrument, debug, error, info, instrument, trace, warn};
}
