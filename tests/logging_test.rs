//! Global subscriber installation.
//!
//! Kept in its own test binary: once a global subscriber is set, nothing
//! else in the process can capture events with `#[traced_test]`.

use iio_writedev::logging::{self, LogFormat, LoggingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    logging::init(LoggingConfig::default()).unwrap();
    logging::init(LoggingConfig::new(Level::DEBUG).with_format(LogFormat::Json)).unwrap();
    tracing::info!("still logging after the second init");
}
