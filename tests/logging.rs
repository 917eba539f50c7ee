//! Global subscriber installation.

use galvo_scan::prelude::*;

#[test]
fn init_logging_is_idempotent() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();
    init_logging(&LoggingConfig::default()).unwrap();
    tracing::info!("subscriber installed");
}
