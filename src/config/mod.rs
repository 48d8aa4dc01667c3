//! Service Configuration Module
//!
//! Data source endpoints, graph sizes, processing knobs and runtime sizing,
//! loaded from a TOML file.
//!
//! ## Loading Order
//!
//! 1. `RSAM_CONFIG` environment variable (path to TOML file)
//! 2. `conf/config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(ServiceConfig::load());
//!
//! // Anywhere in the codebase:
//! let tolerance = config::get().processing.zero_tolerance;
//! ```

mod service_config;
pub mod defaults;
pub mod validation;

pub use service_config::*;

use std::sync::OnceLock;

/// Global service configuration, initialized once at startup.
static SERVICE_CONFIG: OnceLock<ServiceConfig> = OnceLock::new();

/// Initialize the global service configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: ServiceConfig) {
    if SERVICE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global service configuration.
///
/// Falls back to built-in defaults if `init()` has not been called.
pub fn get() -> &'static ServiceConfig {
    SERVICE_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() called before config::init(), using defaults");
        ServiceConfig::default()
    })
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    SERVICE_CONFIG.get().is_some()
}
