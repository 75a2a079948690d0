//! Configuration for the expiry daemon.
//!
//! Settings come from a TOML or JSON file, or inline JSON in the environment,
//! and are converted into the runtime configs `expiry-core` consumes. See
//! [`ExpiryConfig::load_from_env`] for the lookup order.

pub mod models;
pub mod validation;

pub use models::{
    CONFIG_JSON_ENV, CONFIG_PATH_ENV, ConfigSource, ExpiryConfig, StorageSettings, SweepSettings,
    WatchSettings,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, apply_guard_rails};
