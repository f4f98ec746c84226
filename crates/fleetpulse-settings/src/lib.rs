//! # fleetpulse-settings
//!
//! Configuration for the FleetPulse realtime hub, loaded in three layers
//! (lowest to highest priority):
//! 1. **Compiled defaults**: [`FleetSettings::default()`]
//! 2. **Settings file**: `~/.fleetpulse/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `FLEETPULSE_*` overrides
//!
//! ```no_run
//! let settings = fleetpulse_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
