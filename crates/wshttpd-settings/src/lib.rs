//! # wshttpd-settings
//!
//! Server configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`ServerSettings::default()`])
//! 2. **Settings file** (`~/.wshttpd/settings.json`, deep-merged over defaults)
//! 3. **Environment variables** (`WSHTTPD_*` overrides, highest priority)
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::ServerSettings;
