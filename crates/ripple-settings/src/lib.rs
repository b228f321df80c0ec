//! # ripple-settings
//!
//! Layered configuration for the Ripple relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RippleSettings::default()`]
//! 2. **Settings file**: `~/.ripple/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RIPPLE_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
