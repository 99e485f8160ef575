//! # crew-settings
//!
//! Settings types and loading for the Crew client.
//!
//! Loading order: compiled defaults, then `~/.crew/settings.json`
//! deep-merged over them, then `CREW_*` environment variables on top.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::CrewSettings;
