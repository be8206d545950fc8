//! BOSH registry client
//!
//! The registry is the key-value service guest agents read their settings
//! from on boot. [`RegistryClient`] implements
//! [`bosh_cpi_cloud::SettingsStore`] over its HTTP API with basic auth.

pub mod client;
pub mod error;

pub use client::{RegistryClient, RegistryConfig, decode_settings};
pub use error::{RegistryError, Result};
