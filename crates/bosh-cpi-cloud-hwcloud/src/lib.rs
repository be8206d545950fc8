//! HwCloud provider for the BOSH CPI
//!
//! Implements [`bosh_cpi_cloud::ProviderClient`] over the HwCloud
//! EC2-style query API.
//!
//! # Features
//!
//! - Instances, volumes and snapshots
//! - Elastic IPs (vip networks)
//! - Fixed private addresses for manual networks, requested at boot
//!
//! # Requirements
//!
//! - `HWSAccessKeyId` and secret key
//! - Region name and API endpoint URL
//!
//! # Example
//!
//! ```ignore
//! use bosh_cpi_cloud_hwcloud::{ApiConfig, HwCloudApi, HwCloudProvider};
//! use bosh_cpi_cloud::ProviderClient;
//!
//! let api = HwCloudApi::new(ApiConfig::from_env()?)?;
//! let provider = HwCloudProvider::new(api).with_availability_zone(Some("az1".into()));
//!
//! let disk = provider.describe_volume(&"vol-1".into()).await?;
//! ```

pub mod api;
pub mod error;
pub mod provider;

pub use api::{ApiConfig, HwCloudApi};
pub use error::{HwCloudError, Result};
pub use provider::{HwCloudProvider, default_instance_types};
