//! QingCloud provider for the BOSH CPI
//!
//! Implements [`bosh_cpi_cloud::ProviderClient`] over the QingCloud IaaS
//! query API.
//!
//! # Features
//!
//! - Instances, volumes and snapshots
//! - Elastic IPs (vip networks)
//! - Router static DHCP bindings (manual networks)
//!
//! # Requirements
//!
//! - An access key pair with IaaS permissions
//! - The zone the director deploys into (e.g. `pek3a`)
//!
//! # Example
//!
//! ```ignore
//! use bosh_cpi_cloud_qingcloud::{ApiConfig, QingCloudApi, QingCloudProvider};
//! use bosh_cpi_cloud::ProviderClient;
//!
//! let api = QingCloudApi::new(ApiConfig::from_env()?)?;
//! let provider = QingCloudProvider::new(api);
//!
//! let vm = provider.describe_vm(&"i-abcdefgh".into()).await?;
//! ```

pub mod api;
pub mod error;
pub mod provider;

pub use api::{ApiConfig, QINGCLOUD_API_ENDPOINT, QingCloudApi};
pub use error::{QingCloudError, Result};
pub use provider::{QingCloudProvider, default_instance_types};
