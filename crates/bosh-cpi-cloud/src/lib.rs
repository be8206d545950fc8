//! BOSH CPI resource lifecycle
//!
//! Backend-independent core of the CPI: the polling waiter, network role
//! classification, and the lifecycle verbs the director invokes. IaaS
//! backends plug in through [`ProviderClient`]; agent settings live behind
//! [`SettingsStore`].
//!
//! # Supported Providers
//!
//! - **QingCloud**: instances, volumes, snapshots, EIPs, router static bindings
//! - **HwCloud**: instances, volumes, snapshots, elastic IPs (EC2-style query API)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    cpi binary                    │
//! │          (external CPI JSON over stdio)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 bosh-cpi-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │            LifecycleManager               │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │   Network    │  │    Waiter    │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬──────────────┬────────┘
//!         │                 │              │
//! ┌───────▼───────┐ ┌───────▼───────┐ ┌────▼──────┐
//! │   qingcloud   │ │    hwcloud    │ │ registry  │
//! │   provider    │ │   provider    │ │ settings  │
//! └───────────────┘ └───────────────┘ └───────────┘
//! ```

pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod network;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod settings;
pub mod signing;
pub mod waiter;

// Re-exports
pub use error::{CpiError, ProviderError, Result, SettingsError};
pub use lifecycle::{
    DiskSizePolicy, LifecycleManager, LifecycleOptions, StemcellProperties, UserData,
    VmCloudProperties,
};
pub use metadata::{CurrentVmId, HttpMetadataSource, MetadataSource};
pub use network::{
    NetworkConfig, NetworkConfigurator, NetworkEntry, NetworkSpec, PrimaryNetwork, VipNetwork,
};
pub use provider::{
    CreateVmParams, CreateVolumeParams, ProviderClient, ProviderResult, RetryConfig,
};
pub use resource::{
    FloatingIpInfo, ImageInfo, KeyPairInfo, ResourceKind, ResourceRef, ResourceStatus,
    SecurityGroupInfo, SnapshotInfo, SnapshotState, VmInfo, VmState, VolumeInfo, VolumeState,
};
pub use settings::{AgentSettings, DeviceAllocation, MemorySettingsStore, SettingsStore};
pub use signing::QueryParams;
pub use waiter::{CancellationFlag, NoCheckpoint, ResourceWaiter, TaskCheckpoint};
