//! Cloud provider trait definition

use crate::error::ProviderError;
use crate::resource::{
    FloatingIpInfo, ImageInfo, KeyPairInfo, ResourceRef, SecurityGroupInfo, SnapshotInfo, VmInfo,
    VolumeInfo,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// IaaS backend abstraction
///
/// Every backend (QingCloud, HwCloud) implements this trait. Describe calls
/// return `Ok(None)` when the resource does not exist; errors are reserved
/// for failed API calls.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Returns the provider name (e.g., "qingcloud", "hwcloud")
    fn name(&self) -> &str;

    /// Region or zone the client operates in
    fn region(&self) -> &str;

    /// Most security groups one instance can carry; `None` when unbounded
    fn max_security_groups(&self) -> Option<usize> {
        None
    }

    /// Drop cached credentials/tokens so the next call authenticates again
    async fn refresh_credentials(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn describe_vm(&self, id: &ResourceRef) -> ProviderResult<Option<VmInfo>>;

    async fn describe_volume(&self, id: &ResourceRef) -> ProviderResult<Option<VolumeInfo>>;

    async fn describe_snapshot(&self, id: &ResourceRef) -> ProviderResult<Option<SnapshotInfo>>;

    async fn describe_image(&self, id: &ResourceRef) -> ProviderResult<Option<ImageInfo>>;

    async fn find_image_by_name(&self, name: &str) -> ProviderResult<Vec<ImageInfo>>;

    async fn find_key_pairs(&self, name: &str) -> ProviderResult<Vec<KeyPairInfo>>;

    async fn list_security_groups(&self) -> ProviderResult<Vec<SecurityGroupInfo>>;

    /// Instance types offered in `region`
    async fn list_instance_types(&self, region: &str) -> ProviderResult<Vec<String>>;

    async fn describe_floating_ip(&self, address: &str) -> ProviderResult<Option<FloatingIpInfo>>;

    async fn run_instance(&self, params: &CreateVmParams) -> ProviderResult<ResourceRef>;

    async fn terminate_instance(&self, id: &ResourceRef) -> ProviderResult<()>;

    async fn restart_instance(&self, id: &ResourceRef) -> ProviderResult<()>;

    async fn create_volume(&self, params: &CreateVolumeParams) -> ProviderResult<ResourceRef>;

    async fn delete_volume(&self, id: &ResourceRef) -> ProviderResult<()>;

    async fn attach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()>;

    async fn detach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()>;

    async fn create_snapshot(&self, disk: &ResourceRef, name: &str)
    -> ProviderResult<ResourceRef>;

    async fn delete_snapshot(&self, id: &ResourceRef) -> ProviderResult<()>;

    async fn delete_image(&self, id: &ResourceRef) -> ProviderResult<()>;

    async fn associate_floating_ip(
        &self,
        floating_ip: &ResourceRef,
        vm: &ResourceRef,
    ) -> ProviderResult<()>;

    async fn dissociate_floating_ip(&self, floating_ip: &ResourceRef) -> ProviderResult<()>;

    /// Register a fixed-address binding for `vm` with the router's DHCP service
    async fn bind_static_address(
        &self,
        router_id: &str,
        vm: &ResourceRef,
        ip: &str,
    ) -> ProviderResult<()>;
}

/// Parameters of a create-instance call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVmParams {
    pub name: String,
    pub image_id: ResourceRef,
    pub instance_type: String,
    pub key_pair: KeyPairInfo,

    /// Primary network identifier (subnet / vxnet)
    pub net_id: Option<String>,

    /// Fixed private address requested for a manual network
    pub fixed_ip: Option<String>,

    /// Resolved security group ids, in request order
    pub security_groups: Vec<String>,

    pub availability_zone: Option<String>,

    /// Base64 encoded bootstrap payload
    pub user_data: String,
}

/// Parameters of a create-volume call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVolumeParams {
    pub name: String,
    pub size_gib: u32,
    pub availability_zone: Option<String>,
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts for rate-limited calls
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: std::time::Duration,

    /// Maximum delay between retries
    pub max_delay: std::time::Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
