//! CPI verbs driven against a [`ProviderClient`]
//!
//! Each verb runs to completion: it issues provider calls, waits for the
//! resulting state through the [`ResourceWaiter`], and keeps the VM's agent
//! settings in step. Deletes are idempotent on absence; creates and attaches
//! fail fast on any missing dependency.
//!
//! Operations on the same resource are not coordinated here. The caller
//! (the director) serializes per-VM work; operations on different resources
//! are independent.

use crate::error::{CpiError, Result, SettingsError};
use crate::metadata::CurrentVmId;
use crate::network::{NetworkConfig, NetworkConfigurator, NetworkSpec, dns_servers};
use crate::provider::{CreateVmParams, CreateVolumeParams, ProviderClient, RetryConfig};
use crate::resource::{
    ImageInfo, KeyPairInfo, ResourceKind, ResourceRef, ResourceStatus, SnapshotState, VmInfo,
    VmState, VolumeInfo, VolumeState,
};
use crate::retry::{call_provider, describe_provider, retry_when};
use crate::settings::{AgentSettings, EPHEMERAL_DISK_DEVICE, SettingsStore, select_device_name};
use crate::waiter::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STATE_TIMEOUT, ResourceWaiter, TaskCheckpoint,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts allowed for an attach rejected because the volume is not ready yet
pub const ATTACH_CONFLICT_ATTEMPTS: u32 = 15;
const ATTACH_CONFLICT_DELAY: Duration = Duration::from_secs(2);

const MIB_PER_GIB: u64 = 1024;

/// Disk size constraints of a backend, in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSizePolicy {
    pub granularity_mib: u64,
    pub min_mib: u64,
    pub max_mib: u64,
}

impl DiskSizePolicy {
    pub const QINGCLOUD: Self = Self {
        granularity_mib: 10,
        min_mib: 10 * MIB_PER_GIB,
        max_mib: 500 * MIB_PER_GIB,
    };

    pub const HWCLOUD: Self = Self {
        granularity_mib: 10,
        min_mib: MIB_PER_GIB,
        max_mib: 1000 * MIB_PER_GIB,
    };

    /// Validate a requested size and convert it to whole GiB, rounding up
    pub fn validate(&self, size_mib: u64) -> Result<u32> {
        if size_mib == 0 {
            return Err(CpiError::InvalidArgument(
                "disk size must be a positive integer".to_string(),
            ));
        }
        if size_mib % self.granularity_mib != 0 {
            return Err(CpiError::InvalidArgument(format!(
                "disk size {size_mib} MiB must be divisible by {}",
                self.granularity_mib
            )));
        }
        if size_mib < self.min_mib {
            return Err(CpiError::InvalidArgument(format!(
                "minimum disk size is {} GiB",
                self.min_mib / MIB_PER_GIB
            )));
        }
        if size_mib > self.max_mib {
            return Err(CpiError::InvalidArgument(format!(
                "maximum disk size is {} GiB",
                self.max_mib / MIB_PER_GIB
            )));
        }

        u32::try_from(size_mib.div_ceil(MIB_PER_GIB))
            .map_err(|_| CpiError::InvalidArgument(format!("disk size {size_mib} MiB too large")))
    }
}

impl Default for DiskSizePolicy {
    fn default() -> Self {
        Self::QINGCLOUD
    }
}

/// Backend-independent knobs of the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub availability_zone: Option<String>,
    pub default_key_name: Option<String>,
    pub default_security_groups: Vec<String>,
    pub poll_interval: Duration,
    pub state_timeout: Duration,
    pub disk_policy: DiskSizePolicy,
    pub retry: RetryConfig,

    /// Instance types come with a local ephemeral disk at `/dev/sdb`
    pub ephemeral_disk: bool,

    /// Agent properties merged into every VM's initial settings
    pub agent_properties: Map<String, Value>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            availability_zone: None,
            default_key_name: None,
            default_security_groups: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state_timeout: DEFAULT_STATE_TIMEOUT,
            disk_policy: DiskSizePolicy::default(),
            retry: RetryConfig::default(),
            ephemeral_disk: true,
            agent_properties: Map::new(),
        }
    }
}

/// `resource_pool` cloud properties of create_vm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmCloudProperties {
    pub instance_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stemcell cloud properties of create_stemcell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemcellProperties {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Pre-uploaded provider image to use as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Bootstrap payload handed to the instance as user data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub registry: RegistryEndpoint,
    pub server: ServerName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openssh: Option<OpenSsh>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Nameservers>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSsh {
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nameservers {
    pub nameserver: Vec<String>,
}

impl UserData {
    pub fn new(
        registry_endpoint: &str,
        server_name: &str,
        public_key: Option<&str>,
        dns: Option<Vec<String>>,
    ) -> Self {
        Self {
            registry: RegistryEndpoint {
                endpoint: registry_endpoint.to_string(),
            },
            server: ServerName {
                name: server_name.to_string(),
            },
            openssh: public_key.map(|key| OpenSsh {
                public_key: key.to_string(),
            }),
            dns: dns.map(|nameserver| Nameservers { nameserver }),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CpiError::InvalidArgument(format!("cannot encode user data: {e}")))?;
        Ok(BASE64.encode(json))
    }
}

/// Resource lifecycle manager for one backend
pub struct LifecycleManager {
    provider: Arc<dyn ProviderClient>,
    settings: Arc<dyn SettingsStore>,
    options: LifecycleOptions,
    waiter: ResourceWaiter,
    current_vm: Option<CurrentVmId>,
}

impl LifecycleManager {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        settings: Arc<dyn SettingsStore>,
        options: LifecycleOptions,
        checkpoint: Arc<dyn TaskCheckpoint>,
    ) -> Self {
        let waiter = ResourceWaiter::new(options.poll_interval, options.state_timeout, checkpoint);
        Self {
            provider,
            settings,
            options,
            waiter,
            current_vm: None,
        }
    }

    /// Enable `current_vm_id` lookups
    pub fn with_current_vm_id(mut self, current_vm: CurrentVmId) -> Self {
        self.current_vm = Some(current_vm);
        self
    }

    pub fn provider(&self) -> &dyn ProviderClient {
        self.provider.as_ref()
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    fn network_configurator(&self) -> NetworkConfigurator<'_> {
        NetworkConfigurator::new(self.provider.as_ref(), &self.options.retry, &self.waiter)
    }

    // ------------------------------------------------------------------
    // VMs
    // ------------------------------------------------------------------

    /// Create a VM and write its initial agent settings
    pub async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_id: &ResourceRef,
        cloud_properties: &VmCloudProperties,
        networks: &NetworkSpec,
        env: Option<Value>,
    ) -> Result<ResourceRef> {
        let name = format!("vm-{}", Uuid::new_v4());
        info!("Creating VM `{}' for agent `{}'", name, agent_id);

        let network_config = NetworkConfig::classify(networks)?;
        let configurator = self.network_configurator();

        let group_names = network_config.security_groups(&self.options.default_security_groups);
        let security_groups = configurator.resolve_security_groups(&group_names).await?;
        if let Some(max) = self.provider.max_security_groups() {
            if security_groups.len() > max {
                return Err(CpiError::InvalidArgument(format!(
                    "{} instances accept at most {max} security group(s), got [{}]",
                    self.provider.name(),
                    group_names.join(", ")
                )));
            }
        }

        let image = self.require_image(stemcell_id).await?;
        self.require_instance_type(&cloud_properties.instance_type)
            .await?;
        let key_pair = self
            .resolve_key_pair(cloud_properties.key_name.as_deref())
            .await?;

        let user_data = UserData::new(
            self.settings.endpoint(),
            &name,
            key_pair.public_key.as_deref(),
            dns_servers(networks),
        )
        .encode()?;

        let nic = network_config.nic();
        let params = CreateVmParams {
            name: name.clone(),
            image_id: image.id,
            instance_type: cloud_properties.instance_type.clone(),
            key_pair,
            net_id: nic.net_id,
            fixed_ip: nic.fixed_ip,
            security_groups: security_groups.iter().map(|sg| sg.id.to_string()).collect(),
            availability_zone: cloud_properties
                .availability_zone
                .clone()
                .or_else(|| self.options.availability_zone.clone()),
            user_data,
        };

        let provider = self.provider.as_ref();
        let params = &params;
        let vm_id = call_provider(provider, &self.options.retry, "run_instance", move || {
            provider.run_instance(params)
        })
        .await?;
        info!("VM `{}' created as `{}', waiting for running", name, vm_id);

        if let Err(e) = self.wait_vm(&vm_id, &[VmState::Running]).await {
            warn!("VM `{}' did not reach running ({}), terminating", vm_id, e);
            self.terminate_best_effort(&vm_id).await;
            return Err(match e {
                CpiError::Timeout { .. } | CpiError::TerminalState { .. } => {
                    CpiError::CreationFailed {
                        vm: vm_id,
                        reason: e.to_string(),
                    }
                }
                other => other,
            });
        }

        let vm = self.require_vm(&vm_id).await?;
        configurator.apply(&network_config, &vm).await?;

        let mut settings = AgentSettings::new(&name, agent_id, networks.clone(), env);
        if self.options.ephemeral_disk {
            settings = settings.with_ephemeral_disk(EPHEMERAL_DISK_DEVICE);
        }
        let settings = settings.with_agent_properties(&self.options.agent_properties);
        self.settings.update(&name, &settings).await?;

        info!("VM `{}' ({}) is ready", vm_id, name);
        Ok(vm_id)
    }

    /// Terminate a VM and drop its settings; absent VMs are skipped
    pub async fn delete_vm(&self, vm_id: &ResourceRef) -> Result<()> {
        let vm = match self.describe_vm(vm_id).await? {
            Some(vm) if !vm.state.is_gone() => vm,
            _ => {
                info!("VM `{}' not found, skipping delete", vm_id);
                return Ok(());
            }
        };

        info!("Deleting VM `{}' ({})", vm_id, vm.name);
        let provider = self.provider.as_ref();
        call_provider(provider, &self.options.retry, "terminate_instance", move || {
            provider.terminate_instance(vm_id)
        })
        .await?;

        self.wait_vm(
            vm_id,
            &[VmState::Terminated, VmState::Ceased, VmState::NoExist],
        )
        .await?;

        match self.settings.delete(&vm.name).await {
            Ok(()) => {}
            Err(SettingsError::NotFound(_)) => {
                debug!("No settings stored for `{}'", vm.name);
            }
            Err(e) => return Err(e.into()),
        }

        info!("VM `{}' deleted", vm_id);
        Ok(())
    }

    pub async fn has_vm(&self, vm_id: &ResourceRef) -> Result<bool> {
        Ok(self
            .describe_vm(vm_id)
            .await?
            .is_some_and(|vm| !vm.state.is_gone()))
    }

    pub async fn reboot_vm(&self, vm_id: &ResourceRef) -> Result<()> {
        self.require_vm(vm_id).await?;

        info!("Rebooting VM `{}'", vm_id);
        let provider = self.provider.as_ref();
        call_provider(provider, &self.options.retry, "restart_instance", move || {
            provider.restart_instance(vm_id)
        })
        .await?;

        self.wait_vm(vm_id, &[VmState::Running]).await?;
        Ok(())
    }

    /// Apply a new network spec to a running VM
    ///
    /// Changes that would require recreating the VM (security groups or the
    /// fixed private address) fail with `NotSupported`.
    pub async fn configure_networks(
        &self,
        vm_id: &ResourceRef,
        networks: &NetworkSpec,
    ) -> Result<()> {
        let vm = self.require_vm(vm_id).await?;
        let network_config = NetworkConfig::classify(networks)?;
        let configurator = self.network_configurator();

        let group_names = network_config.security_groups(&self.options.default_security_groups);
        let desired = configurator.resolve_security_groups(&group_names).await?;
        let unchanged = desired.len() == vm.security_groups.len()
            && desired.iter().all(|sg| {
                vm.security_groups
                    .iter()
                    .any(|current| *current == sg.name || current.as_str() == sg.id.as_str())
            });
        if !unchanged {
            return Err(CpiError::NotSupported(format!(
                "security groups change requires VM recreation: current [{}], desired [{}]",
                vm.security_groups.join(", "),
                group_names.join(", ")
            )));
        }

        if let Some(ip) = network_config.private_ip() {
            if vm.private_ip.as_deref() != Some(ip) {
                return Err(CpiError::NotSupported(format!(
                    "IP address change requires VM recreation: {} to {}",
                    vm.private_ip.as_deref().unwrap_or("none"),
                    ip
                )));
            }
        }

        configurator.apply(&network_config, &vm).await?;

        let mut settings = self.settings.read(&vm.name).await?;
        settings.networks = networks.clone();
        self.settings.update(&vm.name, &settings).await?;

        info!("Networks of VM `{}' configured", vm_id);
        Ok(())
    }

    /// Id of the VM the CPI runs on
    pub async fn current_vm_id(&self) -> Result<ResourceRef> {
        match &self.current_vm {
            Some(current) => Ok(current.get().await?),
            None => Err(CpiError::NotSupported(
                "current_vm_id: no metadata source configured".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Disks
    // ------------------------------------------------------------------

    pub async fn create_disk(
        &self,
        size_mib: u64,
        vm_locality: Option<&ResourceRef>,
    ) -> Result<ResourceRef> {
        let size_gib = self.options.disk_policy.validate(size_mib)?;

        if let Some(vm_id) = vm_locality {
            debug!("Disk placement hint: VM `{}'", vm_id);
        }

        let params = CreateVolumeParams {
            name: format!("disk-{}", Uuid::new_v4()),
            size_gib,
            availability_zone: self.options.availability_zone.clone(),
        };
        info!("Creating {} GiB disk `{}'", size_gib, params.name);

        let provider = self.provider.as_ref();
        let params = &params;
        let disk_id = call_provider(provider, &self.options.retry, "create_volume", move || {
            provider.create_volume(params)
        })
        .await?;

        self.wait_volume(&disk_id, &[VolumeState::Available])
            .await?;
        info!("Disk `{}' created", disk_id);
        Ok(disk_id)
    }

    pub async fn delete_disk(&self, disk_id: &ResourceRef) -> Result<()> {
        let volume = match self.describe_volume(disk_id).await? {
            Some(volume) if !volume.state.is_gone() => volume,
            _ => {
                info!("Disk `{}' not found, skipping delete", disk_id);
                return Ok(());
            }
        };

        if volume.state != VolumeState::Available {
            return Err(CpiError::CloudError(format!(
                "Cannot delete volume `{}', state is {}",
                disk_id, volume.state
            )));
        }

        info!("Deleting disk `{}'", disk_id);
        let provider = self.provider.as_ref();
        call_provider(provider, &self.options.retry, "delete_volume", move || {
            provider.delete_volume(disk_id)
        })
        .await?;

        self.wait_volume(
            disk_id,
            &[VolumeState::Deleted, VolumeState::Ceased, VolumeState::NoExist],
        )
        .await?;
        Ok(())
    }

    pub async fn has_disk(&self, disk_id: &ResourceRef) -> Result<bool> {
        Ok(self
            .describe_volume(disk_id)
            .await?
            .is_some_and(|volume| !volume.state.is_gone()))
    }

    /// Attach a disk and return the guest device path
    ///
    /// Attaching a disk that is already attached to the same VM returns the
    /// recorded device path without another provider call.
    pub async fn attach_disk(&self, vm_id: &ResourceRef, disk_id: &ResourceRef) -> Result<String> {
        let vm = self.require_vm(vm_id).await?;
        let volume = self.require_volume(disk_id).await?;
        let mut settings = self.settings.read(&vm.name).await?;

        match &volume.attached_vm {
            Some(holder) if holder == vm_id => {
                if let Some(device) = settings.disks.persistent.get(disk_id.as_str()) {
                    info!(
                        "Disk `{}' already attached to `{}' at {}",
                        disk_id, vm_id, device
                    );
                    return Ok(device.clone());
                }
            }
            Some(holder) => {
                return Err(CpiError::CloudError(format!(
                    "Disk `{disk_id}' is in use by `{holder}'"
                )));
            }
            None if volume.state == VolumeState::InUse => {
                return Err(CpiError::CloudError(format!(
                    "Disk `{disk_id}' is in use"
                )));
            }
            None => {}
        }

        let device = select_device_name(&settings.disks.persistent)
            .ok_or_else(|| CpiError::CloudError(format!("too many disks attached to `{vm_id}'")))?;

        if volume.attached_vm.is_none() {
            info!("Attaching disk `{}' to `{}' as {}", disk_id, vm_id, device);
            let provider = self.provider.as_ref();
            let retry = &self.options.retry;
            retry_when(
                ATTACH_CONFLICT_ATTEMPTS,
                ATTACH_CONFLICT_DELAY,
                "attach_volume",
                |e| matches!(e, crate::error::ProviderError::Conflict(_)),
                move || {
                    call_provider(provider, retry, "attach_volume", move || {
                        provider.attach_volume(disk_id, vm_id)
                    })
                },
            )
            .await?;

            self.wait_volume(disk_id, &[VolumeState::InUse]).await?;
        } else {
            warn!(
                "Disk `{}' attached to `{}' without a device record, recording {}",
                disk_id, vm_id, device
            );
        }

        settings
            .disks
            .persistent
            .insert(disk_id.to_string(), device.clone());
        self.settings.update(&vm.name, &settings).await?;

        Ok(device)
    }

    pub async fn detach_disk(&self, vm_id: &ResourceRef, disk_id: &ResourceRef) -> Result<()> {
        let vm = self.require_vm(vm_id).await?;
        let volume = self.require_volume(disk_id).await?;

        if volume.attached_vm.as_ref() != Some(vm_id) {
            return Err(CpiError::NotAttached {
                disk: disk_id.clone(),
                vm: vm_id.clone(),
                attached_to: volume.attached_vm,
            });
        }

        info!("Detaching disk `{}' from `{}'", disk_id, vm_id);
        let provider = self.provider.as_ref();
        call_provider(provider, &self.options.retry, "detach_volume", move || {
            provider.detach_volume(disk_id, vm_id)
        })
        .await?;

        self.wait_volume(disk_id, &[VolumeState::Available])
            .await?;

        let mut settings = self.settings.read(&vm.name).await?;
        if settings.disks.persistent.remove(disk_id.as_str()).is_some() {
            self.settings.update(&vm.name, &settings).await?;
        }
        Ok(())
    }

    /// Persistent disks recorded for a VM
    pub async fn get_disks(&self, vm_id: &ResourceRef) -> Result<Vec<ResourceRef>> {
        let vm = self.require_vm(vm_id).await?;
        let settings = self.settings.read(&vm.name).await?;
        Ok(settings
            .disks
            .persistent
            .keys()
            .map(|id| ResourceRef::new(id.as_str()))
            .collect())
    }

    // ------------------------------------------------------------------
    // Snapshots and stemcells
    // ------------------------------------------------------------------

    pub async fn snapshot_disk(&self, disk_id: &ResourceRef, metadata: &Value) -> Result<ResourceRef> {
        self.require_volume(disk_id).await?;
        debug!("Snapshot metadata for `{}': {}", disk_id, metadata);

        let name = format!("snapshot-{}", Uuid::new_v4());
        info!("Creating snapshot `{}' of disk `{}'", name, disk_id);

        let provider = self.provider.as_ref();
        let name = name.as_str();
        let snapshot_id = call_provider(provider, &self.options.retry, "create_snapshot", move || {
            provider.create_snapshot(disk_id, name)
        })
        .await?;

        self.wait_snapshot(&snapshot_id, &[SnapshotState::Available])
            .await?;
        Ok(snapshot_id)
    }

    pub async fn delete_snapshot(&self, snapshot_id: &ResourceRef) -> Result<()> {
        let provider = self.provider.as_ref();
        let retry = &self.options.retry;
        let snapshot = describe_provider(provider, retry, "describe_snapshot", move || {
            provider.describe_snapshot(snapshot_id)
        })
        .await?;

        if !snapshot.is_some_and(|s| !s.state.is_gone()) {
            info!("Snapshot `{}' not found, skipping delete", snapshot_id);
            return Ok(());
        }

        info!("Deleting snapshot `{}'", snapshot_id);
        call_provider(provider, &self.options.retry, "delete_snapshot", move || {
            provider.delete_snapshot(snapshot_id)
        })
        .await?;

        self.wait_snapshot(
            snapshot_id,
            &[
                SnapshotState::Ceased,
                SnapshotState::Deleted,
                SnapshotState::NoExist,
            ],
        )
        .await?;
        Ok(())
    }

    /// Resolve a stemcell to an existing provider image
    pub async fn create_stemcell(&self, properties: &StemcellProperties) -> Result<ResourceRef> {
        if let Some(image_id) = &properties.image_id {
            let image = self.require_image(&ResourceRef::new(image_id.as_str())).await?;
            info!("Using image `{}' ({})", image.id, image.name);
            return Ok(image.id);
        }

        if properties.name.is_empty() {
            return Err(CpiError::InvalidArgument(
                "stemcell properties must contain a name or image_id".to_string(),
            ));
        }

        let provider = self.provider.as_ref();
        let name = properties.name.as_str();
        let images = call_provider(provider, &self.options.retry, "find_image_by_name", move || {
            provider.find_image_by_name(name)
        })
        .await?;

        let image = images
            .into_iter()
            .next()
            .ok_or_else(|| CpiError::not_found(ResourceKind::Image, name))?;
        info!("Using image `{}' for stemcell `{}'", image.id, name);
        Ok(image.id)
    }

    pub async fn delete_stemcell(&self, image_id: &ResourceRef) -> Result<()> {
        let provider = self.provider.as_ref();
        let image = describe_provider(provider, &self.options.retry, "describe_image", move || {
            provider.describe_image(image_id)
        })
        .await?;

        if image.is_none() {
            info!("Image `{}' not found, skipping delete", image_id);
            return Ok(());
        }

        info!("Deleting image `{}'", image_id);
        call_provider(provider, &self.options.retry, "delete_image", move || {
            provider.delete_image(image_id)
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn describe_vm(&self, vm_id: &ResourceRef) -> Result<Option<VmInfo>> {
        let provider = self.provider.as_ref();
        Ok(
            describe_provider(provider, &self.options.retry, "describe_vm", move || {
                provider.describe_vm(vm_id)
            })
            .await?,
        )
    }

    async fn describe_volume(&self, disk_id: &ResourceRef) -> Result<Option<VolumeInfo>> {
        let provider = self.provider.as_ref();
        Ok(
            describe_provider(provider, &self.options.retry, "describe_volume", move || {
                provider.describe_volume(disk_id)
            })
            .await?,
        )
    }

    async fn require_vm(&self, vm_id: &ResourceRef) -> Result<VmInfo> {
        match self.describe_vm(vm_id).await? {
            Some(vm) if !vm.state.is_gone() => Ok(vm),
            _ => Err(CpiError::not_found(ResourceKind::Vm, vm_id.as_str())),
        }
    }

    async fn require_volume(&self, disk_id: &ResourceRef) -> Result<VolumeInfo> {
        match self.describe_volume(disk_id).await? {
            Some(volume) if !volume.state.is_gone() => Ok(volume),
            _ => Err(CpiError::not_found(ResourceKind::Volume, disk_id.as_str())),
        }
    }

    async fn require_image(&self, image_id: &ResourceRef) -> Result<ImageInfo> {
        let provider = self.provider.as_ref();
        describe_provider(provider, &self.options.retry, "describe_image", move || {
            provider.describe_image(image_id)
        })
        .await?
        .ok_or_else(|| CpiError::not_found(ResourceKind::Image, image_id.as_str()))
    }

    async fn require_instance_type(&self, instance_type: &str) -> Result<()> {
        let provider = self.provider.as_ref();
        let region = provider.region();
        let offered = call_provider(provider, &self.options.retry, "list_instance_types", move || {
            provider.list_instance_types(region)
        })
        .await?;

        if offered.iter().any(|t| t == instance_type) {
            Ok(())
        } else {
            Err(CpiError::not_found(ResourceKind::InstanceType, instance_type))
        }
    }

    async fn resolve_key_pair(&self, explicit: Option<&str>) -> Result<KeyPairInfo> {
        let name = explicit
            .or(self.options.default_key_name.as_deref())
            .ok_or_else(|| {
                CpiError::InvalidArgument("key_name or default_key_name required".to_string())
            })?;

        let provider = self.provider.as_ref();
        let mut matches = call_provider(provider, &self.options.retry, "find_key_pairs", move || {
            provider.find_key_pairs(name)
        })
        .await?;

        if matches.len() != 1 {
            return Err(CpiError::not_found(ResourceKind::KeyPair, name));
        }
        Ok(matches.remove(0))
    }

    async fn terminate_best_effort(&self, vm_id: &ResourceRef) {
        let provider = self.provider.as_ref();
        if let Err(e) = call_provider(provider, &self.options.retry, "terminate_instance", move || {
            provider.terminate_instance(vm_id)
        })
        .await
        {
            warn!("Cleanup of VM `{}' failed: {}", vm_id, e);
        }
    }

    async fn wait_vm(&self, vm_id: &ResourceRef, targets: &[VmState]) -> Result<VmState> {
        self.waiter
            .wait(ResourceKind::Vm, vm_id.as_str(), targets, move || async move {
                Ok(self
                    .describe_vm(vm_id)
                    .await?
                    .map(|vm| vm.state)
                    .unwrap_or(VmState::ABSENT))
            })
            .await
    }

    async fn wait_volume(
        &self,
        disk_id: &ResourceRef,
        targets: &[VolumeState],
    ) -> Result<VolumeState> {
        self.waiter
            .wait(ResourceKind::Volume, disk_id.as_str(), targets, move || async move {
                Ok(self
                    .describe_volume(disk_id)
                    .await?
                    .map(|volume| volume.state)
                    .unwrap_or(VolumeState::ABSENT))
            })
            .await
    }

    async fn wait_snapshot(
        &self,
        snapshot_id: &ResourceRef,
        targets: &[SnapshotState],
    ) -> Result<SnapshotState> {
        let provider = self.provider.as_ref();
        let retry = &self.options.retry;
        self.waiter
            .wait(
                ResourceKind::Snapshot,
                snapshot_id.as_str(),
                targets,
                move || async move {
                    let snapshot = describe_provider(provider, retry, "describe_snapshot", move || {
                        provider.describe_snapshot(snapshot_id)
                    })
                    .await?;
                    Ok(snapshot.map(|s| s.state).unwrap_or(SnapshotState::ABSENT))
                },
            )
            .await
    }
}
