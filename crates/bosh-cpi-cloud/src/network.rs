//! Network role classification and application
//!
//! A VM has exactly one primary interface, addressed either dynamically
//! (DHCP) or manually (fixed IP), plus at most one floating "vip" address
//! that the guest itself is not aware of. The director sends a free-form
//! mapping of networks; [`NetworkConfig::classify`] turns it into those roles
//! and rejects anything the backends cannot express.

use crate::error::{CpiError, Result};
use crate::provider::{ProviderClient, RetryConfig};
use crate::resource::{ResourceKind, ResourceStatus, SecurityGroupInfo, VmInfo, VmState};
use crate::retry::{call_provider, describe_provider};
use crate::waiter::ResourceWaiter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Network name → network entry, as sent by the director
pub type NetworkSpec = BTreeMap<String, NetworkEntry>;

/// One network entry of a [`NetworkSpec`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// "dynamic", "manual" or "vip"; absent means manual
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default: Vec<String>,

    #[serde(default)]
    pub cloud_properties: NetworkCloudProperties,

    /// Fields the agent understands but the CPI passes through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCloudProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The VM's single primary interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryNetwork {
    Dynamic {
        name: String,
        net_id: Option<String>,
    },
    Manual {
        name: String,
        net_id: String,
        ip: String,
        router_id: Option<String>,
    },
}

impl PrimaryNetwork {
    pub fn name(&self) -> &str {
        match self {
            PrimaryNetwork::Dynamic { name, .. } | PrimaryNetwork::Manual { name, .. } => name,
        }
    }

    pub fn net_id(&self) -> Option<&str> {
        match self {
            PrimaryNetwork::Dynamic { net_id, .. } => net_id.as_deref(),
            PrimaryNetwork::Manual { net_id, .. } => Some(net_id),
        }
    }
}

/// Floating address associated after creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipNetwork {
    pub name: String,
    pub ip: String,
}

/// NIC parameters for the create-instance call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicParams {
    pub net_id: Option<String>,
    pub fixed_ip: Option<String>,
}

/// Classified network roles of one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub primary: PrimaryNetwork,
    pub vip: Option<VipNetwork>,
    security_groups: Vec<String>,
}

const NETWORK_CARDINALITY: &str = "must have exactly one dynamic or manual network";

impl NetworkConfig {
    /// Classify a network spec into primary and vip roles
    pub fn classify(spec: &NetworkSpec) -> Result<Self> {
        let mut primary: Option<PrimaryNetwork> = None;
        let mut vip: Option<VipNetwork> = None;
        let mut security_groups = Vec::new();

        for (name, entry) in spec {
            let network_type = entry.network_type.as_deref().unwrap_or("manual");

            match network_type {
                "dynamic" => {
                    if primary.is_some() {
                        return Err(CpiError::InvalidSpec(NETWORK_CARDINALITY.to_string()));
                    }
                    primary = Some(PrimaryNetwork::Dynamic {
                        name: name.clone(),
                        net_id: entry.cloud_properties.net_id.clone(),
                    });
                }
                "manual" => {
                    if primary.is_some() {
                        return Err(CpiError::InvalidSpec(NETWORK_CARDINALITY.to_string()));
                    }
                    let net_id = entry.cloud_properties.net_id.clone().ok_or_else(|| {
                        CpiError::InvalidSpec("manual network must have net_id".to_string())
                    })?;
                    let ip = non_empty(entry.ip.as_deref()).ok_or_else(|| {
                        CpiError::InvalidSpec(format!("manual network `{name}' must have an ip"))
                    })?;
                    primary = Some(PrimaryNetwork::Manual {
                        name: name.clone(),
                        net_id,
                        ip,
                        router_id: entry.cloud_properties.router_id.clone(),
                    });
                }
                "vip" => {
                    if vip.is_some() {
                        return Err(CpiError::InvalidSpec("more than one vip network".to_string()));
                    }
                    let ip = non_empty(entry.ip.as_deref()).ok_or_else(|| {
                        CpiError::InvalidSpec(format!("no IP provided for vip network `{name}'"))
                    })?;
                    vip = Some(VipNetwork {
                        name: name.clone(),
                        ip,
                    });
                }
                other => {
                    return Err(CpiError::InvalidSpec(format!(
                        "invalid network type `{other}': can only handle `dynamic', `manual' or `vip' network types"
                    )));
                }
            }

            security_groups.extend(entry.cloud_properties.security_groups.iter().cloned());
        }

        let primary = primary.ok_or_else(|| {
            CpiError::InvalidSpec("at least one dynamic or manual network required".to_string())
        })?;

        security_groups.sort();
        security_groups.dedup();

        Ok(Self {
            primary,
            vip,
            security_groups,
        })
    }

    /// Security groups named by the networks, or `defaults` when they name none
    pub fn security_groups(&self, defaults: &[String]) -> Vec<String> {
        if self.security_groups.is_empty() {
            let mut groups = defaults.to_vec();
            groups.sort();
            groups.dedup();
            groups
        } else {
            self.security_groups.clone()
        }
    }

    /// Fixed private address of a manual network
    pub fn private_ip(&self) -> Option<&str> {
        match &self.primary {
            PrimaryNetwork::Manual { ip, .. } => Some(ip),
            PrimaryNetwork::Dynamic { .. } => None,
        }
    }

    pub fn nic(&self) -> NicParams {
        NicParams {
            net_id: self.primary.net_id().map(str::to_string),
            fixed_ip: self.private_ip().map(str::to_string),
        }
    }
}

/// DNS servers of the first network entry that lists any
pub fn dns_servers(spec: &NetworkSpec) -> Option<Vec<String>> {
    spec.values()
        .filter_map(|entry| entry.dns.as_ref())
        .find(|servers| !servers.is_empty())
        .cloned()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Applies classified network roles to a VM through the provider
pub struct NetworkConfigurator<'a> {
    provider: &'a dyn ProviderClient,
    retry: &'a RetryConfig,
    waiter: &'a ResourceWaiter,
}

impl<'a> NetworkConfigurator<'a> {
    pub fn new(
        provider: &'a dyn ProviderClient,
        retry: &'a RetryConfig,
        waiter: &'a ResourceWaiter,
    ) -> Self {
        Self {
            provider,
            retry,
            waiter,
        }
    }

    /// Check that every group name exists in the provider's current set
    pub async fn resolve_security_groups(
        &self,
        names: &[String],
    ) -> Result<Vec<SecurityGroupInfo>> {
        let provider = self.provider;
        let existing = call_provider(provider, self.retry, "list_security_groups", move || {
            provider.list_security_groups()
        })
        .await?;

        names
            .iter()
            .map(|name| {
                existing
                    .iter()
                    .find(|sg| sg.name == *name || sg.id.as_str() == name)
                    .cloned()
                    .ok_or_else(|| CpiError::not_found(ResourceKind::SecurityGroup, name.clone()))
            })
            .collect()
    }

    /// Apply the primary network, then reconcile the floating address
    pub async fn apply(&self, config: &NetworkConfig, vm: &VmInfo) -> Result<()> {
        match &config.primary {
            PrimaryNetwork::Dynamic { name, .. } => {
                debug!("Dynamic network `{}' needs no configuration", name);
            }
            PrimaryNetwork::Manual {
                name,
                ip,
                router_id: Some(router_id),
                ..
            } => {
                self.bind_static_address(name, router_id, ip, vm).await?;
            }
            PrimaryNetwork::Manual { name, .. } => {
                debug!(
                    "Manual network `{}' has no router, fixed IP was requested at creation",
                    name
                );
            }
        }

        match &config.vip {
            Some(vip) => self.associate_vip(vip, vm).await,
            None => self.dissociate_stale_vip(vm).await,
        }
    }

    async fn bind_static_address(
        &self,
        network: &str,
        router_id: &str,
        ip: &str,
        vm: &VmInfo,
    ) -> Result<()> {
        let provider = self.provider;
        let vm_id = &vm.id;

        info!(
            "Binding `{}' to `{}' on router `{}' for manual network `{}'",
            ip, vm_id, router_id, network
        );
        call_provider(provider, self.retry, "bind_static_address", move || {
            provider.bind_static_address(router_id, vm_id, ip)
        })
        .await?;

        info!("Restarting `{}' to pick up fixed address", vm_id);
        call_provider(provider, self.retry, "restart_instance", move || {
            provider.restart_instance(vm_id)
        })
        .await?;

        let retry = self.retry;
        self.waiter
            .wait(
                ResourceKind::Vm,
                vm_id.as_str(),
                &[VmState::Running],
                move || async move {
                    let described = describe_provider(provider, retry, "describe_vm", move || {
                        provider.describe_vm(vm_id)
                    })
                    .await?;
                    Ok(described.map(|vm| vm.state).unwrap_or(VmState::ABSENT))
                },
            )
            .await?;
        Ok(())
    }

    async fn associate_vip(&self, vip: &VipNetwork, vm: &VmInfo) -> Result<()> {
        let provider = self.provider;
        let address = vip.ip.as_str();

        let floating_ip = describe_provider(provider, self.retry, "describe_floating_ip", move || {
            provider.describe_floating_ip(address)
        })
        .await?
        .ok_or_else(|| CpiError::not_found(ResourceKind::FloatingIp, address))?;

        match &floating_ip.associated_vm {
            Some(holder) if *holder == vm.id => {
                info!("Floating IP `{}' already associated with `{}'", address, vm.id);
                Ok(())
            }
            Some(holder) => Err(CpiError::CloudError(format!(
                "Floating IP `{address}' is already associated with `{holder}'"
            ))),
            None => {
                info!("Associating `{}' with floating IP `{}'", vm.id, address);
                let fip_id = &floating_ip.id;
                let vm_id = &vm.id;
                call_provider(provider, self.retry, "associate_floating_ip", move || {
                    provider.associate_floating_ip(fip_id, vm_id)
                })
                .await?;
                Ok(())
            }
        }
    }

    async fn dissociate_stale_vip(&self, vm: &VmInfo) -> Result<()> {
        let Some(address) = vm.floating_ip.as_deref() else {
            return Ok(());
        };
        let provider = self.provider;

        let floating_ip = describe_provider(provider, self.retry, "describe_floating_ip", move || {
            provider.describe_floating_ip(address)
        })
        .await?;

        if let Some(floating_ip) = floating_ip {
            info!("Disassociating floating IP `{}' from `{}'", address, vm.id);
            let fip_id = &floating_ip.id;
            call_provider(provider, self.retry, "dissociate_floating_ip", move || {
                provider.dissociate_floating_ip(fip_id)
            })
            .await?;
        }
        Ok(())
    }
}
