//! QingCloud provider implementation

use crate::api::{
    Ack, EipSet, ImageSet, Instance, InstanceSet, InstancesCreated, KeyPairSet, QingCloudApi,
    SecurityGroupSet, SnapshotSet, SnapshotsCreated, Volume, VolumeSet, VolumesCreated,
};
use async_trait::async_trait;
use bosh_cpi_cloud::{
    CreateVmParams, CreateVolumeParams, FloatingIpInfo, ImageInfo, KeyPairInfo, ProviderClient,
    ProviderError, ProviderResult, QueryParams, ResourceRef, ResourceStatus, SecurityGroupInfo,
    SnapshotInfo, SnapshotState, VmInfo, VmState, VolumeInfo, VolumeState,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Router static type binding a fixed address to an instance (DHCP option)
const STATIC_TYPE_DHCP: &str = "3";

/// Instance types offered per zone
pub fn default_instance_types() -> BTreeMap<String, Vec<String>> {
    let mut types = BTreeMap::new();
    types.insert(
        "gd1".to_string(),
        ["c1m1", "c1m2", "c1m4", "c2m2", "c2m4", "c2m8", "c4m4", "c4m8", "c4m16"]
            .map(String::from)
            .to_vec(),
    );
    types.insert(
        "pek1".to_string(),
        [
            "small_b", "small_c", "medium_a", "medium_b", "medium_c", "large_a", "large_b",
            "large_c",
        ]
        .map(String::from)
        .to_vec(),
    );
    types
}

/// QingCloud provider
pub struct QingCloudProvider {
    api: QingCloudApi,
    instance_types: BTreeMap<String, Vec<String>>,
}

impl QingCloudProvider {
    pub fn new(api: QingCloudApi) -> Self {
        Self {
            api,
            instance_types: default_instance_types(),
        }
    }

    /// Replace the per-zone instance type table
    pub fn with_instance_types(mut self, instance_types: BTreeMap<String, Vec<String>>) -> Self {
        self.instance_types = instance_types;
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        params: QueryParams,
    ) -> ProviderResult<T> {
        self.api
            .call(action, params)
            .await
            .map_err(ProviderError::from)
    }

    /// Describe call where an unknown id (ret_code 2100) reads as an empty result
    async fn describe<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        params: QueryParams,
    ) -> ProviderResult<Option<T>> {
        match self.call(action, params).await {
            Ok(set) => Ok(Some(set)),
            Err(ProviderError::NotFound(message)) => {
                debug!("{} found nothing: {}", action, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// First id of a create response; an empty list is a protocol violation
    fn first_id(action: &str, ids: Vec<String>) -> ProviderResult<ResourceRef> {
        ids.into_iter()
            .next()
            .map(ResourceRef::new)
            .ok_or_else(|| ProviderError::Decode(format!("{action} returned no resource id")))
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl From<Instance> for VmInfo {
    fn from(instance: Instance) -> Self {
        VmInfo {
            id: ResourceRef::new(instance.instance_id),
            name: instance.instance_name,
            state: VmState::parse(&instance.status),
            private_ip: instance
                .vxnets
                .iter()
                .find_map(|v| v.private_ip.as_deref().and_then(non_empty)),
            security_groups: instance
                .security_group
                .map(|sg| vec![sg.security_group_id])
                .unwrap_or_default(),
            floating_ip: instance.eip.and_then(|eip| non_empty(&eip.eip_addr)),
        }
    }
}

impl From<Volume> for VolumeInfo {
    fn from(volume: Volume) -> Self {
        VolumeInfo {
            id: ResourceRef::new(volume.volume_id),
            name: volume.volume_name,
            state: VolumeState::parse(&volume.status),
            size_gib: volume.size,
            attached_vm: volume
                .instance
                .and_then(|i| non_empty(&i.instance_id))
                .map(ResourceRef::new),
        }
    }
}

#[async_trait]
impl ProviderClient for QingCloudProvider {
    fn name(&self) -> &str {
        "qingcloud"
    }

    fn region(&self) -> &str {
        self.api.zone()
    }

    fn max_security_groups(&self) -> Option<usize> {
        Some(1)
    }

    async fn describe_vm(&self, id: &ResourceRef) -> ProviderResult<Option<VmInfo>> {
        let set: Option<InstanceSet> = self
            .describe(
                "DescribeInstances",
                QueryParams::new()
                    .list("instances", &[id.as_str()])
                    .set("verbose", "1"),
            )
            .await?;
        Ok(set
            .and_then(|s| s.instance_set.into_iter().next())
            .map(VmInfo::from))
    }

    async fn describe_volume(&self, id: &ResourceRef) -> ProviderResult<Option<VolumeInfo>> {
        let set: Option<VolumeSet> = self
            .describe(
                "DescribeVolumes",
                QueryParams::new().list("volumes", &[id.as_str()]),
            )
            .await?;
        Ok(set
            .and_then(|s| s.volume_set.into_iter().next())
            .map(VolumeInfo::from))
    }

    async fn describe_snapshot(&self, id: &ResourceRef) -> ProviderResult<Option<SnapshotInfo>> {
        let set: Option<SnapshotSet> = self
            .describe(
                "DescribeSnapshots",
                QueryParams::new().list("snapshots", &[id.as_str()]),
            )
            .await?;
        let snapshot = set.and_then(|s| s.snapshot_set.into_iter().next());
        Ok(snapshot.map(|s| SnapshotInfo {
            id: ResourceRef::new(s.snapshot_id),
            state: SnapshotState::parse(&s.status),
        }))
    }

    async fn describe_image(&self, id: &ResourceRef) -> ProviderResult<Option<ImageInfo>> {
        let set: Option<ImageSet> = self
            .describe(
                "DescribeImages",
                QueryParams::new()
                    .list("images", &[id.as_str()])
                    .list("status", &["available"]),
            )
            .await?;
        let image = set.and_then(|s| s.image_set.into_iter().next());
        Ok(image.map(|i| ImageInfo {
            id: ResourceRef::new(i.image_id),
            name: i.image_name,
        }))
    }

    async fn find_image_by_name(&self, name: &str) -> ProviderResult<Vec<ImageInfo>> {
        let set: ImageSet = self
            .call(
                "DescribeImages",
                QueryParams::new()
                    .set("search_word", name)
                    .list("status", &["available"]),
            )
            .await?;
        Ok(set
            .image_set
            .into_iter()
            .filter(|i| i.image_name == name)
            .map(|i| ImageInfo {
                id: ResourceRef::new(i.image_id),
                name: i.image_name,
            })
            .collect())
    }

    async fn find_key_pairs(&self, name: &str) -> ProviderResult<Vec<KeyPairInfo>> {
        let set: KeyPairSet = self
            .call(
                "DescribeKeyPairs",
                QueryParams::new().set("search_word", name),
            )
            .await?;
        Ok(set
            .keypair_set
            .into_iter()
            .filter(|k| k.keypair_name == name || k.keypair_id == name)
            .map(|k| KeyPairInfo {
                id: ResourceRef::new(k.keypair_id),
                name: k.keypair_name,
                public_key: k.pub_key,
            })
            .collect())
    }

    async fn list_security_groups(&self) -> ProviderResult<Vec<SecurityGroupInfo>> {
        let set: SecurityGroupSet = self
            .call(
                "DescribeSecurityGroups",
                QueryParams::new().set("limit", "100"),
            )
            .await?;
        Ok(set
            .security_group_set
            .into_iter()
            .map(|sg| SecurityGroupInfo {
                id: ResourceRef::new(sg.security_group_id),
                name: sg.security_group_name,
            })
            .collect())
    }

    async fn list_instance_types(&self, region: &str) -> ProviderResult<Vec<String>> {
        Ok(self.instance_types.get(region).cloned().unwrap_or_default())
    }

    async fn describe_floating_ip(&self, address: &str) -> ProviderResult<Option<FloatingIpInfo>> {
        let set: EipSet = self
            .call("DescribeEips", QueryParams::new().set("search_word", address))
            .await?;
        Ok(set
            .eip_set
            .into_iter()
            .find(|eip| eip.eip_addr == address)
            .map(|eip| FloatingIpInfo {
                id: ResourceRef::new(eip.eip_id),
                address: eip.eip_addr,
                associated_vm: eip
                    .resource
                    .filter(|r| r.resource_type == "instance")
                    .and_then(|r| non_empty(&r.resource_id))
                    .map(ResourceRef::new),
            }))
    }

    async fn run_instance(&self, params: &CreateVmParams) -> ProviderResult<ResourceRef> {
        let vxnet = match (&params.net_id, &params.fixed_ip) {
            (Some(net_id), Some(ip)) => Some(format!("{net_id}|{ip}")),
            (Some(net_id), None) => Some(net_id.clone()),
            (None, _) => None,
        };

        let query = QueryParams::new()
            .set("image_id", params.image_id.as_str())
            .set("instance_type", params.instance_type.as_str())
            .set("instance_name", params.name.as_str())
            .set("count", "1")
            .set("login_mode", "keypair")
            .set("login_keypair", params.key_pair.id.as_str())
            .list("vxnets", &vxnet.into_iter().collect::<Vec<_>>())
            .set_opt("security_group", params.security_groups.first())
            .set("need_userdata", "1")
            .set("userdata_type", "plain")
            .set("userdata_value", params.user_data.as_str());

        info!(
            "Running QingCloud instance `{}' ({}, {})",
            params.name, params.image_id, params.instance_type
        );
        let created: InstancesCreated = self.call("RunInstances", query).await?;
        Self::first_id("RunInstances", created.instances)
    }

    async fn terminate_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "TerminateInstances",
                QueryParams::new().list("instances", &[id.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn restart_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "RestartInstances",
                QueryParams::new().list("instances", &[id.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn create_volume(&self, params: &CreateVolumeParams) -> ProviderResult<ResourceRef> {
        let created: VolumesCreated = self
            .call(
                "CreateVolumes",
                QueryParams::new()
                    .set("size", params.size_gib.to_string())
                    .set("volume_name", params.name.as_str())
                    .set("count", "1"),
            )
            .await?;
        Self::first_id("CreateVolumes", created.volumes)
    }

    async fn delete_volume(&self, id: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "DeleteVolumes",
                QueryParams::new().list("volumes", &[id.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn attach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "AttachVolumes",
                QueryParams::new()
                    .list("volumes", &[disk.as_str()])
                    .set("instance", vm.as_str()),
            )
            .await?;
        Ok(())
    }

    async fn detach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "DetachVolumes",
                QueryParams::new()
                    .list("volumes", &[disk.as_str()])
                    .set("instance", vm.as_str()),
            )
            .await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        disk: &ResourceRef,
        name: &str,
    ) -> ProviderResult<ResourceRef> {
        let created: SnapshotsCreated = self
            .call(
                "CreateSnapshots",
                QueryParams::new()
                    .list("resources", &[disk.as_str()])
                    .set("snapshot_name", name)
                    .set("is_full", "1"),
            )
            .await?;
        Self::first_id("CreateSnapshots", created.snapshots)
    }

    async fn delete_snapshot(&self, id: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "DeleteSnapshots",
                QueryParams::new().list("snapshots", &[id.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn delete_image(&self, id: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "DeleteImages",
                QueryParams::new().list("images", &[id.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn associate_floating_ip(
        &self,
        floating_ip: &ResourceRef,
        vm: &ResourceRef,
    ) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "AssociateEip",
                QueryParams::new()
                    .set("eip", floating_ip.as_str())
                    .set("instance", vm.as_str()),
            )
            .await?;
        Ok(())
    }

    async fn dissociate_floating_ip(&self, floating_ip: &ResourceRef) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "DissociateEips",
                QueryParams::new().list("eips", &[floating_ip.as_str()]),
            )
            .await?;
        Ok(())
    }

    async fn bind_static_address(
        &self,
        router_id: &str,
        vm: &ResourceRef,
        ip: &str,
    ) -> ProviderResult<()> {
        let _: Ack = self
            .call(
                "AddRouterStatics",
                QueryParams::new()
                    .set("router", router_id)
                    .set("statics.1.static_type", STATIC_TYPE_DHCP)
                    .set("statics.1.val1", vm.as_str())
                    .set("statics.1.val2", format!("fixed-address={ip}")),
            )
            .await?;

        let _: Ack = self
            .call(
                "UpdateRouters",
                QueryParams::new().list("routers", &[router_id]),
            )
            .await?;
        Ok(())
    }
}
