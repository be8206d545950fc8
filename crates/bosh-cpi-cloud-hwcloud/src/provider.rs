//! HwCloud provider implementation

use crate::api::{
    Ack, AddressesResponse, HwCloudApi, ImagesResponse, Instance, InstancesResponse,
    KeyPairsResponse, SecurityGroupsResponse, SnapshotCreated, SnapshotsResponse, Volume,
    VolumeCreated, VolumesResponse, indexed,
};
use crate::error::HwCloudError;
use async_trait::async_trait;
use bosh_cpi_cloud::{
    CreateVmParams, CreateVolumeParams, FloatingIpInfo, ImageInfo, KeyPairInfo, ProviderClient,
    ProviderError, ProviderResult, QueryParams, ResourceRef, ResourceStatus, SecurityGroupInfo,
    SnapshotInfo, SnapshotState, VmInfo, VmState, VolumeInfo, VolumeState,
};
use tracing::{debug, info};

/// Flavors offered when no explicit list is configured
pub fn default_instance_types() -> Vec<String> {
    ["m1.tiny", "m1.small", "m1.medium", "m1.large", "m1.xlarge"]
        .map(String::from)
        .to_vec()
}

/// HwCloud provider
pub struct HwCloudProvider {
    api: HwCloudApi,
    availability_zone: Option<String>,
    instance_types: Vec<String>,
}

impl HwCloudProvider {
    pub fn new(api: HwCloudApi) -> Self {
        Self {
            api,
            availability_zone: None,
            instance_types: default_instance_types(),
        }
    }

    /// Zone used when a request does not name one
    pub fn with_availability_zone(mut self, zone: Option<String>) -> Self {
        self.availability_zone = zone;
        self
    }

    pub fn with_instance_types(mut self, instance_types: Vec<String>) -> Self {
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

    /// Describe call where an unknown id reads as an empty result
    async fn describe<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        params: QueryParams,
    ) -> ProviderResult<Option<T>> {
        match self.call(action, params).await {
            Ok(response) => Ok(Some(response)),
            Err(ProviderError::NotFound(message)) => {
                debug!("{} found nothing: {}", action, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn ack(&self, action: &str, params: QueryParams) -> ProviderResult<()> {
        let _: Ack = self.call(action, params).await?;
        Ok(())
    }

    fn zone<'a>(&'a self, requested: &'a Option<String>) -> Option<&'a str> {
        requested
            .as_deref()
            .or(self.availability_zone.as_deref())
    }
}

impl From<Instance> for VmInfo {
    fn from(instance: Instance) -> Self {
        let state = instance
            .instance_state
            .map(|s| VmState::parse(&s.name))
            .unwrap_or(VmState::Unknown);
        VmInfo {
            id: ResourceRef::new(instance.instance_id),
            name: instance.instance_name,
            state,
            private_ip: instance.private_ip_address.filter(|ip| !ip.is_empty()),
            security_groups: instance.group_set.into_iter().map(|g| g.group_id).collect(),
            floating_ip: instance
                .public_ip_set
                .into_iter()
                .map(|p| p.public_ip)
                .find(|ip| !ip.is_empty()),
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
                .attachment_set
                .into_iter()
                .map(|a| a.instance_id)
                .find(|id| !id.is_empty())
                .map(ResourceRef::new),
        }
    }
}

#[async_trait]
impl ProviderClient for HwCloudProvider {
    fn name(&self) -> &str {
        "hwcloud"
    }

    fn region(&self) -> &str {
        self.api.region_name()
    }

    async fn describe_vm(&self, id: &ResourceRef) -> ProviderResult<Option<VmInfo>> {
        let response: Option<InstancesResponse> = self
            .describe(
                "DescribeInstances",
                indexed(QueryParams::new(), "InstanceId", &[id.as_str()]),
            )
            .await?;
        Ok(response
            .and_then(|r| r.instances_set.into_iter().next())
            .map(VmInfo::from))
    }

    async fn describe_volume(&self, id: &ResourceRef) -> ProviderResult<Option<VolumeInfo>> {
        let response: Option<VolumesResponse> = self
            .describe(
                "DescribeVolumes",
                indexed(QueryParams::new(), "VolumeId", &[id.as_str()]),
            )
            .await?;
        Ok(response
            .and_then(|r| r.volume_set.into_iter().next())
            .map(VolumeInfo::from))
    }

    async fn describe_snapshot(&self, id: &ResourceRef) -> ProviderResult<Option<SnapshotInfo>> {
        let response: Option<SnapshotsResponse> = self
            .describe(
                "DescribeSnapshots",
                indexed(QueryParams::new(), "SnapshotId", &[id.as_str()]),
            )
            .await?;
        let snapshot = response.and_then(|r| r.snapshot_set.into_iter().next());
        Ok(snapshot.map(|s| SnapshotInfo {
            id: ResourceRef::new(s.snapshot_id),
            state: SnapshotState::parse(&s.status),
        }))
    }

    async fn describe_image(&self, id: &ResourceRef) -> ProviderResult<Option<ImageInfo>> {
        let response: Option<ImagesResponse> = self
            .describe(
                "DescribeImages",
                indexed(QueryParams::new(), "ImageId", &[id.as_str()]),
            )
            .await?;
        let image = response.and_then(|r| r.images_set.into_iter().next());
        Ok(image.map(|i| ImageInfo {
            id: ResourceRef::new(i.image_id),
            name: i.name,
        }))
    }

    async fn find_image_by_name(&self, name: &str) -> ProviderResult<Vec<ImageInfo>> {
        let params = QueryParams::new().set("Filter[0].Name", "name");
        let response: ImagesResponse = self
            .call(
                "DescribeImages",
                indexed(params, "Filter[0].Value", &[name]),
            )
            .await?;
        Ok(response
            .images_set
            .into_iter()
            .filter(|i| i.name == name)
            .map(|i| ImageInfo {
                id: ResourceRef::new(i.image_id),
                name: i.name,
            })
            .collect())
    }

    async fn find_key_pairs(&self, name: &str) -> ProviderResult<Vec<KeyPairInfo>> {
        let response: KeyPairsResponse = self
            .call(
                "DescribeKeyPairs",
                indexed(QueryParams::new(), "KeyName", &[name]),
            )
            .await?;
        // Key pairs are addressed by name
        Ok(response
            .key_set
            .into_iter()
            .filter(|k| k.key_name == name)
            .map(|k| KeyPairInfo {
                id: ResourceRef::new(k.key_name.clone()),
                name: k.key_name,
                public_key: k.public_key,
            })
            .collect())
    }

    async fn list_security_groups(&self) -> ProviderResult<Vec<SecurityGroupInfo>> {
        let response: SecurityGroupsResponse =
            self.call("DescribeSecurityGroups", QueryParams::new()).await?;
        Ok(response
            .security_group_info
            .into_iter()
            .map(|sg| SecurityGroupInfo {
                id: ResourceRef::new(sg.group_id),
                name: sg.group_name,
            })
            .collect())
    }

    async fn list_instance_types(&self, _region: &str) -> ProviderResult<Vec<String>> {
        Ok(self.instance_types.clone())
    }

    async fn describe_floating_ip(&self, address: &str) -> ProviderResult<Option<FloatingIpInfo>> {
        let response: Option<AddressesResponse> = self
            .describe(
                "DescribeAddresses",
                indexed(QueryParams::new(), "PublicIp", &[address]),
            )
            .await?;
        Ok(response
            .into_iter()
            .flat_map(|r| r.addresses_set)
            .find(|a| a.public_ip == address)
            .map(|a| FloatingIpInfo {
                id: ResourceRef::new(a.public_ip.clone()),
                address: a.public_ip,
                associated_vm: a
                    .instance_id
                    .filter(|id| a.assignment == "associated" && !id.is_empty())
                    .map(ResourceRef::new),
            }))
    }

    async fn run_instance(&self, params: &CreateVmParams) -> ProviderResult<ResourceRef> {
        let groups: Vec<&str> = params.security_groups.iter().map(String::as_str).collect();
        let query = QueryParams::new()
            .set("ImageId", params.image_id.as_str())
            .set("InstanceType", params.instance_type.as_str())
            .set("InstanceName", params.name.as_str())
            .set("MinCount", "1")
            .set("MaxCount", "1")
            .set("KeyName", params.key_pair.id.as_str())
            .set_opt("SubnetId", params.net_id.as_deref())
            .set_opt("PrivateIpAddress", params.fixed_ip.as_deref())
            .set_opt(
                "Placement.AvailabilityZone",
                self.zone(&params.availability_zone),
            )
            .set("UserData", params.user_data.as_str());
        let query = indexed(query, "SecurityGroupId", &groups);

        info!(
            "Running HwCloud instance `{}' ({}, {})",
            params.name, params.image_id, params.instance_type
        );
        let response: InstancesResponse = self.call("RunInstances", query).await?;
        response
            .instances_set
            .into_iter()
            .next()
            .map(|i| ResourceRef::new(i.instance_id))
            .ok_or_else(|| ProviderError::Decode("RunInstances returned no instance".to_string()))
    }

    async fn terminate_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "TerminateInstances",
            indexed(QueryParams::new(), "InstanceId", &[id.as_str()]),
        )
        .await
    }

    async fn restart_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "RebootInstances",
            indexed(QueryParams::new(), "InstanceId", &[id.as_str()]),
        )
        .await
    }

    async fn create_volume(&self, params: &CreateVolumeParams) -> ProviderResult<ResourceRef> {
        let created: VolumeCreated = self
            .call(
                "CreateVolume",
                QueryParams::new()
                    .set("Size", params.size_gib.to_string())
                    .set("VolumeName", params.name.as_str())
                    .set_opt("AvailabilityZone", self.zone(&params.availability_zone)),
            )
            .await?;
        Ok(ResourceRef::new(created.volume_id))
    }

    async fn delete_volume(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.ack("DeleteVolume", QueryParams::new().set("VolumeId", id.as_str()))
            .await
    }

    async fn attach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "AttachVolume",
            QueryParams::new()
                .set("VolumeId", disk.as_str())
                .set("InstanceId", vm.as_str()),
        )
        .await
    }

    async fn detach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "DetachVolume",
            QueryParams::new()
                .set("VolumeId", disk.as_str())
                .set("InstanceId", vm.as_str()),
        )
        .await
    }

    async fn create_snapshot(
        &self,
        disk: &ResourceRef,
        name: &str,
    ) -> ProviderResult<ResourceRef> {
        let created: SnapshotCreated = self
            .call(
                "CreateSnapshot",
                QueryParams::new()
                    .set("VolumeId", disk.as_str())
                    .set("Description", name),
            )
            .await?;
        Ok(ResourceRef::new(created.snapshot_id))
    }

    async fn delete_snapshot(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "DeleteSnapshot",
            QueryParams::new().set("SnapshotId", id.as_str()),
        )
        .await
    }

    async fn delete_image(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "DeleteImages",
            indexed(QueryParams::new(), "ImageId", &[id.as_str()]),
        )
        .await
    }

    async fn associate_floating_ip(
        &self,
        floating_ip: &ResourceRef,
        vm: &ResourceRef,
    ) -> ProviderResult<()> {
        self.ack(
            "AssociateAddress",
            QueryParams::new()
                .set("PublicIp", floating_ip.as_str())
                .set("InstanceId", vm.as_str()),
        )
        .await
    }

    async fn dissociate_floating_ip(&self, floating_ip: &ResourceRef) -> ProviderResult<()> {
        self.ack(
            "DisassociateAddress",
            QueryParams::new().set("PublicIp", floating_ip.as_str()),
        )
        .await
    }

    async fn bind_static_address(
        &self,
        _router_id: &str,
        _vm: &ResourceRef,
        _ip: &str,
    ) -> ProviderResult<()> {
        // Fixed addresses are requested at RunInstances time instead
        Err(HwCloudError::Unsupported.into())
    }
}
