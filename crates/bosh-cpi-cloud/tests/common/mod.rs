//! Scripted in-memory cloud used by the lifecycle tests

use async_trait::async_trait;
use bosh_cpi_cloud::{
    CancellationFlag, CreateVmParams, CreateVolumeParams, FloatingIpInfo, ImageInfo, KeyPairInfo,
    LifecycleManager, LifecycleOptions, MemorySettingsStore, ProviderClient, ProviderError,
    ProviderResult, ResourceRef, SecurityGroupInfo, SnapshotInfo, SnapshotState, VmInfo, VmState,
    VolumeInfo, VolumeState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REGISTRY_ENDPOINT: &str = "http://registry.example:25777";

/// Pending state change applied after a number of describe polls
struct Transition<S> {
    polls_left: u32,
    then: S,
}

fn advance<S: Copy>(state: &mut S, transition: &mut Option<Transition<S>>) {
    if let Some(t) = transition {
        if t.polls_left == 0 {
            *state = t.then;
            *transition = None;
        } else {
            t.polls_left -= 1;
        }
    }
}

struct FakeVm {
    info: VmInfo,
    transition: Option<Transition<VmState>>,
}

struct FakeVolume {
    info: VolumeInfo,
    transition: Option<Transition<VolumeState>>,
}

struct FakeSnapshot {
    info: SnapshotInfo,
    transition: Option<Transition<SnapshotState>>,
}

#[derive(Default)]
struct CloudState {
    vms: HashMap<String, FakeVm>,
    volumes: HashMap<String, FakeVolume>,
    snapshots: HashMap<String, FakeSnapshot>,
    images: Vec<ImageInfo>,
    key_pairs: Vec<KeyPairInfo>,
    security_groups: Vec<SecurityGroupInfo>,
    instance_types: Vec<String>,
    floating_ips: Vec<FloatingIpInfo>,
    next_id: u32,
    settle_polls: u32,
    boot_state: Option<VmState>,
    stuck_volumes: bool,
    injected: Vec<ProviderError>,
    attach_conflicts: u32,
    missing_as_errors: bool,
    max_security_groups: Option<usize>,
    last_run: Option<CreateVmParams>,
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    calls: Mutex<Vec<String>>,
    refreshes: Mutex<u32>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        let cloud = Self::default();
        {
            let mut state = cloud.state.lock().unwrap();
            state.settle_polls = 2;
            state.images.push(ImageInfo {
                id: "img-stemcell".into(),
                name: "bosh-stemcell-ubuntu".to_string(),
            });
            state.key_pairs.push(KeyPairInfo {
                id: "kp-bosh".into(),
                name: "bosh".to_string(),
                public_key: Some("ssh-rsa AAAAB3Nza bosh".to_string()),
            });
            state.security_groups.push(SecurityGroupInfo {
                id: "sg-default".into(),
                name: "default".to_string(),
            });
            state.instance_types.push("c1m1".to_string());
            state.floating_ips.push(FloatingIpInfo {
                id: "eip-1".into(),
                address: "139.198.1.1".to_string(),
                associated_vm: None,
            });
        }
        Arc::new(cloud)
    }

    /// Manager wired to this cloud, a fresh memory store and `checkpoint`
    pub fn manager(
        self: &Arc<Self>,
        checkpoint: CancellationFlag,
    ) -> (LifecycleManager, Arc<MemorySettingsStore>) {
        let settings = Arc::new(MemorySettingsStore::new(REGISTRY_ENDPOINT));
        let options = LifecycleOptions {
            default_key_name: Some("bosh".to_string()),
            default_security_groups: vec!["default".to_string()],
            poll_interval: Duration::from_secs(1),
            state_timeout: Duration::from_secs(30),
            ..LifecycleOptions::default()
        };
        let manager = LifecycleManager::new(
            self.clone(),
            settings.clone(),
            options,
            Arc::new(checkpoint),
        );
        (manager, settings)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == method)
            .count()
    }

    pub fn refreshes(&self) -> u32 {
        *self.refreshes.lock().unwrap()
    }

    pub fn last_run(&self) -> Option<CreateVmParams> {
        self.state.lock().unwrap().last_run.clone()
    }

    /// New instances end up in `state` instead of running
    pub fn boot_into(&self, state: VmState) {
        self.state.lock().unwrap().boot_state = Some(state);
    }

    /// Volumes never leave their transitional state
    pub fn stall_volumes(&self) {
        self.state.lock().unwrap().stuck_volumes = true;
    }

    /// Reject the next `count` attach calls with a state conflict
    pub fn conflict_attaches(&self, count: u32) {
        self.state.lock().unwrap().attach_conflicts = count;
    }

    /// Describe calls for unknown ids fail with `NotFound` instead of answering empty
    pub fn missing_as_not_found(&self) {
        self.state.lock().unwrap().missing_as_errors = true;
    }

    pub fn limit_security_groups(&self, max: usize) {
        self.state.lock().unwrap().max_security_groups = Some(max);
    }

    pub fn add_security_group(&self, id: &str, name: &str) {
        self.state.lock().unwrap().security_groups.push(SecurityGroupInfo {
            id: id.into(),
            name: name.to_string(),
        });
    }

    /// Fail the next provider call with `error`
    pub fn inject(&self, error: ProviderError) {
        self.state.lock().unwrap().injected.insert(0, error);
    }

    pub fn add_vm(&self, id: &str, name: &str, private_ip: Option<&str>) {
        self.state.lock().unwrap().vms.insert(
            id.to_string(),
            FakeVm {
                info: VmInfo {
                    id: id.into(),
                    name: name.to_string(),
                    state: VmState::Running,
                    private_ip: private_ip.map(str::to_string),
                    security_groups: vec!["sg-default".to_string()],
                    floating_ip: None,
                },
                transition: None,
            },
        );
    }

    pub fn add_volume(&self, id: &str, state: VolumeState, attached_vm: Option<&str>) {
        self.state.lock().unwrap().volumes.insert(
            id.to_string(),
            FakeVolume {
                info: VolumeInfo {
                    id: id.into(),
                    name: id.to_string(),
                    state,
                    size_gib: 10,
                    attached_vm: attached_vm.map(ResourceRef::from),
                },
                transition: None,
            },
        );
    }

    pub fn vm_state(&self, id: &str) -> Option<VmState> {
        self.state.lock().unwrap().vms.get(id).map(|vm| vm.info.state)
    }

    pub fn volume(&self, id: &str) -> Option<VolumeInfo> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(id)
            .map(|v| v.info.clone())
    }

    pub fn floating_ip(&self, address: &str) -> Option<FloatingIpInfo> {
        self.state
            .lock()
            .unwrap()
            .floating_ips
            .iter()
            .find(|f| f.address == address)
            .cloned()
    }

    fn record(&self, method: &str) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(method.to_string());
        match self.state.lock().unwrap().injected.pop() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn found<T>(state: &CloudState, id: &ResourceRef, info: Option<T>) -> ProviderResult<Option<T>> {
        match info {
            None if state.missing_as_errors => Err(ProviderError::NotFound(id.to_string())),
            info => Ok(info),
        }
    }

    fn next_id(state: &mut CloudState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{:04}", state.next_id)
    }

    fn volume_transition(state: &CloudState, then: VolumeState) -> Option<Transition<VolumeState>> {
        if state.stuck_volumes {
            Some(Transition {
                polls_left: u32::MAX,
                then,
            })
        } else {
            Some(Transition {
                polls_left: state.settle_polls,
                then,
            })
        }
    }
}

#[async_trait]
impl ProviderClient for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    fn region(&self) -> &str {
        "pek3"
    }

    fn max_security_groups(&self) -> Option<usize> {
        self.state.lock().unwrap().max_security_groups
    }

    async fn refresh_credentials(&self) -> ProviderResult<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }

    async fn describe_vm(&self, id: &ResourceRef) -> ProviderResult<Option<VmInfo>> {
        self.record("describe_vm")?;
        let mut state = self.state.lock().unwrap();
        let info = state.vms.get_mut(id.as_str()).map(|vm| {
            advance(&mut vm.info.state, &mut vm.transition);
            vm.info.clone()
        });
        Self::found(&state, id, info)
    }

    async fn describe_volume(&self, id: &ResourceRef) -> ProviderResult<Option<VolumeInfo>> {
        self.record("describe_volume")?;
        let mut state = self.state.lock().unwrap();
        let info = state.volumes.get_mut(id.as_str()).map(|volume| {
            advance(&mut volume.info.state, &mut volume.transition);
            volume.info.clone()
        });
        Self::found(&state, id, info)
    }

    async fn describe_snapshot(&self, id: &ResourceRef) -> ProviderResult<Option<SnapshotInfo>> {
        self.record("describe_snapshot")?;
        let mut state = self.state.lock().unwrap();
        let info = state.snapshots.get_mut(id.as_str()).map(|snapshot| {
            advance(&mut snapshot.info.state, &mut snapshot.transition);
            snapshot.info.clone()
        });
        Self::found(&state, id, info)
    }

    async fn describe_image(&self, id: &ResourceRef) -> ProviderResult<Option<ImageInfo>> {
        self.record("describe_image")?;
        let state = self.state.lock().unwrap();
        let info = state.images.iter().find(|i| i.id == *id).cloned();
        Self::found(&state, id, info)
    }

    async fn find_image_by_name(&self, name: &str) -> ProviderResult<Vec<ImageInfo>> {
        self.record("find_image_by_name")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect())
    }

    async fn find_key_pairs(&self, name: &str) -> ProviderResult<Vec<KeyPairInfo>> {
        self.record("find_key_pairs")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .key_pairs
            .iter()
            .filter(|k| k.name == name)
            .cloned()
            .collect())
    }

    async fn list_security_groups(&self) -> ProviderResult<Vec<SecurityGroupInfo>> {
        self.record("list_security_groups")?;
        Ok(self.state.lock().unwrap().security_groups.clone())
    }

    async fn list_instance_types(&self, _region: &str) -> ProviderResult<Vec<String>> {
        self.record("list_instance_types")?;
        Ok(self.state.lock().unwrap().instance_types.clone())
    }

    async fn describe_floating_ip(&self, address: &str) -> ProviderResult<Option<FloatingIpInfo>> {
        self.record("describe_floating_ip")?;
        Ok(self.floating_ip(address))
    }

    async fn run_instance(&self, params: &CreateVmParams) -> ProviderResult<ResourceRef> {
        self.record("run_instance")?;
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "i");
        let then = state.boot_state.unwrap_or(VmState::Running);
        let polls_left = state.settle_polls;
        state.last_run = Some(params.clone());
        state.vms.insert(
            id.clone(),
            FakeVm {
                info: VmInfo {
                    id: id.as_str().into(),
                    name: params.name.clone(),
                    state: VmState::Pending,
                    private_ip: params.fixed_ip.clone(),
                    security_groups: params.security_groups.clone(),
                    floating_ip: None,
                },
                transition: Some(Transition { polls_left, then }),
            },
        );
        Ok(ResourceRef::new(id))
    }

    async fn terminate_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.record("terminate_instance")?;
        let mut state = self.state.lock().unwrap();
        let polls_left = state.settle_polls;
        if let Some(vm) = state.vms.get_mut(id.as_str()) {
            vm.transition = Some(Transition {
                polls_left,
                then: VmState::Terminated,
            });
        }
        Ok(())
    }

    async fn restart_instance(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.record("restart_instance")?;
        let mut state = self.state.lock().unwrap();
        let polls_left = state.settle_polls;
        if let Some(vm) = state.vms.get_mut(id.as_str()) {
            vm.info.state = VmState::Pending;
            vm.transition = Some(Transition {
                polls_left,
                then: VmState::Running,
            });
        }
        Ok(())
    }

    async fn create_volume(&self, params: &CreateVolumeParams) -> ProviderResult<ResourceRef> {
        self.record("create_volume")?;
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "vol");
        let transition = Self::volume_transition(&state, VolumeState::Available);
        state.volumes.insert(
            id.clone(),
            FakeVolume {
                info: VolumeInfo {
                    id: id.as_str().into(),
                    name: params.name.clone(),
                    state: VolumeState::Creating,
                    size_gib: params.size_gib,
                    attached_vm: None,
                },
                transition,
            },
        );
        Ok(ResourceRef::new(id))
    }

    async fn delete_volume(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.record("delete_volume")?;
        let mut state = self.state.lock().unwrap();
        let transition = Self::volume_transition(&state, VolumeState::Deleted);
        if let Some(volume) = state.volumes.get_mut(id.as_str()) {
            volume.info.state = VolumeState::Deleting;
            volume.transition = transition;
        }
        Ok(())
    }

    async fn attach_volume(&self, disk: &ResourceRef, vm: &ResourceRef) -> ProviderResult<()> {
        self.record("attach_volume")?;
        let mut state = self.state.lock().unwrap();
        if state.attach_conflicts > 0 {
            state.attach_conflicts -= 1;
            return Err(ProviderError::Conflict("volume is busy".to_string()));
        }
        let transition = Self::volume_transition(&state, VolumeState::InUse);
        let volume = state
            .volumes
            .get_mut(disk.as_str())
            .ok_or_else(|| ProviderError::NotFound(disk.to_string()))?;
        volume.info.attached_vm = Some(vm.clone());
        volume.transition = transition;
        Ok(())
    }

    async fn detach_volume(&self, disk: &ResourceRef, _vm: &ResourceRef) -> ProviderResult<()> {
        self.record("detach_volume")?;
        let mut state = self.state.lock().unwrap();
        let transition = Self::volume_transition(&state, VolumeState::Available);
        let volume = state
            .volumes
            .get_mut(disk.as_str())
            .ok_or_else(|| ProviderError::NotFound(disk.to_string()))?;
        volume.info.attached_vm = None;
        volume.transition = transition;
        Ok(())
    }

    async fn create_snapshot(&self, disk: &ResourceRef, _name: &str) -> ProviderResult<ResourceRef> {
        self.record("create_snapshot")?;
        let mut state = self.state.lock().unwrap();
        if !state.volumes.contains_key(disk.as_str()) {
            return Err(ProviderError::NotFound(disk.to_string()));
        }
        let id = Self::next_id(&mut state, "ss");
        let polls_left = state.settle_polls;
        state.snapshots.insert(
            id.clone(),
            FakeSnapshot {
                info: SnapshotInfo {
                    id: id.as_str().into(),
                    state: SnapshotState::Creating,
                },
                transition: Some(Transition {
                    polls_left,
                    then: SnapshotState::Available,
                }),
            },
        );
        Ok(ResourceRef::new(id))
    }

    async fn delete_snapshot(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.record("delete_snapshot")?;
        let mut state = self.state.lock().unwrap();
        let polls_left = state.settle_polls;
        if let Some(snapshot) = state.snapshots.get_mut(id.as_str()) {
            snapshot.transition = Some(Transition {
                polls_left,
                then: SnapshotState::Ceased,
            });
        }
        Ok(())
    }

    async fn delete_image(&self, id: &ResourceRef) -> ProviderResult<()> {
        self.record("delete_image")?;
        self.state.lock().unwrap().images.retain(|i| i.id != *id);
        Ok(())
    }

    async fn associate_floating_ip(
        &self,
        floating_ip: &ResourceRef,
        vm: &ResourceRef,
    ) -> ProviderResult<()> {
        self.record("associate_floating_ip")?;
        let mut state = self.state.lock().unwrap();
        let address = state
            .floating_ips
            .iter_mut()
            .find(|f| f.id == *floating_ip)
            .map(|f| {
                f.associated_vm = Some(vm.clone());
                f.address.clone()
            })
            .ok_or_else(|| ProviderError::NotFound(floating_ip.to_string()))?;
        if let Some(instance) = state.vms.get_mut(vm.as_str()) {
            instance.info.floating_ip = Some(address);
        }
        Ok(())
    }

    async fn dissociate_floating_ip(&self, floating_ip: &ResourceRef) -> ProviderResult<()> {
        self.record("dissociate_floating_ip")?;
        let mut state = self.state.lock().unwrap();
        let mut released = None;
        for fip in state.floating_ips.iter_mut().filter(|f| f.id == *floating_ip) {
            released = fip.associated_vm.take();
        }
        if let Some(vm) = released {
            if let Some(instance) = state.vms.get_mut(vm.as_str()) {
                instance.info.floating_ip = None;
            }
        }
        Ok(())
    }

    async fn bind_static_address(
        &self,
        _router_id: &str,
        _vm: &ResourceRef,
        _ip: &str,
    ) -> ProviderResult<()> {
        self.record("bind_static_address")
    }
}
