mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bosh_cpi_cloud::{
    CancellationFlag, CpiError, NetworkSpec, ProviderError, ResourceKind, ResourceRef,
    SettingsStore, StemcellProperties, VmCloudProperties, VmState, VolumeState,
};
use common::{FakeCloud, REGISTRY_ENDPOINT};
use serde_json::json;

fn networks(value: serde_json::Value) -> NetworkSpec {
    serde_json::from_value(value).unwrap()
}

fn dynamic_network() -> NetworkSpec {
    networks(json!({
        "default": {
            "type": "dynamic",
            "dns": ["10.0.0.2"],
            "cloud_properties": {"net_id": "vxnet-0"},
        },
    }))
}

fn resource_pool() -> VmCloudProperties {
    VmCloudProperties {
        instance_type: "c1m1".to_string(),
        ..VmCloudProperties::default()
    }
}

async fn seeded_vm(cloud: &FakeCloud, settings: &dyn SettingsStore, id: &str, name: &str) {
    cloud.add_vm(id, name, Some("10.0.0.5"));
    let agent_settings =
        bosh_cpi_cloud::AgentSettings::new(name, "agent-1", dynamic_network(), None);
    settings.update(name, &agent_settings).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_waits_for_available() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let disk = manager.create_disk(10240, None).await.unwrap();

    let volume = cloud.volume(disk.as_str()).unwrap();
    assert_eq!(volume.state, VolumeState::Available);
    assert_eq!(volume.size_gib, 10);
    assert_eq!(cloud.called("describe_volume"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_rejects_size_off_granularity() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager.create_disk(10239, None).await.unwrap_err();

    assert!(matches!(err, CpiError::InvalidArgument(_)));
    assert!(cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deletes_of_absent_resources_succeed() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    let missing = ResourceRef::new("missing");

    manager.delete_vm(&missing).await.unwrap();
    manager.delete_disk(&missing).await.unwrap();
    manager.delete_snapshot(&missing).await.unwrap();
    manager.delete_stemcell(&missing).await.unwrap();

    assert_eq!(cloud.called("terminate_instance"), 0);
    assert_eq!(cloud.called("delete_volume"), 0);
    assert_eq!(cloud.called("delete_snapshot"), 0);
    assert_eq!(cloud.called("delete_image"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_from_describe_reads_as_absent() {
    let cloud = FakeCloud::new();
    cloud.missing_as_not_found();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    let missing = ResourceRef::new("missing");

    assert!(!manager.has_vm(&missing).await.unwrap());
    assert!(!manager.has_disk(&missing).await.unwrap());
    manager.delete_vm(&missing).await.unwrap();
    manager.delete_disk(&missing).await.unwrap();
    manager.delete_snapshot(&missing).await.unwrap();
    manager.delete_stemcell(&missing).await.unwrap();

    assert_eq!(cloud.called("describe_vm"), 2);
    assert_eq!(cloud.called("terminate_instance"), 0);
    assert_eq!(cloud.called("delete_volume"), 0);
    assert_eq!(cloud.called("delete_image"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_disk_in_use_is_refused() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    cloud.add_volume("vol-1", VolumeState::InUse, Some("i-1"));

    let err = manager
        .delete_disk(&ResourceRef::new("vol-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::CloudError(ref msg) if msg.contains("state is in-use")));
    assert_eq!(cloud.called("delete_volume"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_disk_waits_for_deleted() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    cloud.add_volume("vol-1", VolumeState::Available, None);

    manager.delete_disk(&ResourceRef::new("vol-1")).await.unwrap();

    assert_eq!(cloud.volume("vol-1").unwrap().state, VolumeState::Deleted);
    assert!(!manager.has_disk(&ResourceRef::new("vol-1")).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_end_to_end() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());

    let vm_id = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &dynamic_network(),
            Some(json!({"bosh": {"password": "secret"}})),
        )
        .await
        .unwrap();

    assert_eq!(cloud.vm_state(vm_id.as_str()), Some(VmState::Running));
    assert!(manager.has_vm(&vm_id).await.unwrap());

    let params = cloud.last_run().unwrap();
    assert!(params.name.starts_with("vm-"));
    assert_eq!(params.security_groups, vec!["sg-default".to_string()]);
    assert_eq!(params.net_id.as_deref(), Some("vxnet-0"));
    assert_eq!(params.key_pair.name, "bosh");

    let user_data: serde_json::Value =
        serde_json::from_slice(&BASE64.decode(&params.user_data).unwrap()).unwrap();
    assert_eq!(user_data["registry"]["endpoint"], REGISTRY_ENDPOINT);
    assert_eq!(user_data["server"]["name"], params.name.as_str());
    assert_eq!(user_data["openssh"]["public_key"], "ssh-rsa AAAAB3Nza bosh");
    assert_eq!(user_data["dns"]["nameserver"], json!(["10.0.0.2"]));

    let stored = settings.read(&params.name).await.unwrap();
    assert_eq!(stored.agent_id, "agent-1");
    assert_eq!(stored.disks.system, "/dev/sda");
    assert_eq!(stored.disks.ephemeral.as_deref(), Some("/dev/sdb"));
    assert!(stored.disks.persistent.is_empty());
    assert_eq!(stored.env, Some(json!({"bosh": {"password": "secret"}})));
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_without_primary_network_issues_no_calls() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &networks(json!({"public": {"type": "vip", "ip": "139.198.1.1"}})),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::InvalidSpec(_)));
    assert!(cloud.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_missing_dependencies() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-missing"),
            &resource_pool(),
            &dynamic_network(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::Image, .. }));

    let mut pool = resource_pool();
    pool.instance_type = "huge".to_string();
    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &pool,
            &dynamic_network(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::InstanceType, .. }));

    let mut pool = resource_pool();
    pool.key_name = Some("nobody".to_string());
    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &pool,
            &dynamic_network(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::KeyPair, .. }));

    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &networks(json!({
                "default": {"type": "dynamic", "cloud_properties": {"security_groups": ["web"]}},
            })),
            None,
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, CpiError::NotFound { kind: ResourceKind::SecurityGroup, ref id } if id == "web")
    );

    assert_eq!(cloud.called("run_instance"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_boot_failure_cleans_up() {
    let cloud = FakeCloud::new();
    cloud.boot_into(VmState::Error);
    let (manager, settings) = cloud.manager(CancellationFlag::new());

    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &dynamic_network(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::CreationFailed { .. }));
    assert!(err.ok_to_retry());
    assert_eq!(cloud.called("terminate_instance"), 1);
    assert!(settings.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_delete_vm_terminates_and_drops_settings() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;

    manager.delete_vm(&ResourceRef::new("i-1")).await.unwrap();

    assert_eq!(cloud.vm_state("i-1"), Some(VmState::Terminated));
    assert!(settings.is_empty().await);
    assert!(!manager.has_vm(&ResourceRef::new("i-1")).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_reboot_missing_vm() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager
        .reboot_vm(&ResourceRef::new("i-404"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(cloud.called("restart_instance"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attach_disk_is_idempotent() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-1", VolumeState::Available, None);

    let vm = ResourceRef::new("i-1");
    let disk = ResourceRef::new("vol-1");
    let first = manager.attach_disk(&vm, &disk).await.unwrap();
    let second = manager.attach_disk(&vm, &disk).await.unwrap();

    assert_eq!(first, "/dev/sdc");
    assert_eq!(first, second);
    assert_eq!(cloud.called("attach_volume"), 1);
    assert_eq!(manager.get_disks(&vm).await.unwrap(), vec![disk]);
}

#[tokio::test(start_paused = true)]
async fn test_attach_disk_takes_next_free_device() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-3", VolumeState::Available, None);

    let mut agent_settings = settings.read("vm-one").await.unwrap();
    agent_settings
        .disks
        .persistent
        .insert("d1".to_string(), "/dev/sdc".to_string());
    agent_settings
        .disks
        .persistent
        .insert("d2".to_string(), "/dev/sdd".to_string());
    settings.update("vm-one", &agent_settings).await.unwrap();

    let device = manager
        .attach_disk(&ResourceRef::new("i-1"), &ResourceRef::new("vol-3"))
        .await
        .unwrap();

    assert_eq!(device, "/dev/sde");
    let stored = settings.read("vm-one").await.unwrap();
    assert_eq!(stored.disks.persistent.get("vol-3").unwrap(), "/dev/sde");
}

#[tokio::test(start_paused = true)]
async fn test_attach_disk_in_use_elsewhere() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-1", VolumeState::InUse, Some("i-2"));

    let err = manager
        .attach_disk(&ResourceRef::new("i-1"), &ResourceRef::new("vol-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::CloudError(ref msg) if msg.contains("in use")));
    assert_eq!(cloud.called("attach_volume"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attach_retries_state_conflicts() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-1", VolumeState::Available, None);

    cloud.conflict_attaches(3);

    let device = manager
        .attach_disk(&ResourceRef::new("i-1"), &ResourceRef::new("vol-1"))
        .await
        .unwrap();

    assert_eq!(cloud.called("attach_volume"), 4);
    assert_eq!(device, "/dev/sdc");
}

#[tokio::test(start_paused = true)]
async fn test_detach_disk_reports_where_disk_is() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-free", VolumeState::Available, None);
    cloud.add_volume("vol-other", VolumeState::InUse, Some("i-2"));

    let vm = ResourceRef::new("i-1");
    let err = manager
        .detach_disk(&vm, &ResourceRef::new("vol-free"))
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotAttached { attached_to: None, .. }));
    assert!(err.is_not_found());

    let err = manager
        .detach_disk(&vm, &ResourceRef::new("vol-other"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CpiError::NotAttached { attached_to: Some(ref other), .. } if other.as_str() == "i-2")
    );
}

#[tokio::test(start_paused = true)]
async fn test_detach_disk_releases_device() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;
    cloud.add_volume("vol-1", VolumeState::Available, None);

    let vm = ResourceRef::new("i-1");
    let disk = ResourceRef::new("vol-1");
    manager.attach_disk(&vm, &disk).await.unwrap();
    manager.detach_disk(&vm, &disk).await.unwrap();

    assert_eq!(cloud.volume("vol-1").unwrap().state, VolumeState::Available);
    assert!(manager.get_disks(&vm).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_round_trip() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    cloud.add_volume("vol-1", VolumeState::Available, None);

    let snapshot = manager
        .snapshot_disk(&ResourceRef::new("vol-1"), &json!({"deployment": "cf"}))
        .await
        .unwrap();
    manager.delete_snapshot(&snapshot).await.unwrap();

    assert_eq!(cloud.called("delete_snapshot"), 1);

    let err = manager
        .snapshot_disk(&ResourceRef::new("vol-404"), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::Volume, .. }));
}

fn web_network() -> NetworkSpec {
    networks(json!({
        "default": {
            "type": "dynamic",
            "cloud_properties": {"net_id": "vxnet-0", "security_groups": ["default", "web"]},
        },
    }))
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_keeps_every_security_group() {
    let cloud = FakeCloud::new();
    cloud.add_security_group("sg-web", "web");
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let vm_id = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &web_network(),
            None,
        )
        .await
        .unwrap();

    let params = cloud.last_run().unwrap();
    assert_eq!(params.security_groups, vec!["sg-default", "sg-web"]);

    // Same groups again is not a change
    manager
        .configure_networks(&vm_id, &web_network())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_over_security_group_limit() {
    let cloud = FakeCloud::new();
    cloud.add_security_group("sg-web", "web");
    cloud.limit_security_groups(1);
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager
        .create_vm(
            "agent-1",
            &ResourceRef::new("img-stemcell"),
            &resource_pool(),
            &web_network(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::InvalidArgument(ref msg) if msg.contains("at most 1")));
    assert_eq!(cloud.called("run_instance"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_configure_networks_associates_vip() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;

    let spec = networks(json!({
        "default": {"type": "dynamic"},
        "public": {"type": "vip", "ip": "139.198.1.1"},
    }));
    manager
        .configure_networks(&ResourceRef::new("i-1"), &spec)
        .await
        .unwrap();

    let fip = cloud.floating_ip("139.198.1.1").unwrap();
    assert_eq!(fip.associated_vm, Some(ResourceRef::new("i-1")));
    assert!(settings.read("vm-one").await.unwrap().networks.contains_key("public"));

    // Without the vip network the address is released again
    manager
        .configure_networks(&ResourceRef::new("i-1"), &dynamic_network())
        .await
        .unwrap();
    assert_eq!(cloud.floating_ip("139.198.1.1").unwrap().associated_vm, None);
}

#[tokio::test(start_paused = true)]
async fn test_configure_networks_rejects_recreate_changes() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;

    let new_ip = networks(json!({
        "private": {
            "type": "manual",
            "ip": "10.0.0.99",
            "cloud_properties": {"net_id": "vxnet-0"},
        },
    }));
    let err = manager
        .configure_networks(&ResourceRef::new("i-1"), &new_ip)
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotSupported(ref msg) if msg.contains("IP address")));

    let missing_vip = networks(json!({
        "default": {"type": "dynamic"},
        "public": {"type": "vip", "ip": "1.2.3.4"},
    }));
    let err = manager
        .configure_networks(&ResourceRef::new("i-1"), &missing_vip)
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::FloatingIp, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_manual_network_with_router_binds_and_restarts() {
    let cloud = FakeCloud::new();
    let (manager, settings) = cloud.manager(CancellationFlag::new());
    seeded_vm(&cloud, settings.as_ref(), "i-1", "vm-one").await;

    let spec = networks(json!({
        "private": {
            "type": "manual",
            "ip": "10.0.0.5",
            "cloud_properties": {"net_id": "vxnet-0", "router_id": "rtr-1"},
        },
    }));
    manager
        .configure_networks(&ResourceRef::new("i-1"), &spec)
        .await
        .unwrap();

    assert_eq!(cloud.called("bind_static_address"), 1);
    assert_eq!(cloud.called("restart_instance"), 1);
    assert_eq!(cloud.vm_state("i-1"), Some(VmState::Running));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait() {
    let cloud = FakeCloud::new();
    cloud.stall_volumes();
    let flag = CancellationFlag::new();
    let (manager, _) = cloud.manager(flag.clone());

    let create = manager.create_disk(10240, None);
    tokio::pin!(create);
    tokio::select! {
        _ = &mut create => panic!("disk creation should still be waiting"),
        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => flag.cancel(),
    }

    let err = create.await.unwrap_err();
    assert!(matches!(err, CpiError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_volume_times_out() {
    let cloud = FakeCloud::new();
    cloud.stall_volumes();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager.create_disk(10240, None).await.unwrap_err();
    assert!(matches!(err, CpiError::Timeout { kind: ResourceKind::Volume, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_refreshes_once() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());
    cloud.add_volume("vol-1", VolumeState::Available, None);

    cloud.inject(ProviderError::Unauthorized("token expired".to_string()));
    assert!(manager.has_disk(&ResourceRef::new("vol-1")).await.unwrap());
    assert_eq!(cloud.refreshes(), 1);

    cloud.inject(ProviderError::Unauthorized("bad key".to_string()));
    cloud.inject(ProviderError::Unauthorized("bad key".to_string()));
    let err = manager
        .has_disk(&ResourceRef::new("vol-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::Provider(ProviderError::Unauthorized(_))));
    assert_eq!(cloud.refreshes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stemcell_resolution() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let by_name = manager
        .create_stemcell(&StemcellProperties {
            name: "bosh-stemcell-ubuntu".to_string(),
            ..StemcellProperties::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.as_str(), "img-stemcell");

    let err = manager
        .create_stemcell(&StemcellProperties {
            name: "bosh-stemcell-centos".to_string(),
            ..StemcellProperties::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { kind: ResourceKind::Image, .. }));

    manager.delete_stemcell(&by_name).await.unwrap();
    manager.delete_stemcell(&by_name).await.unwrap();
    assert_eq!(cloud.called("delete_image"), 1);
}

#[tokio::test]
async fn test_current_vm_id_requires_metadata_source() {
    let cloud = FakeCloud::new();
    let (manager, _) = cloud.manager(CancellationFlag::new());

    let err = manager.current_vm_id().await.unwrap_err();
    assert!(matches!(err, CpiError::NotSupported(_)));
}
