//! Method dispatch onto the lifecycle manager

use crate::protocol::{CpiRequest, Failure};
use bosh_cpi_cloud::{
    CpiError, LifecycleManager, NetworkSpec, ResourceRef, StemcellProperties, VmCloudProperties,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

/// CPI methods this binary answers
pub const METHODS: &[&str] = &[
    "info",
    "current_vm_id",
    "create_stemcell",
    "delete_stemcell",
    "create_vm",
    "delete_vm",
    "has_vm",
    "reboot_vm",
    "set_vm_metadata",
    "configure_networks",
    "create_disk",
    "delete_disk",
    "has_disk",
    "attach_disk",
    "detach_disk",
    "get_disks",
    "snapshot_disk",
    "delete_snapshot",
];

/// Deserialize positional argument `index`; absent arguments read as `null`
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<T, CpiError> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| CpiError::InvalidArgument(format!("argument `{name}': {e}")))
}

fn resource(args: &[Value], index: usize, name: &str) -> Result<ResourceRef, CpiError> {
    let id: String = arg(args, index, name)?;
    if id.is_empty() {
        return Err(CpiError::InvalidArgument(format!(
            "argument `{name}' must not be empty"
        )));
    }
    Ok(ResourceRef::new(id))
}

/// Execute one request
pub async fn dispatch(
    manager: &LifecycleManager,
    request: &CpiRequest,
) -> Result<Value, Failure> {
    let args = request.arguments.as_slice();
    info!("CPI call: {}", request.method);
    debug!("Arguments: {}", serde_json::Value::from(args.to_vec()));

    let result = match request.method.as_str() {
        "info" => json!({
            "api_version": 1,
            "stemcell_formats": [format!("{}-raw", manager.provider().name())],
        }),
        "current_vm_id" => json!(manager.current_vm_id().await?),

        "create_stemcell" => {
            // arguments: image_path, cloud_properties
            let properties: StemcellProperties = arg(args, 1, "cloud_properties")?;
            json!(manager.create_stemcell(&properties).await?)
        }
        "delete_stemcell" => {
            manager
                .delete_stemcell(&resource(args, 0, "stemcell_id")?)
                .await?;
            Value::Null
        }

        "create_vm" => {
            // arguments: agent_id, stemcell_id, cloud_properties, networks, disk_locality, env
            let agent_id: String = arg(args, 0, "agent_id")?;
            let stemcell_id = resource(args, 1, "stemcell_id")?;
            let cloud_properties: VmCloudProperties = arg(args, 2, "cloud_properties")?;
            let networks: NetworkSpec = arg(args, 3, "networks")?;
            let env: Option<Value> = arg(args, 5, "env")?;
            json!(
                manager
                    .create_vm(&agent_id, &stemcell_id, &cloud_properties, &networks, env)
                    .await?
            )
        }
        "delete_vm" => {
            manager.delete_vm(&resource(args, 0, "vm_id")?).await?;
            Value::Null
        }
        "has_vm" => json!(manager.has_vm(&resource(args, 0, "vm_id")?).await?),
        "reboot_vm" => {
            manager.reboot_vm(&resource(args, 0, "vm_id")?).await?;
            Value::Null
        }
        "set_vm_metadata" => {
            // Tagging is not offered by either backend
            debug!("Ignoring metadata for `{}'", resource(args, 0, "vm_id")?);
            Value::Null
        }
        "configure_networks" => {
            let vm_id = resource(args, 0, "vm_id")?;
            let networks: NetworkSpec = arg(args, 1, "networks")?;
            manager.configure_networks(&vm_id, &networks).await?;
            Value::Null
        }

        "create_disk" => {
            // arguments: size, cloud_properties, vm_locality
            let size_mib: u64 = arg(args, 0, "size")?;
            let vm_locality: Option<String> = arg(args, 2, "vm_locality")?;
            let vm_locality = vm_locality.map(ResourceRef::new);
            json!(manager.create_disk(size_mib, vm_locality.as_ref()).await?)
        }
        "delete_disk" => {
            manager.delete_disk(&resource(args, 0, "disk_id")?).await?;
            Value::Null
        }
        "has_disk" => json!(manager.has_disk(&resource(args, 0, "disk_id")?).await?),
        "attach_disk" => {
            let vm_id = resource(args, 0, "vm_id")?;
            let disk_id = resource(args, 1, "disk_id")?;
            let device = manager.attach_disk(&vm_id, &disk_id).await?;
            info!("Disk `{}' is {} on `{}'", disk_id, device, vm_id);
            Value::Null
        }
        "detach_disk" => {
            let vm_id = resource(args, 0, "vm_id")?;
            let disk_id = resource(args, 1, "disk_id")?;
            manager.detach_disk(&vm_id, &disk_id).await?;
            Value::Null
        }
        "get_disks" => json!(manager.get_disks(&resource(args, 0, "vm_id")?).await?),

        "snapshot_disk" => {
            let disk_id = resource(args, 0, "disk_id")?;
            let metadata: Value = arg(args, 1, "metadata")?;
            json!(manager.snapshot_disk(&disk_id, &metadata).await?)
        }
        "delete_snapshot" => {
            manager
                .delete_snapshot(&resource(args, 0, "snapshot_id")?)
                .await?;
            Value::Null
        }

        other => return Err(Failure::NotImplemented(other.to_string())),
    };

    Ok(result)
}
