//! CPI configuration
//!
//! The director hands the CPI an options file, either in the flat form
//!
//! ```yaml
//! cloud:
//!   plugin: qingcloud
//!   qingcloud: { region: pek3a, access_key_id: ..., secret_access_key: ... }
//! registry: { endpoint: ..., user: ..., password: ... }
//! agent: { ntp: [] }
//! ```
//!
//! or with everything nested under `cloud.properties` the way the BOSH
//! deployer renders it. Both load into the same [`CpiConfig`].

pub mod error;
pub mod options;

pub use error::*;
pub use options::*;

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "BOSH_CPI_CONFIG";

const CONFIG_CANDIDATES: &[&str] = &["cpi.yml", "cpi.json"];

const QINGCLOUD_REQUIRED: &[(&str, &[&str])] = &[
    ("region", &["region", "zone"]),
    ("access_key_id", &["access_key_id"]),
    ("secret_access_key", &["secret_access_key"]),
];

const HWCLOUD_REQUIRED: &[(&str, &[&str])] = &[
    ("url", &["url"]),
    ("access_key_id", &["access_key_id", "HWSAccessKeyId"]),
    ("secret_key", &["secret_key", "key", "Key"]),
    ("region_name", &["region_name", "RegionName"]),
];

const REGISTRY_REQUIRED: &[(&str, &[&str])] = &[
    ("endpoint", &["endpoint"]),
    ("user", &["user"]),
    ("password", &["password"]),
];

/// Per-user config directory (`~/.config/bosh-cpi`)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("bosh-cpi"))
}

/// Locate the CPI config file
///
/// Search order:
/// 1. `explicit` (the `--config` flag)
/// 2. `BOSH_CPI_CONFIG` environment variable
/// 3. Current directory: cpi.yml, cpi.json
/// 4. ~/.config/bosh-cpi/cpi.yml
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    if let Ok(path_str) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&path_str);
        if path.exists() {
            info!(config_path = %path.display(), "Using config from {}", CONFIG_PATH_ENV);
            return Ok(path);
        }
        warn!(env_path = %path_str, "{} is set but file does not exist", CONFIG_PATH_ENV);
    }

    let current_dir = std::env::current_dir()?;
    for filename in CONFIG_CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global = config_dir.join("cpi.yml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Read and validate the config file at `path`
pub fn load_config(path: &Path) -> Result<CpiConfig> {
    debug!(path = %path.display(), "Loading CPI config");
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let value: Value = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    CpiConfig::from_value(value)
}

/// Find, read and validate the config in one step
pub fn load(explicit: Option<&Path>) -> Result<CpiConfig> {
    let path = find_config_file(explicit)?;
    load_config(&path)
}

fn section<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

fn has_value(section: Option<&Map<String, Value>>, names: &[&str]) -> bool {
    section.is_some_and(|s| names.iter().any(|n| s.get(*n).is_some_and(|v| !v.is_null())))
}

fn check_required(
    missing: &mut Vec<String>,
    prefix: &str,
    section: Option<&Map<String, Value>>,
    required: &[(&str, &[&str])],
) {
    for (name, accepted) in required {
        if !has_value(section, accepted) {
            missing.push(format!("{prefix}:{name}"));
        }
    }
}

impl CpiConfig {
    /// Validate a parsed options document and convert it to typed options
    ///
    /// Every missing required parameter is reported, not just the first.
    pub fn from_value(value: Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("top level must be a mapping".to_string()))?;
        let cloud = section(root, "cloud")
            .ok_or_else(|| ConfigError::MissingParameters(vec!["cloud:plugin".to_string()]))?;
        let plugin = cloud
            .get("plugin")
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::MissingParameters(vec!["cloud:plugin".to_string()]))?;

        // `cloud.properties.*` (deployer form) or `cloud.*` (flat form)
        let properties = section(cloud, "properties").unwrap_or(cloud);
        let plugin_section = section(properties, plugin);
        let registry = section(root, "registry").or_else(|| section(properties, "registry"));
        let agent = section(root, "agent")
            .or_else(|| section(properties, "agent"))
            .cloned()
            .unwrap_or_default();

        let required = match plugin {
            "qingcloud" => QINGCLOUD_REQUIRED,
            "hwcloud" => HWCLOUD_REQUIRED,
            other => return Err(ConfigError::UnknownPlugin(other.to_string())),
        };

        let mut missing = Vec::new();
        check_required(&mut missing, plugin, plugin_section, required);
        check_required(&mut missing, "registry", registry, REGISTRY_REQUIRED);
        if !missing.is_empty() {
            return Err(ConfigError::MissingParameters(missing));
        }

        let plugin_value = Value::Object(plugin_section.cloned().unwrap_or_default());
        let cloud = match plugin {
            "qingcloud" => CloudOptions::QingCloud(serde_json::from_value(plugin_value)?),
            _ => CloudOptions::HwCloud(serde_json::from_value(plugin_value)?),
        };
        let registry =
            serde_json::from_value(Value::Object(registry.cloned().unwrap_or_default()))?;

        Ok(CpiConfig {
            cloud,
            registry,
            agent,
        })
    }
}
