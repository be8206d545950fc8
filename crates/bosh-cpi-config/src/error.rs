use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "CPI config file not found. Looked in:\n\
        - BOSH_CPI_CONFIG environment variable\n\
        - current directory: cpi.yml, cpi.json\n\
        - ~/.config/bosh-cpi/cpi.yml\n\
        or pass --config explicitly"
    )]
    ConfigFileNotFound,

    #[error("Config file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("missing configuration parameters > {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Unknown cloud plugin `{0}': expected qingcloud or hwcloud")]
    UnknownPlugin(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
