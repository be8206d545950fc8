//! Registry client error types

use bosh_cpi_cloud::SettingsError;

/// Registry client errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No settings for instance `{0}'")]
    NotFound(String),

    #[error("Registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid registry response: {0}")]
    Invalid(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<RegistryError> for SettingsError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(key) => SettingsError::NotFound(key),
            RegistryError::Invalid(message) => SettingsError::Invalid(message),
            RegistryError::Json(e) => SettingsError::Invalid(e.to_string()),
            err @ (RegistryError::Status { .. } | RegistryError::Request(_)) => {
                SettingsError::Request(err.to_string())
            }
        }
    }
}
