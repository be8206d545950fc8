//! External CPI wire format
//!
//! The director writes one request to stdin and reads one response from
//! stdout:
//!
//! ```text
//! {"method": "create_disk", "arguments": [10240, {}, null], "context": {...}}
//! {"result": "vol-xxxxxxxx", "error": null, "log": ""}
//! ```

use bosh_cpi_cloud::CpiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct CpiRequest {
    pub method: String,

    #[serde(default)]
    pub arguments: Vec<Value>,

    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpiResponse {
    pub result: Value,
    pub error: Option<ErrorBody>,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub ok_to_retry: bool,
}

/// Ways a request can fail
#[derive(Debug)]
pub enum Failure {
    /// The method is not part of the CPI
    NotImplemented(String),
    Cpi(CpiError),
}

impl From<CpiError> for Failure {
    fn from(err: CpiError) -> Self {
        Failure::Cpi(err)
    }
}

impl CpiResponse {
    pub fn success(result: Value) -> Self {
        Self {
            result,
            error: None,
            log: String::new(),
        }
    }

    pub fn failure(failure: &Failure) -> Self {
        let error = match failure {
            Failure::NotImplemented(method) => ErrorBody {
                error_type: "Bosh::Clouds::NotImplemented".to_string(),
                message: format!("Method `{method}' is not implemented"),
                ok_to_retry: false,
            },
            Failure::Cpi(err) => ErrorBody {
                error_type: bosh_error_type(err).to_string(),
                message: err.to_string(),
                ok_to_retry: err.ok_to_retry(),
            },
        };
        Self {
            result: Value::Null,
            error: Some(error),
            log: String::new(),
        }
    }
}

/// Director-side class of a lifecycle error
pub fn bosh_error_type(err: &CpiError) -> &'static str {
    match err {
        CpiError::CreationFailed { .. } => "Bosh::Clouds::VMCreationFailed",
        CpiError::NotSupported(_) => "Bosh::Clouds::NotSupported",
        CpiError::NotAttached { .. } => "Bosh::Clouds::DiskNotAttached",
        _ => "Bosh::Clouds::CloudError",
    }
}
