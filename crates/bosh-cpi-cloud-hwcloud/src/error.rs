//! HwCloud provider error types

use bosh_cpi_cloud::ProviderError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HwCloudError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("HwCloud API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    #[error("Router static bindings are not available on HwCloud")]
    Unsupported,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, HwCloudError>;

fn is_auth_failure(code: &str) -> bool {
    matches!(
        code,
        "AuthFailure" | "SignatureDoesNotMatch" | "RequestExpired" | "InvalidAccessKeyId"
    )
}

fn is_wrong_state(code: &str) -> bool {
    matches!(
        code,
        "IncorrectState" | "IncorrectInstanceState" | "VolumeInUse" | "InvalidIPAddress.InUse"
    )
}

impl From<HwCloudError> for ProviderError {
    fn from(err: HwCloudError) -> Self {
        match err {
            HwCloudError::Api { code, message } => match code.as_str() {
                c if is_auth_failure(c) => ProviderError::Unauthorized(message),
                c if c.ends_with(".NotFound") => ProviderError::NotFound(message),
                c if is_wrong_state(c) => ProviderError::Conflict(message),
                "RequestLimitExceeded" | "Throttling" => ProviderError::RateLimited {
                    message,
                    retry_after: None,
                },
                "InternalError" | "Unavailable" | "ServiceUnavailable" => {
                    ProviderError::ServerError(message)
                }
                _ => ProviderError::BadRequest(format!("{code}: {message}")),
            },
            HwCloudError::Http {
                status,
                retry_after,
                body,
            } => match status {
                401 | 403 => ProviderError::Unauthorized(body),
                404 => ProviderError::NotFound(body),
                429 | 503 => ProviderError::RateLimited {
                    message: body,
                    retry_after,
                },
                500..=599 => ProviderError::ServerError(format!("HTTP {status}: {body}")),
                _ => ProviderError::BadRequest(format!("HTTP {status}: {body}")),
            },
            HwCloudError::Request(e) => e.into(),
            HwCloudError::JsonError(e) => e.into(),
            HwCloudError::Signing(message) => ProviderError::BadRequest(message),
            err @ (HwCloudError::MissingEnvVar(_)
            | HwCloudError::InvalidUrl(_)
            | HwCloudError::Unsupported) => ProviderError::BadRequest(err.to_string()),
        }
    }
}
