//! QingCloud provider error types

use bosh_cpi_cloud::ProviderError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QingCloudError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("QingCloud API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, QingCloudError>;

/// `ret_code` values of the IaaS API
pub mod ret_code {
    pub const MESSAGE_FORMAT: i64 = 1100;
    pub const AUTHENTICATION_FAILED: i64 = 1200;
    pub const MESSAGE_EXPIRED: i64 = 1300;
    pub const PERMISSION_DENIED: i64 = 1400;
    pub const RESOURCE_NOT_FOUND: i64 = 2100;
    pub const BALANCE_NOT_ENOUGH: i64 = 2400;
    pub const QUOTA_EXCEEDED: i64 = 2500;
    pub const INTERNAL_ERROR: i64 = 5000;
    pub const SERVER_BUSY: i64 = 5100;
    pub const RESOURCE_UNAVAILABLE: i64 = 5200;
    pub const SERVER_UPDATING: i64 = 5300;
}

impl From<QingCloudError> for ProviderError {
    fn from(err: QingCloudError) -> Self {
        match err {
            QingCloudError::Api { code, message } => match code {
                ret_code::AUTHENTICATION_FAILED | ret_code::MESSAGE_EXPIRED => {
                    ProviderError::Unauthorized(message)
                }
                ret_code::RESOURCE_NOT_FOUND => ProviderError::NotFound(message),
                // Operations on a resource in the wrong status are refused as PermissionDenied
                ret_code::PERMISSION_DENIED if message.contains("status") => {
                    ProviderError::Conflict(message)
                }
                ret_code::SERVER_BUSY => ProviderError::RateLimited {
                    message,
                    retry_after: None,
                },
                ret_code::INTERNAL_ERROR
                | ret_code::RESOURCE_UNAVAILABLE
                | ret_code::SERVER_UPDATING => ProviderError::ServerError(message),
                _ => ProviderError::BadRequest(format!("{code}: {message}")),
            },
            QingCloudError::Http {
                status,
                retry_after,
                body,
            } => match status {
                401 | 403 => ProviderError::Unauthorized(body),
                404 => ProviderError::NotFound(body),
                429 => ProviderError::RateLimited {
                    message: body,
                    retry_after,
                },
                500..=599 => ProviderError::ServerError(format!("HTTP {status}: {body}")),
                _ => ProviderError::BadRequest(format!("HTTP {status}: {body}")),
            },
            QingCloudError::Request(e) => e.into(),
            QingCloudError::JsonError(e) => e.into(),
            QingCloudError::Signing(message) => ProviderError::BadRequest(message),
            QingCloudError::MissingEnvVar(name) => {
                ProviderError::BadRequest(format!("missing environment variable {name}"))
            }
        }
    }
}
