//! Error taxonomy for CPI lifecycle operations

use crate::resource::{ResourceKind, ResourceRef};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`ProviderClient`](crate::ProviderClient) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource is in a state that does not allow the operation yet
    #[error("Incorrect resource state: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Errors raised by a [`SettingsStore`](crate::SettingsStore) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("No settings stored for `{0}`")]
    NotFound(String),

    #[error("Registry request failed: {0}")]
    Request(String),

    #[error("Invalid settings document: {0}")]
    Invalid(String),
}

/// Errors surfaced to the orchestrator by lifecycle verbs
#[derive(Error, Debug)]
pub enum CpiError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid network spec: {0}")]
    InvalidSpec(String),

    #[error("{kind} `{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{}", not_attached_message(.disk, .vm, .attached_to.as_ref()))]
    NotAttached {
        disk: ResourceRef,
        vm: ResourceRef,
        attached_to: Option<ResourceRef>,
    },

    #[error("{0}")]
    CloudError(String),

    #[error("Timed out waiting for {kind} `{id}' to be {}", .targets.join(", "))]
    Timeout {
        kind: ResourceKind,
        id: String,
        targets: Vec<String>,
    },

    #[error("{kind} `{id}' state is {observed}, expected {}", .expected.join(", "))]
    TerminalState {
        kind: ResourceKind,
        id: String,
        observed: String,
        expected: Vec<String>,
    },

    #[error("Task cancelled")]
    Cancelled,

    #[error("{0}")]
    NotSupported(String),

    #[error("VM `{vm}' creation failed, cleanup attempted: {reason}")]
    CreationFailed { vm: ResourceRef, reason: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

fn not_attached_message(
    disk: &ResourceRef,
    vm: &ResourceRef,
    attached_to: Option<&ResourceRef>,
) -> String {
    match attached_to {
        Some(other) => format!("Disk `{disk}' is attached to `{other}', not to `{vm}'"),
        None => format!("Disk `{disk}' is not attached to any instance (requested `{vm}')"),
    }
}

impl CpiError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        CpiError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the error belongs to the "referenced resource is absent" category
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CpiError::NotFound { .. }
                | CpiError::NotAttached { .. }
                | CpiError::Provider(ProviderError::NotFound(_))
        )
    }

    /// Whether the orchestrator may retry the same call without changing input
    pub fn ok_to_retry(&self) -> bool {
        match self {
            CpiError::CreationFailed { .. } | CpiError::CloudError(_) => true,
            CpiError::Provider(e) => matches!(
                e,
                ProviderError::RateLimited { .. }
                    | ProviderError::ServerError(_)
                    | ProviderError::Transport(_)
                    | ProviderError::Conflict(_)
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CpiError>;
