//! Error types for the converter framework

use thiserror::Error;
use zigbee_core::StackError;

/// Errors raised while converting a single set/get request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// No converter (or not this converter) owns the key
    #[error("Unhandled key: {0}")]
    UnhandledKey(String),

    /// The converter owns the key but cannot read it back
    #[error("Get not supported for key: {0}")]
    GetNotSupported(String),

    /// The key is exposed as state only
    #[error("Key is read-only: {0}")]
    ReadOnly(String),

    /// The requested value is outside the key's domain
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// A user supplied payload could not be encoded
    #[error("Malformed payload for {key}: {reason}")]
    MalformedPayload { key: String, reason: String },

    /// Endpoint name or id does not exist on the device
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// No session attached for the device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Failure returned by the stack
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
}

impl ConvertError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while assembling a device definition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    /// Two converters claim one key without a precedence annotation
    #[error("Duplicate key '{key}' in definition {model}: claimed by {first} and {second}")]
    DuplicateKey {
        model: String,
        key: String,
        first: String,
        second: String,
    },

    /// Neither a zigbee model nor a fingerprint was declared
    #[error("Definition {0} has no zigbeeModel or fingerprint")]
    NoMatcher(String),

    /// More than one source supplied an endpoint map
    #[error("Definition {0} received more than one endpoint map")]
    MultipleEndpointMaps(String),

    /// A fragment needs an endpoint map but none was supplied
    #[error("Extend {extend} in definition {model} requires an endpoint map")]
    MissingEndpointMap { model: String, extend: String },

    /// An exposed capability is inconsistent
    #[error("Invalid expose in definition {model}: {reason}")]
    InvalidExpose { model: String, reason: String },
}

/// Errors raised while loading a catalog file
#[derive(Error, Debug)]
pub enum CatalogError {
    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A declaration failed to assemble
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),
}
