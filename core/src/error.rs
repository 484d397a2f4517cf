//! Error types for the Alma client.
//!
//! # Design
//! `Request` carries the HTTP status and the message Alma put in its error
//! body, so callers can tell "user not found" apart from "bad API key"
//! without re-parsing anything. `Configuration` is only produced while the
//! client or registry is being set up. A cache miss is never an error; it
//! falls through to a network fetch.

use thiserror::Error;

/// Errors returned by the transport adapter, the resource framework and the
/// client facade.
#[derive(Debug, Error)]
pub enum AlmaError {
    /// Missing API key, missing transport, or an invalid configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The API answered with a non-2xx status.
    #[error("request failed with HTTP {status}: {message}")]
    Request { status: u16, message: String },

    /// The request never produced an HTTP response (DNS, TLS, connection reset).
    #[error("transport failed: {0}")]
    Transport(String),

    /// A 2xx response body was not valid JSON.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The JSON was valid but not shaped like a resource (e.g. not an object).
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// Identifiers passed to a path builder were too few, too many or empty.
    #[error("invalid identifiers: {0}")]
    InvalidIdentifiers(String),

    /// Resource data lacked the configured identifier field.
    #[error("resource data has no `{field}` identifier")]
    MissingIdentifier { field: String },

    /// No resource type is registered under this kind.
    #[error("unknown resource type `{0}`")]
    UnknownResource(String),

    /// The resource type declares no child with this name.
    #[error("unknown sub-resource `{0}`")]
    UnknownChild(String),
}

impl AlmaError {
    /// HTTP status of a failed request, if this error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AlmaError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T, E = AlmaError> = std::result::Result<T, E>;
