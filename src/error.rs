//! Application error types.
//!
//! Every failure the bot can hit is funneled into [`AppError`]. Only
//! configuration errors are fatal; everything else is scoped to a single
//! change or a single poll cycle and is retried on the next tick.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
///
/// All variants serialize to a structured JSON object so they can be
/// written to structured logs as-is.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Gerrit REST request failed with a non-success status.
    #[error("Gerrit API error: {message}")]
    GerritApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authentication failed or credentials invalid.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a Gerrit API error.
    pub fn gerrit_api(message: impl Into<String>) -> Self {
        Self::GerritApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a Gerrit API error with status code and endpoint.
    pub fn gerrit_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GerritApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field.
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must terminate the process.
    ///
    /// Only configuration problems are fatal; transport, decode and post
    /// failures are retried on the next poll cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

// Conversions from common error types

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::gerrit_api(format!("HTTP error: {}", err))
        } else if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("Invalid TOML: {}", err))
    }
}
