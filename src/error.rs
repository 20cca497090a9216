//! Error types for the store layer and structured tool responses.

use serde::Serialize;
use std::fmt;

/// Errors from the backing document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or its collections are missing. Handlers degrade to
    /// no-ops on this; tools answer "not available".
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Rate-limit signal from the store. Retried with backoff before surfacing.
    #[error("store rate limited: {0}")]
    RateLimited(String),

    /// Any other failed request (bad status, store-side error code).
    #[error("store request failed: {0}")]
    Request(String),

    /// Response body did not decode into the expected shape.
    #[error("store response decode failed: {0}")]
    Decode(String),
}

impl StoreError {
    /// True when the whole coordination layer should fall back to degraded mode.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Request(err.to_string())
        }
    }
}

/// Error codes for programmatic error handling at the tool boundary.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,

    // Not found errors
    UnknownAgent,
    UnknownRecipient,

    // Infrastructure errors
    StoreUnavailable,
    RateLimited,
    InternalError,
    UnknownTool,
}

/// Structured error for tool responses.
#[derive(Debug, Serialize)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn unknown_agent(name: &str) -> Self {
        Self::new(ErrorCode::UnknownAgent, format!("Agent not found: {}", name))
    }

    /// Unknown message recipient; lists who is currently reachable so the
    /// caller can correct the address without another round-trip.
    pub fn unknown_recipient(name: &str, active: &[String]) -> Self {
        let roster = if active.is_empty() {
            "no agents are currently active".to_string()
        } else {
            format!("active agents: {}", active.join(", "))
        };
        Self::new(
            ErrorCode::UnknownRecipient,
            format!("No active agent named '{}' ({})", name, roster),
        )
    }

    pub fn store_unavailable() -> Self {
        Self::new(
            ErrorCode::StoreUnavailable,
            "Coordination store is not available",
        )
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorCode::UnknownTool, format!("Unknown tool: {}", name))
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => ToolError::store_unavailable(),
            StoreError::RateLimited(msg) => Self::new(ErrorCode::RateLimited, msg),
            other => ToolError::internal(other),
        }
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ToolError>() {
            Ok(tool_err) => tool_err,
            Err(err) => match err.downcast::<StoreError>() {
                Ok(store_err) => store_err.into(),
                Err(err) => ToolError::internal(err),
            },
        }
    }
}

/// Result type for tool operations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;
