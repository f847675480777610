//! Unified error handling system
//!
//! The HTTP client owns authentication recovery only; every other failure is
//! carried to the caller unchanged through these variants.

use crate::types::SessionEndReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub type TaxdeskResult<T> = Result<T, TaxdeskError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the Taxdesk client
#[derive(Error, Debug)]
pub enum TaxdeskError {
    /// A 401 that was not (or could no longer be) recovered by a refresh.
    #[error("Authentication expired for {path}: {message}")]
    AuthExpired {
        message: String,
        path: String,
        context: ErrorContext,
    },

    /// The server ended the session; no refresh is attempted.
    #[error("Session invalidated ({reason}): {message}")]
    SessionInvalidated {
        reason: SessionEndReason,
        message: String,
        context: ErrorContext,
    },

    #[error("Session refresh failed: {message}")]
    RefreshFailed {
        message: String,
        status: Option<u16>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Server error (HTTP {status}): {message}")]
    Server {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        status: Option<u16>,
        field: Option<String>,
        errors: Option<serde_json::Value>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl TaxdeskError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            TaxdeskError::AuthExpired { context, .. }
            | TaxdeskError::SessionInvalidated { context, .. }
            | TaxdeskError::RefreshFailed { context, .. }
            | TaxdeskError::Network { context, .. }
            | TaxdeskError::Server { context, .. }
            | TaxdeskError::Validation { context, .. }
            | TaxdeskError::Storage { context, .. }
            | TaxdeskError::Config { context, .. }
            | TaxdeskError::Internal { context, .. } => Some(context),
            TaxdeskError::Io(_) | TaxdeskError::Serialization(_) => None,
        }
    }

    /// HTTP status associated with the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TaxdeskError::AuthExpired { .. } | TaxdeskError::SessionInvalidated { .. } => {
                Some(401)
            }
            TaxdeskError::RefreshFailed { status, .. } => *status,
            TaxdeskError::Server { status, .. } => Some(*status),
            TaxdeskError::Validation { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this failure ended the local session
    pub fn is_session_ending(&self) -> bool {
        matches!(
            self,
            TaxdeskError::SessionInvalidated { .. } | TaxdeskError::RefreshFailed { .. }
        )
    }

    /// Check if error is recoverable by the caller trying again later
    pub fn is_recoverable(&self) -> bool {
        match self {
            TaxdeskError::Network { .. } => true,
            TaxdeskError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            TaxdeskError::Internal { .. } | TaxdeskError::Storage { .. } => {
                error!(error_id = ?error_id, error = %self, "Internal error occurred");
            }
            TaxdeskError::Config { .. } | TaxdeskError::Validation { .. } => {
                error!(error_id = ?error_id, error = %self, "Configuration or validation error");
            }
            TaxdeskError::SessionInvalidated { .. }
            | TaxdeskError::RefreshFailed { .. }
            | TaxdeskError::AuthExpired { .. } => {
                warn!(error_id = ?error_id, error = %self, "Session ended or rejected");
            }
            TaxdeskError::Network { .. } => {
                warn!(error_id = ?error_id, error = %self, "Network error (may be recoverable)");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::TaxdeskError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::TaxdeskError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::TaxdeskError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'taxdesk config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! network_error {
    ($msg:expr, $component:expr) => {
        $crate::TaxdeskError::Network {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check network connectivity and API status"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::TaxdeskError::Network {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check network connectivity and API status"),
        }
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr, $component:expr) => {
        $crate::TaxdeskError::Internal {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
}
