//! Profile and session types shared by the stores and the HTTP client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a staff user as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    Preparer,
    Staff,
    /// Any role this client does not know about yet
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Manager => write!(f, "manager"),
            UserRole::Preparer => write!(f, "preparer"),
            UserRole::Staff => write!(f, "staff"),
            UserRole::Other(role) => write!(f, "{}", role),
        }
    }
}

/// Cached projection of the authenticated staff user.
///
/// Only used for rendering; the server re-validates every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: UserRole,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub two_factor_enabled: bool,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == UserRole::Admin || self.permissions.iter().any(|p| p == permission)
    }
}

/// Cached projection of a client-portal contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalContact {
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub corporation_id: Option<String>,
}

impl PortalContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Second-factor challenge awaiting a verification code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTwoFactor {
    pub email: String,
    pub method: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PendingTwoFactor {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Why the server ended a session.
///
/// Rendered as the `reason` query parameter on the login redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    SessionTimeout,
    SessionTerminated,
}

impl SessionEndReason {
    pub const TIMEOUT_MARKER: &'static str = "Session expired due to inactivity";
    pub const TERMINATED_MARKER: &'static str = "Session terminated";

    /// Detect a session-invalidation signal in an error detail string
    pub fn from_detail(detail: &str) -> Option<Self> {
        if detail.contains(Self::TIMEOUT_MARKER) {
            Some(SessionEndReason::SessionTimeout)
        } else if detail.contains(Self::TERMINATED_MARKER) {
            Some(SessionEndReason::SessionTerminated)
        } else {
            None
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            SessionEndReason::SessionTimeout => "session_timeout",
            SessionEndReason::SessionTerminated => "session_terminated",
        }
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}
