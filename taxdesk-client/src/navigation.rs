//! Where the application goes when a session ends

use std::sync::{Arc, Mutex, PoisonError};
use taxdesk_core::SessionEndReason;
use tracing::info;

/// Moves the application to another location
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Login location, tagged with the reason the server gave for ending the session
pub fn login_location(login_route: &str, reason: Option<SessionEndReason>) -> String {
    match reason {
        Some(reason) => format!("{}?reason={}", login_route, reason.as_code()),
        None => login_route.to_string(),
    }
}

/// Keeps every location it was sent to
#[derive(Debug, Clone, Default)]
pub struct RecordingNavigator {
    history: Arc<Mutex<Vec<String>>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, location: &str) {
        info!(location, "Navigating");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(location.to_string());
    }
}
