//! Typed calls over the authenticated client

pub mod auth;
pub mod portal;
pub mod resources;

pub use auth::{AuthApi, LoginOutcome};
pub use portal::PortalAuthApi;
pub use resources::{ListParams, NotificationsApi, Page, ResourceClient, ResourceKind};

use serde::Serialize;

/// Credentials posted to a login endpoint
#[derive(Debug, Serialize)]
pub(crate) struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}
