//! Taxdesk Client - Authenticated access to the Taxdesk CRM API
//!
//! Credentials travel only in the cookie jar. When a request fails with an
//! expired credential the client refreshes the session once, parks every other
//! request that fails meanwhile, and replays them all after the refresh
//! settles. Session-ending outcomes clear the session stores and send the
//! application to its login route; nothing else in the workspace does that.
//!
//! ## Layers
//! - [`transport`]: one HTTP exchange, cookies attached by the jar
//! - [`refresh`]: the single-flight refresh lease and its wait queue
//! - [`client`]: the interceptor tying transport, refresh, stores and navigation together
//! - [`api`]: typed calls for auth flows and the REST collections

pub mod api;
pub mod client;
pub mod navigation;
pub mod refresh;
pub mod transport;

pub use api::{
    AuthApi, ListParams, LoginOutcome, NotificationsApi, Page, PortalAuthApi, ResourceClient,
    ResourceKind,
};
pub use client::{AuthenticatedClient, AuthenticatedClientBuilder, SessionEndpoints};
pub use navigation::{login_location, Navigator, RecordingNavigator};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshLease, RefreshTicket, RefreshWait};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
