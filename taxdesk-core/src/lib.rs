//! Taxdesk Core - Shared building blocks for the Taxdesk client
//!
//! Error taxonomy, configuration, logging setup and the profile types cached
//! by the client-side stores.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
