//! # todosync-drive
//!
//! Google Drive v3 as the remote replica.
//!
//! - [`auth`]: OAuth client secret, cached token, refresh and code exchange
//! - [`store`]: [`DriveStore`], the [`todosync_sync::RemoteStore`] implementation

pub mod auth;
mod error;
pub mod store;

pub use auth::{Credentials, Token, TokenSource};
pub use error::DriveError;
pub use store::DriveStore;

use std::time::Duration;

/// Blocking HTTP agent with connect and overall timeouts.
pub(crate) fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
}
