//! Sessions and the authentication seam.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::message::Credentials;

/// Validates setup credentials during the handshake.
///
/// Implementations hold a principal store written once at startup and read
/// concurrently without synchronization. Authentication is all-or-nothing:
/// there is no partial session, and a rejection tears the connection down
/// before any route can be dispatched.
pub trait Authenticate: Send + Sync {
    /// Returns the verified principal, or [`Error::Auth`] to reject the
    /// handshake.
    ///
    /// [`Error::Auth`]: crate::error::Error::Auth
    fn authenticate(&self, credentials: &Credentials) -> Result<String>;
}

/// A handshake result binding a transport connection to a verified
/// identity.
///
/// Created once per handshake and immutable afterwards; every stream issued
/// over the connection references the session but does not own it.
#[derive(Debug, Clone)]
pub struct Session {
    connection_id: u64,
    principal: String,
    established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(connection_id: u64, principal: impl Into<String>) -> Self {
        Self {
            connection_id,
            principal: principal.into(),
            established_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// The identity verified at handshake time.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}
