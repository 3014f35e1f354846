//! glk core: value types, status model, error taxonomy and the seams to the
//! host-owned collaborators (relation data, resources, leadership, apply).

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod host;
pub mod spec;
pub mod status;

pub use error::{ApplyError, FetchError, IntegrationError, NotLeader, StoreError};
pub use event::{Deferred, Event};
pub use host::{Announcer, DataBag, Leadership, Participant, RelationHandle, RelationStore, ResourceStore, SpecApplier};
pub use spec::PodSpec;
pub use status::{Condition, Status};

/// MySQL port assumed when the provider does not publish one.
pub const DEFAULT_DB_PORT: u16 = 3306;

/// Placeholder shown instead of secrets.
pub const REDACTED: &str = "<redacted>";

/// Database connection facts published over the database integration.
///
/// Replaced wholesale on every successful read; never merged field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFacts {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionFacts {
    /// All fields non-empty and a non-zero port.
    pub fn is_complete(&self) -> bool {
        !self.database.is_empty()
            && !self.host.is_empty()
            && self.port != 0
            && !self.username.is_empty()
            && !self.password.is_empty()
    }
}

impl fmt::Debug for ConnectionFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFacts")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Registry coordinates and pull credentials of the workload image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub registry_path: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ImageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDescriptor")
            .field("registry_path", &self.registry_path)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .finish()
    }
}

/// Convergence state owned by the reconciler and persisted between events.
///
/// A missing document (or missing keys) deserializes to the all-zero state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerState {
    pub is_started: bool,
    pub has_image: bool,
    pub image: Option<ImageDescriptor>,
    pub database: Option<ConnectionFacts>,
    /// Successful convergences so far. Deferred events only re-fire once this moves.
    pub generation: u64,
}

impl ReconcilerState {
    /// Both convergence prerequisites are populated.
    pub fn is_ready(&self) -> bool {
        self.has_image && self.image.is_some() && self.database.is_some()
    }

    /// Copy with every password blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if let Some(img) = out.image.as_mut() {
            img.password = REDACTED.to_string();
        }
        if let Some(db) = out.database.as_mut() {
            db.password = REDACTED.to_string();
        }
        out
    }
}

pub mod prelude {
    pub use super::{
        Announcer, ApplyError, Condition, ConnectionFacts, DataBag, Deferred, Event, FetchError, ImageDescriptor,
        IntegrationError, Leadership, NotLeader, Participant, PodSpec, ReconcilerState, RelationHandle,
        RelationStore, ResourceStore, SpecApplier, Status, StoreError, DEFAULT_DB_PORT,
    };
}
