//! Seams to the host-owned collaborators. Reads are expected to be fast and
//! in-process; only spec application may leave the process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ApplyError, StoreError};
use crate::spec::PodSpec;

/// Key/value facts one participant shares over a relation.
pub type DataBag = BTreeMap<String, String>;

/// One concrete binding of an integration point to a remote application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationHandle {
    pub id: u32,
    pub endpoint: String,
    /// Remote application; `None` until the host knows who is on the other side.
    pub app: Option<String>,
    /// Remote units. Readers sort these before use.
    #[serde(default)]
    pub units: Vec<String>,
}

/// Owner of a data bag within a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant<'a> {
    App(&'a str),
    Unit(&'a str),
    LocalUnit,
}

pub trait RelationStore: Send + Sync {
    fn relations(&self, endpoint: &str) -> Vec<RelationHandle>;
    fn data_bag(&self, relation: &RelationHandle, participant: Participant<'_>) -> DataBag;
}

pub trait ResourceStore: Send + Sync {
    /// Raw bytes of an attached resource.
    fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError>;
}

pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Applies a declarative spec. Success means the call returned, not that the
/// cluster converged.
#[async_trait::async_trait]
pub trait SpecApplier: Send + Sync {
    async fn apply_spec(&self, spec: &PodSpec) -> Result<(), ApplyError>;
}

/// Tells an HTTP client where the served endpoint lives. Idempotent.
pub trait Announcer: Send + Sync {
    fn announce(&self, relation: &RelationHandle, host: &str, port: u16);
}
