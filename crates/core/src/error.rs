//! Error taxonomy. Every variant is recoverable by a later event; each one
//! classifies into exactly one arbitration [`Condition`].

use smallvec::SmallVec;
use thiserror::Error;

use crate::status::Condition;

/// Relation-side failures raised by the relation reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrationError {
    #[error("relation not joined")]
    NotJoined,
    #[error("expected exactly one relation, found {count}")]
    AmbiguousRelation { count: usize },
    #[error("missing {}", .missing.join(", "))]
    NotReady { missing: SmallVec<[&'static str; 4]> },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl IntegrationError {
    pub fn condition(&self) -> Condition {
        match self {
            IntegrationError::NotJoined | IntegrationError::AmbiguousRelation { .. } => Condition::DatabaseRelation,
            IntegrationError::NotReady { .. } | IntegrationError::InvalidField { .. } => Condition::DatabaseCredentials,
        }
    }
}

/// Failure reported verbatim by the external resource store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Resource-side failures raised by the resource fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("empty yaml")]
    EmptyResource,
    #[error("invalid yaml ({reason}): {content}")]
    MalformedResource { content: String, reason: String },
    #[error("missing key {key:?}")]
    IncompleteResource { key: &'static str },
}

impl FetchError {
    pub fn condition(&self) -> Condition { Condition::Image }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not leader")]
pub struct NotLeader;

impl NotLeader {
    pub fn condition(&self) -> Condition { Condition::Leadership }
}

/// Rejection from the spec-apply collaborator; the message is surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ApplyError(pub String);
