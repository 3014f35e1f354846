//! Status arbitration: a fixed priority table over readiness conditions.
//!
//! Checking order encodes how urgently an operator must intervene, not the
//! order in which problems were observed. A `Blocked` condition is never
//! superseded by a `Waiting` one that would resolve on its own.

use glk_core::{Condition, FetchError, IntegrationError, NotLeader, Status};

use crate::config::Precedence;

/// Failing conditions learned while handling the current event.
/// `None` means the condition passed or was not relevant to the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Findings<'a> {
    pub image: Option<&'a FetchError>,
    pub database: Option<&'a IntegrationError>,
    pub leadership: Option<NotLeader>,
}

impl Findings<'_> {
    pub fn is_clear(&self) -> bool {
        self.image.is_none() && self.database.is_none() && self.leadership.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Arbiter {
    order: [Condition; 4],
    database_endpoint: String,
}

impl Arbiter {
    pub fn new(precedence: Precedence, database_endpoint: impl Into<String>) -> Self {
        use Condition::*;
        let order = match precedence {
            Precedence::ResourcesFirst => [Image, DatabaseRelation, DatabaseCredentials, Leadership],
            Precedence::LeadershipFirst => [Leadership, Image, DatabaseRelation, DatabaseCredentials],
        };
        Self { order, database_endpoint: database_endpoint.into() }
    }

    pub fn order(&self) -> &[Condition] { &self.order }

    /// Status of the highest-priority failing condition; `None` when all pass.
    pub fn arbitrate(&self, findings: &Findings<'_>) -> Option<Status> {
        self.order.iter().find_map(|c| self.check(*c, findings))
    }

    fn check(&self, cond: Condition, f: &Findings<'_>) -> Option<Status> {
        let ep = &self.database_endpoint;
        let msg = match cond {
            Condition::Image => format!("Unable to fetch image resource: {}", f.image?),
            Condition::Leadership => {
                f.leadership?;
                "Not leader".to_string()
            }
            Condition::DatabaseRelation | Condition::DatabaseCredentials => {
                let e = f.database.filter(|e| e.condition() == cond)?;
                match e {
                    IntegrationError::NotJoined => format!("Missing {} relation", ep),
                    IntegrationError::AmbiguousRelation { count } => format!("Too many {} relations ({})", ep, count),
                    IntegrationError::NotReady { .. } | IntegrationError::InvalidField { .. } => {
                        format!("Waiting for {} credentials: {}", ep, e)
                    }
                }
            }
        };
        Some(cond.status(msg))
    }
}
