use serde::{Deserialize, Serialize};

/// Inbound events delivered by the host's lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    Start,
    UpdateStatus,
    ConfigChanged,
    UpgradeCharm,
    LeaderElected,
    DatabaseRelationJoined,
    DatabaseRelationChanged,
    DatabaseRelationBroken,
    WebsiteRelationJoined { relation_id: u32 },
    ImageAvailable,
    ImageFailed { reason: String },
}

/// A deferred event and the convergence generation it was deferred at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferred {
    pub event: Event,
    pub generation: u64,
}

impl Event {
    /// Resolve a hook name such as `mysql-relation-changed` against the
    /// configured endpoint names.
    pub fn from_hook(
        hook: &str,
        db_endpoint: &str,
        web_endpoint: &str,
        relation_id: Option<u32>,
        reason: Option<&str>,
    ) -> Option<Event> {
        let ev = match hook {
            "start" => Event::Start,
            "update-status" => Event::UpdateStatus,
            "config-changed" => Event::ConfigChanged,
            "upgrade-charm" => Event::UpgradeCharm,
            "leader-elected" => Event::LeaderElected,
            "image-available" => Event::ImageAvailable,
            "image-failed" => Event::ImageFailed { reason: reason.unwrap_or("image resource failed").to_string() },
            other => {
                let (endpoint, kind) = other.split_once("-relation-")?;
                match (endpoint, kind) {
                    (e, "joined") if e == db_endpoint => Event::DatabaseRelationJoined,
                    (e, "changed") if e == db_endpoint => Event::DatabaseRelationChanged,
                    (e, "broken") if e == db_endpoint => Event::DatabaseRelationBroken,
                    (e, "joined") if e == web_endpoint => Event::WebsiteRelationJoined { relation_id: relation_id.unwrap_or(0) },
                    _ => return None,
                }
            }
        };
        Some(ev)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::UpdateStatus => "update-status",
            Event::ConfigChanged => "config-changed",
            Event::UpgradeCharm => "upgrade-charm",
            Event::LeaderElected => "leader-elected",
            Event::DatabaseRelationJoined => "database-relation-joined",
            Event::DatabaseRelationChanged => "database-relation-changed",
            Event::DatabaseRelationBroken => "database-relation-broken",
            Event::WebsiteRelationJoined { .. } => "website-relation-joined",
            Event::ImageAvailable => "image-available",
            Event::ImageFailed { .. } => "image-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_resolve_against_endpoint_names() {
        assert_eq!(Event::from_hook("start", "mysql", "website", None, None), Some(Event::Start));
        assert_eq!(
            Event::from_hook("mysql-relation-changed", "mysql", "website", None, None),
            Some(Event::DatabaseRelationChanged)
        );
        assert_eq!(
            Event::from_hook("website-relation-joined", "mysql", "website", Some(7), None),
            Some(Event::WebsiteRelationJoined { relation_id: 7 })
        );
        assert_eq!(Event::from_hook("website-relation-broken", "mysql", "website", None, None), None);
        assert_eq!(Event::from_hook("db-relation-joined", "mysql", "website", None, None), None);
        assert_eq!(Event::from_hook("bogus", "mysql", "website", None, None), None);
    }

    #[test]
    fn serde_tagging() {
        let v = serde_json::to_value(Event::WebsiteRelationJoined { relation_id: 3 }).unwrap();
        assert_eq!(v, serde_json::json!({"event": "website-relation-joined", "relation_id": 3}));
    }
}
