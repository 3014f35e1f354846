use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally visible workload status. Overwritten, never merged.
///
/// Variants are declared in urgency order, so `Ord` ranks `Blocked` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Status {
    Blocked(String),
    Waiting(String),
    Maintenance(String),
    Active,
}

impl Status {
    pub fn blocked(msg: impl Into<String>) -> Self { Status::Blocked(msg.into()) }
    pub fn waiting(msg: impl Into<String>) -> Self { Status::Waiting(msg.into()) }
    pub fn maintenance(msg: impl Into<String>) -> Self { Status::Maintenance(msg.into()) }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Blocked(_) => "blocked",
            Status::Waiting(_) => "waiting",
            Status::Maintenance(_) => "maintenance",
            Status::Active => "active",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Blocked(m) | Status::Waiting(m) | Status::Maintenance(m) => m,
            Status::Active => "",
        }
    }

    pub fn is_active(&self) -> bool { matches!(self, Status::Active) }
}

impl Default for Status {
    fn default() -> Self { Status::maintenance("initializing") }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            other => write!(f, "{}: {}", other.name(), other.message()),
        }
    }
}

/// Classes of readiness failure the arbiter ranks against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    /// Image resource unavailable or invalid.
    Image,
    /// Database relation missing or joined more than once.
    DatabaseRelation,
    /// Database relation joined but credentials incomplete.
    DatabaseCredentials,
    /// This unit is not the elected leader.
    Leadership,
}

impl Condition {
    /// Conditions that need an operator to act report `Blocked`; the rest resolve on their own.
    pub const fn needs_operator(self) -> bool {
        matches!(self, Condition::Image | Condition::DatabaseRelation)
    }

    pub fn status(self, msg: impl Into<String>) -> Status {
        if self.needs_operator() { Status::blocked(msg) } else { Status::waiting(msg) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_order() {
        let mut all = vec![
            Status::Active,
            Status::maintenance("m"),
            Status::waiting("w"),
            Status::blocked("b"),
        ];
        all.sort();
        let names: Vec<_> = all.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["blocked", "waiting", "maintenance", "active"]);
    }

    #[test]
    fn serde_shape() {
        let v = serde_json::to_value(Status::waiting("Not leader")).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "waiting", "message": "Not leader"}));
        let back: Status = serde_json::from_value(serde_json::json!({"kind": "active"})).unwrap();
        assert_eq!(back, Status::Active);
    }

    #[test]
    fn condition_maps_to_status_class() {
        assert_eq!(Condition::Image.status("x").name(), "blocked");
        assert_eq!(Condition::DatabaseRelation.status("x").name(), "blocked");
        assert_eq!(Condition::DatabaseCredentials.status("x").name(), "waiting");
        assert_eq!(Condition::Leadership.status("x").name(), "waiting");
    }
}
