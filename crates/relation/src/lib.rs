//! glk relation: typed projections over relation data bags.
//!
//! Pure reads over host-owned data; nothing here caches or mutates.

#![forbid(unsafe_code)]

use glk_core::{ConnectionFacts, DataBag, IntegrationError, Participant, RelationHandle, RelationStore, DEFAULT_DB_PORT};
use smallvec::SmallVec;
use tracing::debug;

pub mod http;

pub use http::{HttpClient, HttpProvider};

/// Reads [`ConnectionFacts`] from the single relation bound to a database endpoint.
#[derive(Debug, Clone)]
pub struct RelationReader {
    endpoint: String,
}

impl RelationReader {
    pub fn new(endpoint: impl Into<String>) -> Self { Self { endpoint: endpoint.into() } }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    pub fn read(&self, store: &dyn RelationStore) -> Result<ConnectionFacts, IntegrationError> {
        let relations = store.relations(&self.endpoint);
        let rel = match relations.as_slice() {
            [] => return Err(IntegrationError::NotJoined),
            [one] => one,
            many => return Err(IntegrationError::AmbiguousRelation { count: many.len() }),
        };
        let bags = candidate_bags(store, rel);

        let database = resolve(&bags, &["database"]);
        let host = resolve(&bags, &["host"]);
        // older providers publish `user`
        let username = resolve(&bags, &["username", "user"]);
        let password = resolve(&bags, &["password"]);

        let mut missing: SmallVec<[&'static str; 4]> = SmallVec::new();
        for (name, v) in [("database", &database), ("host", &host), ("username", &username), ("password", &password)] {
            if v.is_none() { missing.push(name); }
        }
        if !missing.is_empty() {
            debug!(endpoint = %self.endpoint, relation = rel.id, missing = ?missing, "database credentials incomplete");
            return Err(IntegrationError::NotReady { missing });
        }

        let port = match resolve(&bags, &["port"]) {
            None => DEFAULT_DB_PORT,
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(p) if p != 0 => p,
                _ => return Err(IntegrationError::InvalidField { field: "port", value: raw }),
            },
        };

        Ok(ConnectionFacts {
            database: database.unwrap_or_default(),
            host: host.unwrap_or_default(),
            port,
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        })
    }
}

/// Remote application bag first, then remote unit bags by unit name.
fn candidate_bags(store: &dyn RelationStore, rel: &RelationHandle) -> Vec<DataBag> {
    let mut units: Vec<&str> = rel.units.iter().map(String::as_str).collect();
    units.sort_unstable();
    let mut out = Vec::with_capacity(units.len() + 1);
    if let Some(app) = rel.app.as_deref() {
        out.push(store.data_bag(rel, Participant::App(app)));
    }
    for unit in units {
        out.push(store.data_bag(rel, Participant::Unit(unit)));
    }
    out
}

/// First non-empty value across the candidates; within a bag, earlier keys win.
fn resolve(bags: &[DataBag], keys: &[&str]) -> Option<String> {
    bags.iter().find_map(|bag| {
        keys.iter()
            .filter_map(|k| bag.get(*k))
            .find(|v| !v.is_empty())
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> DataBag {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn resolve_skips_empty_values() {
        let bags = vec![bag(&[("database", "")]), bag(&[("database", "gitlab")])];
        assert_eq!(resolve(&bags, &["database"]).as_deref(), Some("gitlab"));
        assert_eq!(resolve(&bags, &["host"]), None);
    }

    #[test]
    fn resolve_prefers_primary_key_within_bag() {
        let bags = vec![bag(&[("user", "legacy"), ("username", "modern")])];
        assert_eq!(resolve(&bags, &["username", "user"]).as_deref(), Some("modern"));
        let bags = vec![bag(&[("user", "legacy")])];
        assert_eq!(resolve(&bags, &["username", "user"]).as_deref(), Some("legacy"));
    }
}
