use glk_core::{Participant, RelationHandle, RelationStore};

/// Local bag key the host fills with this unit's address on the relation.
pub const INGRESS_ADDRESS_KEY: &str = "ingress-address";

/// A consumer of the served HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClient {
    pub relation: RelationHandle,
    pub ingress_address: Option<String>,
}

/// Provider side of the HTTP integration.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    endpoint: String,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>) -> Self { Self { endpoint: endpoint.into() } }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    /// One client per relation instance, ordered by relation id.
    pub fn clients(&self, store: &dyn RelationStore) -> Vec<HttpClient> {
        let mut rels = store.relations(&self.endpoint);
        rels.sort_by_key(|r| r.id);
        rels.into_iter()
            .map(|relation| {
                let ingress_address = store
                    .data_bag(&relation, Participant::LocalUnit)
                    .get(INGRESS_ADDRESS_KEY)
                    .filter(|v| !v.is_empty())
                    .cloned();
                HttpClient { relation, ingress_address }
            })
            .collect()
    }
}
