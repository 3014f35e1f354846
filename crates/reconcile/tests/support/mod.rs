//! In-memory host used by the reconciler tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glk_core::{
    Announcer, ApplyError, DataBag, Leadership, Participant, PodSpec, RelationHandle, RelationStore, ResourceStore,
    SpecApplier, StoreError,
};
use glk_reconcile::{Dispatcher, DeferredQueue, Host, Reconciler, ReconcilerConfig};

pub const GOOD_IMAGE: &str = "registrypath: registry.example.com/gitlab/gitlab-ce:13.0\nusername: puller\npassword: token\n";
pub const DB_REL: u32 = 1;

#[derive(Default)]
struct Inner {
    rels: Vec<RelationHandle>,
    bags: HashMap<(u32, String), DataBag>,
    resource: Option<Vec<u8>>,
    leader: bool,
    apply_error: Option<String>,
    applied: Vec<PodSpec>,
    announced: Vec<(u32, String, u16)>,
}

pub struct World {
    inner: Mutex<Inner>,
}

fn bag_key(p: Participant<'_>) -> String {
    match p {
        Participant::App(a) => format!("app:{}", a),
        Participant::Unit(u) => format!("unit:{}", u),
        Participant::LocalUnit => "local".to_string(),
    }
}

pub fn facts(database: &str, host: &str, port: &str, username: &str, password: &str) -> Vec<(&'static str, String)> {
    vec![
        ("database", database.to_string()),
        ("host", host.to_string()),
        ("port", port.to_string()),
        ("username", username.to_string()),
        ("password", password.to_string()),
    ]
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(Inner { leader: true, ..Default::default() }) })
    }

    pub fn host(self: &Arc<Self>) -> Host {
        Host {
            relations: self.clone(),
            resources: self.clone(),
            leadership: self.clone(),
            applier: self.clone(),
            announcer: self.clone(),
        }
    }

    pub fn reconciler(self: &Arc<Self>) -> Reconciler {
        Reconciler::new(ReconcilerConfig::new("gitlab").unwrap(), self.host())
    }

    pub fn dispatcher(self: &Arc<Self>, config: ReconcilerConfig) -> Dispatcher {
        Dispatcher::new(Reconciler::new(config, self.host()), DeferredQueue::new())
    }

    pub fn attach_image(&self, yaml: &str) {
        self.inner.lock().unwrap().resource = Some(yaml.as_bytes().to_vec());
    }

    pub fn detach_image(&self) {
        self.inner.lock().unwrap().resource = None;
    }

    pub fn set_leader(&self, leader: bool) {
        self.inner.lock().unwrap().leader = leader;
    }

    pub fn fail_apply(&self, msg: Option<&str>) {
        self.inner.lock().unwrap().apply_error = msg.map(str::to_string);
    }

    pub fn join_database(&self, id: u32, app: &str) {
        let mut g = self.inner.lock().unwrap();
        g.rels.push(RelationHandle {
            id,
            endpoint: "mysql".to_string(),
            app: Some(app.to_string()),
            units: vec![format!("{}/0", app)],
        });
    }

    pub fn set_database_bag(&self, id: u32, app: &str, pairs: Vec<(&'static str, String)>) {
        let bag = pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        self.inner.lock().unwrap().bags.insert((id, format!("app:{}", app)), bag);
    }

    pub fn break_database(&self, id: u32) {
        self.inner.lock().unwrap().rels.retain(|r| r.id != id);
    }

    pub fn join_website(&self, id: u32, ingress: &str) {
        let mut g = self.inner.lock().unwrap();
        g.rels.push(RelationHandle {
            id,
            endpoint: "website".to_string(),
            app: Some("haproxy".to_string()),
            units: vec!["haproxy/0".to_string()],
        });
        let mut bag = DataBag::new();
        bag.insert("ingress-address".to_string(), ingress.to_string());
        g.bags.insert((id, "local".to_string()), bag);
    }

    pub fn applied(&self) -> Vec<PodSpec> {
        self.inner.lock().unwrap().applied.clone()
    }

    pub fn announced(&self) -> Vec<(u32, String, u16)> {
        self.inner.lock().unwrap().announced.clone()
    }
}

impl RelationStore for World {
    fn relations(&self, endpoint: &str) -> Vec<RelationHandle> {
        self.inner.lock().unwrap().rels.iter().filter(|r| r.endpoint == endpoint).cloned().collect()
    }

    fn data_bag(&self, relation: &RelationHandle, participant: Participant<'_>) -> DataBag {
        self.inner.lock().unwrap().bags.get(&(relation.id, bag_key(participant))).cloned().unwrap_or_default()
    }
}

impl ResourceStore for World {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .resource
            .clone()
            .ok_or_else(|| StoreError(format!("resource {} not attached", name)))
    }
}

impl Leadership for World {
    fn is_leader(&self) -> bool {
        self.inner.lock().unwrap().leader
    }
}

#[async_trait::async_trait]
impl SpecApplier for World {
    async fn apply_spec(&self, spec: &PodSpec) -> Result<(), ApplyError> {
        let mut g = self.inner.lock().unwrap();
        if let Some(msg) = g.apply_error.clone() {
            return Err(ApplyError(msg));
        }
        g.applied.push(spec.clone());
        Ok(())
    }
}

impl Announcer for World {
    fn announce(&self, relation: &RelationHandle, host: &str, port: u16) {
        self.inner.lock().unwrap().announced.push((relation.id, host.to_string(), port));
    }
}
