//! glk model: the host side of the reconciler, kept in a YAML file.
//!
//! The model stands in for the orchestration host: it lists relations and
//! their data bags, maps resource names to files, records leadership, and
//! takes the announcements the reconciler publishes to HTTP clients.
//!
//! ```yaml
//! app: gitlab
//! unit: gitlab/0
//! leader: true
//! config:
//!   http_port: 80
//! resources:
//!   gitlab_image: image.yaml
//! relations:
//!   - id: 1
//!     endpoint: mysql
//!     app: mariadb
//!     units: [mariadb/0]
//!     unit_data:
//!       mariadb/0: { database: gitlab, host: 10.0.0.5, user: gitlab, password: secret }
//! ```

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use glk_core::{Announcer, DataBag, Leadership, Participant, RelationHandle, RelationStore, ResourceStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Local bag keys written by [`Announcer::announce`].
pub const HOSTNAME_KEY: &str = "hostname";
pub const PORT_KEY: &str = "port";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDoc {
    pub app: String,
    pub unit: String,
    pub leader: bool,
    /// Workload options; scalars of any YAML type.
    pub config: BTreeMap<String, serde_yaml::Value>,
    /// Resource name -> file, relative to the model file.
    pub resources: BTreeMap<String, PathBuf>,
    pub relations: Vec<RelationDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationDoc {
    pub id: u32,
    pub endpoint: String,
    pub app: Option<String>,
    pub units: Vec<String>,
    #[serde(skip_serializing_if = "DataBag::is_empty")]
    pub app_data: DataBag,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_data: BTreeMap<String, DataBag>,
    /// This unit's own bag (ingress address in, announcements out).
    #[serde(skip_serializing_if = "DataBag::is_empty")]
    pub local: DataBag,
}

impl RelationDoc {
    fn handle(&self) -> RelationHandle {
        RelationHandle { id: self.id, endpoint: self.endpoint.clone(), app: self.app.clone(), units: self.units.clone() }
    }
}

/// File-backed host. Interior mutability so announcements work through `&self`.
pub struct HostModel {
    path: Option<PathBuf>,
    base_dir: PathBuf,
    doc: Mutex<ModelDoc>,
}

impl HostModel {
    pub fn from_doc(doc: ModelDoc, base_dir: impl Into<PathBuf>) -> Self {
        Self { path: None, base_dir: base_dir.into(), doc: Mutex::new(doc) }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading host model {}", path.display()))?;
        let doc: ModelDoc =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing host model {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        debug!(path = %path.display(), relations = doc.relations.len(), "host model loaded");
        Ok(Self { path: Some(path.to_path_buf()), base_dir, doc: Mutex::new(doc) })
    }

    /// Write back to the file it was loaded from; no-op for in-memory models.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let yaml = serde_yaml::to_string(&*self.lock()).context("serializing host model")?;
        std::fs::write(path, yaml).with_context(|| format!("writing host model {}", path.display()))
    }

    pub fn doc(&self) -> ModelDoc { self.lock().clone() }

    pub fn app(&self) -> String { self.lock().app.clone() }

    /// Workload options rendered as strings, the way the host reports them.
    pub fn options(&self) -> BTreeMap<String, String> {
        self.lock()
            .config
            .iter()
            .filter_map(|(k, v)| scalar_string(v).map(|s| (k.clone(), s)))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ModelDoc> {
        // A poisoned model still holds consistent data; each write is a single insert.
        self.doc.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn scalar_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl RelationStore for HostModel {
    fn relations(&self, endpoint: &str) -> Vec<RelationHandle> {
        self.lock().relations.iter().filter(|r| r.endpoint == endpoint).map(RelationDoc::handle).collect()
    }

    fn data_bag(&self, relation: &RelationHandle, participant: Participant<'_>) -> DataBag {
        let doc = self.lock();
        let Some(r) = doc.relations.iter().find(|r| r.id == relation.id) else { return DataBag::new() };
        match participant {
            Participant::App(a) if r.app.as_deref() == Some(a) => r.app_data.clone(),
            Participant::App(_) => DataBag::new(),
            Participant::Unit(u) => r.unit_data.get(u).cloned().unwrap_or_default(),
            Participant::LocalUnit => r.local.clone(),
        }
    }
}

impl ResourceStore for HostModel {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let rel = self.lock().resources.get(name).cloned();
        let rel = rel.ok_or_else(|| StoreError(format!("resource {} is not attached", name)))?;
        let path = if rel.is_absolute() { rel } else { self.base_dir.join(rel) };
        std::fs::read(&path).map_err(|e| StoreError(format!("reading {}: {}", path.display(), e)))
    }
}

impl Leadership for HostModel {
    fn is_leader(&self) -> bool { self.lock().leader }
}

impl Announcer for HostModel {
    fn announce(&self, relation: &RelationHandle, host: &str, port: u16) {
        let mut doc = self.lock();
        match doc.relations.iter_mut().find(|r| r.id == relation.id) {
            Some(r) => {
                r.local.insert(HOSTNAME_KEY.to_string(), host.to_string());
                r.local.insert(PORT_KEY.to_string(), port.to_string());
            }
            None => warn!(relation = relation.id, "announce on unknown relation"),
        }
    }
}
