//! glk apply: turns a converged [`PodSpec`] into cluster objects and keeps a
//! short history of what was applied.
//!
//! [`KubeApplier`] server-side applies a pull secret and a single-replica
//! Deployment (optionally as a server dry-run). [`PrintApplier`] writes the
//! same manifests to stdout for hosts without a cluster.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use glk_core::{ApplyError, PodSpec, SpecApplier};
use glk_persist::{LastApplied, Store};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

pub mod render;

pub use render::{render, Manifests};

/// Field manager recorded on every server-side apply.
pub const FIELD_MANAGER: &str = "glk";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

pub struct KubeApplier {
    client: Client,
    namespace: String,
    dry_run: bool,
}

impl KubeApplier {
    pub fn new(client: Client, namespace: impl Into<String>, dry_run: bool) -> Self {
        Self { client, namespace: namespace.into(), dry_run }
    }

    fn params(&self) -> PatchParams {
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        if self.dry_run { pp.dry_run() } else { pp }
    }

    async fn apply_manifests(&self, m: &Manifests) -> Result<()> {
        let pp = self.params();

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = m.pull_secret.metadata.name.clone().unwrap_or_default();
        secrets
            .patch(&name, &pp, &Patch::Apply(&m.pull_secret))
            .await
            .with_context(|| format!("server-side apply of secret {}", name))?;

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = m.deployment.metadata.name.clone().unwrap_or_default();
        let obj = deployments
            .patch(&name, &pp, &Patch::Apply(&m.deployment))
            .await
            .with_context(|| format!("server-side apply of deployment {}", name))?;
        debug!(deployment = %name, rv = ?obj.metadata.resource_version, dry_run = self.dry_run, "applied");
        Ok(())
    }
}

#[async_trait]
impl SpecApplier for KubeApplier {
    async fn apply_spec(&self, spec: &PodSpec) -> Result<(), ApplyError> {
        let t0 = std::time::Instant::now();
        counter!("apply_attempts", 1u64);
        let res = match render(spec, &self.namespace) {
            Ok(m) => self.apply_manifests(&m).await,
            Err(e) => Err(e),
        };
        match res {
            Ok(()) => {
                histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                if self.dry_run { counter!("apply_dry_ok", 1u64) } else { counter!("apply_ok", 1u64) }
                Ok(())
            }
            Err(e) => {
                counter!("apply_err", 1u64);
                Err(ApplyError(format!("{:#}", e)))
            }
        }
    }
}

/// Writes manifests to stdout instead of a cluster. Pull-secret credentials are left out.
pub struct PrintApplier {
    namespace: String,
}

impl PrintApplier {
    pub fn new(namespace: impl Into<String>) -> Self { Self { namespace: namespace.into() } }
}

#[async_trait]
impl SpecApplier for PrintApplier {
    async fn apply_spec(&self, spec: &PodSpec) -> Result<(), ApplyError> {
        let yaml = render(spec, &self.namespace)
            .and_then(|m| m.to_yaml_redacted())
            .map_err(|e| ApplyError(format!("{:#}", e)))?;
        println!("---\n{}", yaml);
        counter!("apply_ok", 1u64);
        Ok(())
    }
}

/// Record `spec` as the newest applied spec for `app` and return how it
/// differs from the previous one (`None` for the first entry). Callers pass a
/// spec built from redacted state; history is stored as-is.
pub fn record_applied(store: &dyn Store, app: &str, generation: u64, spec: &PodSpec) -> Result<Option<DiffSummary>> {
    let yaml = spec.to_yaml().context("serializing pod spec")?;
    let target = serde_json::to_value(spec).context("converting pod spec to JSON")?;
    let summary = match store.get_last(app, Some(1))?.first() {
        Some(prev) => {
            let prev_yaml = glk_persist::maybe_decompress(&prev.spec_zstd);
            let prev_val: serde_yaml::Value = serde_yaml::from_str(&prev_yaml).context("parsing previous spec")?;
            let prev_json = serde_json::to_value(prev_val).unwrap_or(Json::Null);
            Some(diff_summary(&target, &prev_json))
        }
        None => None,
    };
    store.put_last(LastApplied {
        app: app.to_string(),
        generation,
        ts: glk_persist::now_ts(),
        spec_zstd: glk_persist::maybe_compress(&yaml),
    })?;
    match summary {
        Some(s) => info!(app, generation, adds = s.adds, updates = s.updates, removes = s.removes, "spec recorded"),
        None => info!(app, generation, "first spec recorded"),
    }
    Ok(summary)
}

/// Count leaf-level differences of `target` relative to `base`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                for (av, bv) in aa.iter().zip(bb) {
                    if av != bv { walk(av, bv, out); }
                }
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv { out.updates += 1; }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}
