//! PodSpec -> Kubernetes objects.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use glk_core::spec::ContainerSpec;
use glk_core::PodSpec;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, LocalObjectReference, PodSpec as KubePodSpec, PodTemplateSpec, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;

pub const DOCKER_CONFIG_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Objects rendered for one workload, in apply order.
#[derive(Debug, Clone)]
pub struct Manifests {
    pub pull_secret: Secret,
    pub deployment: Deployment,
}

impl Manifests {
    /// Copy with the pull secret's credentials replaced.
    pub fn redacted(&self) -> Manifests {
        let mut out = self.clone();
        out.pull_secret.string_data = out
            .pull_secret
            .string_data
            .map(|m| m.into_keys().map(|k| (k, glk_core::REDACTED.to_string())).collect());
        out
    }

    /// Multi-document YAML of [`Manifests::redacted`].
    pub fn to_yaml_redacted(&self) -> Result<String> {
        let m = self.redacted();
        let docs = [serde_yaml::to_string(&m.pull_secret)?, serde_yaml::to_string(&m.deployment)?];
        Ok(docs.join("---\n"))
    }
}

pub fn pull_secret_name(app: &str) -> String { format!("{}-registry", app) }

pub fn render(spec: &PodSpec, namespace: &str) -> Result<Manifests> {
    let c = spec.container().ok_or_else(|| anyhow!("pod spec has no containers"))?;
    Ok(Manifests { pull_secret: pull_secret(c, namespace), deployment: deployment(c, namespace) })
}

fn labels(app: &str) -> BTreeMap<String, String> {
    let mut l = BTreeMap::new();
    l.insert(NAME_LABEL.to_string(), app.to_string());
    l.insert(MANAGED_BY_LABEL.to_string(), "glk".to_string());
    l
}

fn meta(name: String, app: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(app)),
        ..Default::default()
    }
}

// Registry host is the first path segment when it looks like a host; Docker Hub otherwise.
fn registry_host(image_path: &str) -> &str {
    match image_path.split_once('/') {
        Some((head, _)) if head.contains('.') || head.contains(':') || head == "localhost" => head,
        _ => "docker.io",
    }
}

fn pull_secret(c: &ContainerSpec, namespace: &str) -> Secret {
    let img = &c.image_details;
    let auths = json!({
        "auths": {
            registry_host(&img.image_path): {
                "username": img.username,
                "password": img.password,
            }
        }
    });
    let mut data = BTreeMap::new();
    data.insert(".dockerconfigjson".to_string(), auths.to_string());
    Secret {
        metadata: meta(pull_secret_name(&c.name), &c.name, namespace),
        type_: Some(DOCKER_CONFIG_TYPE.to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

fn deployment(c: &ContainerSpec, namespace: &str) -> Deployment {
    let container = Container {
        name: c.name.clone(),
        image: Some(c.image_details.image_path.clone()),
        ports: Some(
            c.ports
                .iter()
                .map(|p| ContainerPort {
                    container_port: i32::from(p.container_port),
                    protocol: Some(p.protocol.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(
            c.config
                .iter()
                .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() })
                .collect(),
        ),
        ..Default::default()
    };
    let selector = {
        let mut m = BTreeMap::new();
        m.insert(NAME_LABEL.to_string(), c.name.clone());
        m
    };
    Deployment {
        metadata: meta(c.name.clone(), &c.name, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(selector), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels(&c.name)), ..Default::default() }),
                spec: Some(KubePodSpec {
                    containers: vec![container],
                    image_pull_secrets: Some(vec![LocalObjectReference { name: Some(pull_secret_name(&c.name)) }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glk_core::{ConnectionFacts, ImageDescriptor};

    fn spec() -> PodSpec {
        PodSpec::build(
            "gitlab",
            8080,
            &ImageDescriptor {
                registry_path: "registry.example.com/gitlab/gitlab-ce:13.0".into(),
                username: "puller".into(),
                password: "token".into(),
            },
            &ConnectionFacts {
                database: "gitlab".into(),
                host: "10.0.0.9".into(),
                port: 3306,
                username: "gl".into(),
                password: "pw".into(),
            },
        )
    }

    #[test]
    fn deployment_carries_port_env_and_pull_secret() {
        let m = render(&spec(), "apps").unwrap();
        let d = &m.deployment;
        assert_eq!(d.metadata.name.as_deref(), Some("gitlab"));
        assert_eq!(d.metadata.namespace.as_deref(), Some("apps"));
        let ds = d.spec.as_ref().unwrap();
        assert_eq!(ds.replicas, Some(1));
        let pod = ds.template.spec.as_ref().unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("registry.example.com/gitlab/gitlab-ce:13.0"));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 8080);
        let env = c.env.as_ref().unwrap();
        assert_eq!(env[0].name, glk_core::spec::OMNIBUS_CONFIG_KEY);
        assert!(env[0].value.as_deref().unwrap().contains("gitlab_rails['db_host'] = '10.0.0.9'"));
        assert_eq!(pod.image_pull_secrets.as_ref().unwrap()[0].name.as_deref(), Some("gitlab-registry"));
        assert_eq!(
            ds.selector.match_labels.as_ref().unwrap().get(NAME_LABEL).map(String::as_str),
            Some("gitlab")
        );
    }

    #[test]
    fn pull_secret_is_docker_config() {
        let m = render(&spec(), "apps").unwrap();
        let s = &m.pull_secret;
        assert_eq!(s.metadata.name.as_deref(), Some("gitlab-registry"));
        assert_eq!(s.type_.as_deref(), Some(DOCKER_CONFIG_TYPE));
        let raw = s.string_data.as_ref().unwrap().get(".dockerconfigjson").unwrap();
        let v: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(v["auths"]["registry.example.com"]["username"], "puller");
    }

    #[test]
    fn registry_host_defaults_to_docker_hub() {
        assert_eq!(registry_host("gitlab/gitlab-ce:latest"), "docker.io");
        assert_eq!(registry_host("localhost:5000/gitlab"), "localhost:5000");
        assert_eq!(registry_host("gitlab"), "docker.io");
    }

    #[test]
    fn redacted_yaml_hides_credentials() {
        let y = render(&spec(), "apps").unwrap().to_yaml_redacted().unwrap();
        assert!(y.contains("kind: Secret"));
        assert!(y.contains("kind: Deployment"));
        assert!(!y.contains("token"));
    }
}
