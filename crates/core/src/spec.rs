//! Declarative pod spec emitted on convergence. Built fresh each time, never read back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConnectionFacts, ImageDescriptor};

/// Environment key carrying the Omnibus configuration.
pub const OMNIBUS_CONFIG_KEY: &str = "GITLAB_OMNIBUS_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image_details: ImageDetails,
    pub ports: Vec<PortSpec>,
    /// Opaque environment; ordered so serialization is byte-stable.
    pub config: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    pub image_path: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ImageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDetails")
            .field("image_path", &self.image_path)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub container_port: u16,
    pub protocol: String,
}

impl PodSpec {
    /// Deterministic: identical inputs give a byte-identical serialization.
    pub fn build(app_name: &str, http_port: u16, image: &ImageDescriptor, db: &ConnectionFacts) -> Self {
        let mut config = BTreeMap::new();
        config.insert(OMNIBUS_CONFIG_KEY.to_string(), omnibus_config(db));
        PodSpec {
            containers: vec![ContainerSpec {
                name: app_name.to_string(),
                image_details: ImageDetails {
                    image_path: image.registry_path.clone(),
                    username: image.username.clone(),
                    password: image.password.clone(),
                },
                ports: vec![PortSpec { container_port: http_port, protocol: "TCP".to_string() }],
                config,
            }],
        }
    }

    pub fn container(&self) -> Option<&ContainerSpec> { self.containers.first() }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> { serde_json::to_vec(self) }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> { serde_yaml::to_string(self) }
}

/// Omnibus settings pointing GitLab at the external MySQL database.
pub fn omnibus_config(db: &ConnectionFacts) -> String {
    [
        "postgresql['enable'] = false".to_string(),
        "gitlab_rails['db_adapter'] = 'mysql2'".to_string(),
        "gitlab_rails['db_encoding'] = 'utf8'".to_string(),
        format!("gitlab_rails['db_database'] = {}", ruby_quote(&db.database)),
        format!("gitlab_rails['db_host'] = {}", ruby_quote(&db.host)),
        format!("gitlab_rails['db_port'] = {}", db.port),
        format!("gitlab_rails['db_username'] = {}", ruby_quote(&db.username)),
        format!("gitlab_rails['db_password'] = {}", ruby_quote(&db.password)),
    ]
    .join("; ")
}

// Single-quoted Ruby literal: only backslash and quote need escaping.
fn ruby_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\\' || c == '\'' { out.push('\\'); }
        out.push(c);
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> ConnectionFacts {
        ConnectionFacts {
            database: "gitlab".into(),
            host: "10.1.2.3".into(),
            port: 3307,
            username: "gl".into(),
            password: "s3cret".into(),
        }
    }

    fn image() -> ImageDescriptor {
        ImageDescriptor {
            registry_path: "registry.example.com/gitlab/gitlab-ce:13.0".into(),
            username: "puller".into(),
            password: "token".into(),
        }
    }

    #[test]
    fn omnibus_blob_format() {
        assert_eq!(
            omnibus_config(&db()),
            "postgresql['enable'] = false; gitlab_rails['db_adapter'] = 'mysql2'; \
             gitlab_rails['db_encoding'] = 'utf8'; gitlab_rails['db_database'] = 'gitlab'; \
             gitlab_rails['db_host'] = '10.1.2.3'; gitlab_rails['db_port'] = 3307; \
             gitlab_rails['db_username'] = 'gl'; gitlab_rails['db_password'] = 's3cret'"
        );
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(ruby_quote(r"it's\x"), r"'it\'s\\x'");
    }

    #[test]
    fn build_is_deterministic() {
        let a = PodSpec::build("gitlab", 80, &image(), &db()).to_json().unwrap();
        let b = PodSpec::build("gitlab", 80, &image(), &db()).to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wire_shape() {
        let spec = PodSpec::build("gitlab", 8080, &image(), &db());
        let v = serde_json::to_value(&spec).unwrap();
        let c = &v["containers"][0];
        assert_eq!(c["name"], "gitlab");
        assert_eq!(c["imageDetails"]["imagePath"], "registry.example.com/gitlab/gitlab-ce:13.0");
        assert_eq!(c["ports"][0]["containerPort"], 8080);
        assert_eq!(c["ports"][0]["protocol"], "TCP");
        assert!(c["config"][OMNIBUS_CONFIG_KEY].as_str().unwrap().contains("db_port'] = 3307"));
        assert!(!format!("{:?}", spec).contains("token"));
    }
}
