//! glk resource: fetch and validate the OCI image descriptor attached as a
//! resource. The descriptor is a small YAML document:
//!
//! ```yaml
//! registrypath: registry.example.com/gitlab/gitlab-ce:latest
//! username: puller
//! password: token
//! ```

#![forbid(unsafe_code)]

use glk_core::{FetchError, ImageDescriptor, ResourceStore};
use metrics::counter;
use serde_yaml::Value as Yaml;
use tracing::{debug, warn};

const REQUIRED_KEYS: [&str; 3] = ["registrypath", "username", "password"];

/// Fetches one named resource and parses it into an [`ImageDescriptor`].
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    resource: String,
}

impl ResourceFetcher {
    pub fn new(resource: impl Into<String>) -> Self { Self { resource: resource.into() } }

    pub fn resource(&self) -> &str { &self.resource }

    /// Store errors are passed through untouched and never retried here.
    pub fn fetch(&self, store: &dyn ResourceStore) -> Result<ImageDescriptor, FetchError> {
        let bytes = store.fetch(&self.resource).map_err(|e| {
            warn!(resource = %self.resource, error = %e, "resource store fetch failed");
            counter!("resource_fetch_err", 1u64);
            FetchError::Store(e)
        })?;
        let out = parse_descriptor(&bytes);
        match &out {
            Ok(img) => debug!(resource = %self.resource, image = %img.registry_path, "image resource fetched"),
            Err(e) => {
                counter!("resource_fetch_err", 1u64);
                warn!(resource = %self.resource, error = %e, "image resource rejected");
            }
        }
        out
    }
}

/// Parse raw resource bytes. Content is included in malformed errors for diagnosis.
/// A key that is null or blank counts as missing.
pub fn parse_descriptor(bytes: &[u8]) -> Result<ImageDescriptor, FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::EmptyResource);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| FetchError::MalformedResource {
        content: String::from_utf8_lossy(bytes).into_owned(),
        reason: e.to_string(),
    })?;
    let doc: Yaml = serde_yaml::from_str(text).map_err(|e| FetchError::MalformedResource {
        content: text.to_string(),
        reason: e.to_string(),
    })?;
    let map = match doc {
        Yaml::Mapping(m) => m,
        other => {
            return Err(FetchError::MalformedResource {
                content: text.to_string(),
                reason: format!("expected a mapping, got {}", kind_of(&other)),
            })
        }
    };

    let mut fields: [String; 3] = Default::default();
    for (slot, key) in fields.iter_mut().zip(REQUIRED_KEYS) {
        let v = map.get(key).filter(|v| !v.is_null()).ok_or(FetchError::IncompleteResource { key })?;
        let s = scalar(v).ok_or_else(|| FetchError::MalformedResource {
            content: text.to_string(),
            reason: format!("{} must be a scalar, got {}", key, kind_of(v)),
        })?;
        if s.trim().is_empty() {
            return Err(FetchError::IncompleteResource { key });
        }
        *slot = s;
    }
    let [registry_path, username, password] = fields;
    Ok(ImageDescriptor { registry_path, username, password })
}

// Passwords made of digits come back as numbers; keep their text.
fn scalar(v: &Yaml) -> Option<String> {
    match v {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind_of(v: &Yaml) -> &'static str {
    match v {
        Yaml::Null => "null",
        Yaml::Bool(_) => "bool",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "sequence",
        Yaml::Mapping(_) => "mapping",
        Yaml::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glk_core::StoreError;

    struct OneShot(Result<Vec<u8>, StoreError>);

    impl ResourceStore for OneShot {
        fn fetch(&self, _name: &str) -> Result<Vec<u8>, StoreError> { self.0.clone() }
    }

    #[test]
    fn parses_complete_descriptor() {
        let img = parse_descriptor(b"registrypath: r.example/gitlab:1\nusername: u\npassword: p\n").unwrap();
        assert_eq!(img.registry_path, "r.example/gitlab:1");
        assert_eq!(img.username, "u");
        assert_eq!(img.password, "p");
    }

    #[test]
    fn numeric_password_keeps_text() {
        let img = parse_descriptor(b"registrypath: r\nusername: u\npassword: 1234\n").unwrap();
        assert_eq!(img.password, "1234");
    }

    #[test]
    fn empty_content() {
        assert_eq!(parse_descriptor(b"").unwrap_err(), FetchError::EmptyResource);
    }

    #[test]
    fn malformed_content_is_quoted_back() {
        match parse_descriptor(b"registrypath: [unclosed").unwrap_err() {
            FetchError::MalformedResource { content, .. } => assert_eq!(content, "registrypath: [unclosed"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse_descriptor(b"just a string").unwrap_err(), FetchError::MalformedResource { .. }));
    }

    #[test]
    fn missing_key_is_incomplete() {
        let err = parse_descriptor(b"registrypath: r\nusername: u\n").unwrap_err();
        assert_eq!(err, FetchError::IncompleteResource { key: "password" });
    }

    #[test]
    fn null_or_blank_key_is_incomplete() {
        let err = parse_descriptor(b"registrypath:\nusername: ''\npassword: ~\n").unwrap_err();
        assert_eq!(err, FetchError::IncompleteResource { key: "registrypath" });
        let err = parse_descriptor(b"registrypath: r\nusername: '  '\npassword: p\n").unwrap_err();
        assert_eq!(err, FetchError::IncompleteResource { key: "username" });
        let err = parse_descriptor(b"registrypath: r\nusername: u\npassword: null\n").unwrap_err();
        assert_eq!(err, FetchError::IncompleteResource { key: "password" });
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let err = parse_descriptor(b"registrypath: r\xff\nusername: u\npassword: p\n").unwrap_err();
        match err {
            FetchError::MalformedResource { content, reason } => {
                assert!(content.starts_with("registrypath: r"));
                assert!(reason.contains("utf-8"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn store_errors_pass_through_verbatim() {
        let store = OneShot(Err(StoreError("gitlab_image not attached".into())));
        let err = ResourceFetcher::new("gitlab_image").fetch(&store).unwrap_err();
        assert_eq!(err, FetchError::Store(StoreError("gitlab_image not attached".into())));
    }

    #[test]
    fn fetch_reads_named_resource() {
        let store = OneShot(Ok(b"registrypath: r\nusername: u\npassword: p\n".to_vec()));
        let img = ResourceFetcher::new("gitlab_image").fetch(&store).unwrap();
        assert_eq!(img.registry_path, "r");
    }
}
