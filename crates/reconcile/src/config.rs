use std::collections::BTreeMap;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_DATABASE_ENDPOINT: &str = "mysql";
pub const DEFAULT_WEBSITE_ENDPOINT: &str = "website";
pub const DEFAULT_IMAGE_RESOURCE: &str = "gitlab_image";

const PRECEDENCE_ENV: &str = "GLK_LEADERSHIP_PRECEDENCE";
const DNS_LABEL: &str = r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$";

static DNS_LABEL_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(DNS_LABEL));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid application name {0:?}: must be a DNS-1123 label")]
    InvalidAppName(String),
    #[error("invalid option {key}={value:?}: {reason}")]
    InvalidOption { key: String, value: String, reason: String },
    #[error("application name pattern does not compile: {0}")]
    NamePattern(String),
}

/// Where the leadership check ranks against the resource checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precedence {
    /// Image and database problems outrank "not leader".
    #[default]
    ResourcesFirst,
    /// "Not leader" outranks everything.
    LeadershipFirst,
}

impl FromStr for Precedence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "resources-first" => Ok(Precedence::ResourcesFirst),
            "leadership-first" => Ok(Precedence::LeadershipFirst),
            other => Err(ConfigError::InvalidOption {
                key: PRECEDENCE_ENV.to_string(),
                value: other.to_string(),
                reason: "expected resources-first or leadership-first".to_string(),
            }),
        }
    }
}

/// Reconciler wiring plus the workload options it renders into the spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub app_name: String,
    pub http_port: u16,
    /// Announced instead of each client's ingress address when set.
    pub external_hostname: Option<String>,
    pub database_endpoint: String,
    pub website_endpoint: String,
    pub image_resource: String,
    pub precedence: Precedence,
}

impl ReconcilerConfig {
    pub fn new(app_name: impl Into<String>) -> Result<Self, ConfigError> {
        let app_name = app_name.into();
        validate_app_name(&app_name)?;
        Ok(Self {
            app_name,
            http_port: DEFAULT_HTTP_PORT,
            external_hostname: None,
            database_endpoint: DEFAULT_DATABASE_ENDPOINT.to_string(),
            website_endpoint: DEFAULT_WEBSITE_ENDPOINT.to_string(),
            image_resource: DEFAULT_IMAGE_RESOURCE.to_string(),
            precedence: Precedence::default(),
        })
    }

    /// Apply workload options as the host reports them (`http_port`, `external_hostname`).
    /// Unknown keys are ignored.
    pub fn with_options(mut self, options: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        if let Some(raw) = options.get("http_port") {
            self.http_port = match raw.trim().parse::<u16>() {
                Ok(p) if p != 0 => p,
                _ => {
                    return Err(ConfigError::InvalidOption {
                        key: "http_port".to_string(),
                        value: raw.clone(),
                        reason: "expected a port in 1..=65535".to_string(),
                    })
                }
            };
        }
        if let Some(h) = options.get("external_hostname") {
            let h = h.trim();
            self.external_hostname = if h.is_empty() { None } else { Some(h.to_string()) };
        }
        Ok(self)
    }

    /// `GLK_LEADERSHIP_PRECEDENCE` overrides the arbitration precedence.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var(PRECEDENCE_ENV) {
            self.precedence = v.parse()?;
        }
        Ok(self)
    }
}

fn validate_app_name(name: &str) -> Result<(), ConfigError> {
    let re = DNS_LABEL_RE.as_ref().map_err(|e| ConfigError::NamePattern(e.to_string()))?;
    if re.is_match(name) { Ok(()) } else { Err(ConfigError::InvalidAppName(name.to_string())) }
}
