//! Run configuration resolved from overlapping, untyped sources.
//!
//! A deployment may hand the agent its settings through a request payload,
//! command-line flags or the process environment, and older deployments use
//! different spellings for the same setting (`DbUser`, `db_user`, `dbUser`).
//! [`resolve`] hides both differences: it walks a list of label aliases against
//! an ordered list of [`ConfigSource`]s and returns the first hit.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

/// Default Redshift port.
pub const DEFAULT_PORT: u16 = 5439;

/// Default lookback window for time-windowed diagnostics.
pub const DEFAULT_AGGREGATION_INTERVAL: &str = "1 hour";

pub const REGION_LABELS: &[&str] = &["AWS_REGION"];
pub const DEBUG_LABELS: &[&str] = &["DEBUG", "debug"];
pub const USER_LABELS: &[&str] = &["DbUser", "db_user", "dbUser"];
pub const ENCRYPTED_PASSWORD_LABELS: &[&str] = &[
    "EncryptedPassword",
    "encrypted_password",
    "encrypted_pwd",
    "dbPassword",
];
pub const KEY_ALIAS_LABELS: &[&str] = &["cmkAlias", "cmk_alias"];
pub const ENCRYPTION_CONTEXT_LABELS: &[&str] = &["kms_auth_context"];
pub const HOST_LABELS: &[&str] = &["HostName", "cluster_endpoint", "dbHost", "db_host"];
pub const PORT_LABELS: &[&str] = &["HostPort", "db_port", "dbPort"];
pub const DATABASE_LABELS: &[&str] = &["DatabaseName", "db_name", "db"];
pub const CLUSTER_LABELS: &[&str] = &["ClusterName", "cluster_name", "clusterName"];
pub const INTERVAL_LABELS: &[&str] = &["AggregationInterval", "agg_interval", "aggregtionInterval"];

/// Error type for configuration resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// None of the aliases of a required setting is present in any source.
    Missing(String),
    /// A setting is present but cannot be interpreted.
    Invalid { label: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(label) => {
                write!(f, "configuration: required value {} not set", label)
            }
            ConfigError::Invalid { label, reason } => {
                write!(f, "configuration: invalid value for {}: {}", label, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// One named key→value mapping consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    name: String,
    values: BTreeMap<String, Value>,
}

impl ConfigSource {
    /// Creates an empty source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builds a source from string pairs, e.g. environment variables.
    pub fn from_vars<I, K, V>(name: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = vars
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self {
            name: name.into(),
            values,
        }
    }

    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self::from_vars("environment", std::env::vars())
    }

    /// Builds a source from a JSON object; any other JSON value is rejected.
    pub fn from_json(name: impl Into<String>, value: Value) -> Result<Self, ConfigError> {
        let name = name.into();
        match value {
            Value::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
                name,
            }),
            other => Err(ConfigError::Invalid {
                label: name,
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    /// Adds or replaces a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`ConfigSource::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Returns the value of the first label, in label order, found in any source,
/// scanning sources in order for each label.
pub fn resolve<'a>(labels: &[&str], sources: &'a [ConfigSource]) -> Option<&'a Value> {
    for label in labels {
        for source in sources {
            if let Some(value) = source.get(label) {
                debug!(label, source = source.name(), "resolved configuration value");
                return Some(value);
            }
        }
    }
    None
}

/// Resolves a string-valued setting. Numbers and booleans are rendered as text.
fn resolve_string(labels: &[&str], sources: &[ConfigSource]) -> Option<String> {
    resolve(labels, sources).and_then(|value| match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn require_string(labels: &[&str], sources: &[ConfigSource]) -> Result<String, ConfigError> {
    match resolve_string(labels, sources) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ConfigError::Missing(labels[0].to_string())),
    }
}

/// Interprets a boolean-like setting: JSON booleans, or the string `TRUE` in
/// any case. Everything else is false.
pub fn parse_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Whether the debug flag is set in any source. Usable before full resolution,
/// e.g. to pick a log level.
pub fn debug_enabled(sources: &[ConfigSource]) -> bool {
    resolve(DEBUG_LABELS, sources).is_some_and(parse_flag)
}

fn parse_port(value: &Value) -> Result<u16, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        label: PORT_LABELS[0].to_string(),
        reason,
    };
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| invalid(format!("{} is not a valid port", n))),
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| invalid(format!("'{}': {}", s, e))),
        other => Err(invalid(format!("unexpected {}", json_kind(other)))),
    }
}

/// Parses an encryption context given either as a JSON object or as a string
/// holding a JSON object. Non-string values are rendered as JSON text.
fn parse_encryption_context(value: &Value) -> Result<EncryptionContext, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        label: ENCRYPTION_CONTEXT_LABELS[0].to_string(),
        reason,
    };
    let parsed;
    let object = match value {
        Value::Object(map) => map,
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s).map_err(|e| invalid(e.to_string()))?;
            match &parsed {
                Value::Object(map) => map,
                other => return Err(invalid(format!("expected an object, got {}", json_kind(other)))),
            }
        }
        other => return Err(invalid(format!("expected an object, got {}", json_kind(other)))),
    };

    Ok(object
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Key/value scope passed to the secret manager along with the ciphertext.
pub type EncryptionContext = BTreeMap<String, String>;

/// Inputs for the encrypted-secret credential source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialHint {
    /// Base64 ciphertext of the database password.
    pub encrypted_password: Option<String>,
    /// Alias of the key the password was encrypted with.
    pub key_alias: Option<String>,
    /// Explicit encryption context; takes precedence over one derived from the alias.
    pub encryption_context: Option<EncryptionContext>,
}

/// Resolved, immutable configuration for one collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub region: String,
    /// Value of the `ClusterIdentifier` dimension on every metric.
    pub cluster_name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Lookback window, e.g. `"1 hour"`.
    pub interval: String,
    pub debug: bool,
    pub credentials: CredentialHint,
}

impl ClusterConfig {
    /// Resolves the full configuration from `sources`, in priority order.
    pub fn resolve(sources: &[ConfigSource]) -> Result<Self, ConfigError> {
        let region = require_string(REGION_LABELS, sources)?;
        let user = require_string(USER_LABELS, sources)?;
        let host = require_string(HOST_LABELS, sources)?;
        let database = require_string(DATABASE_LABELS, sources)?;
        let cluster_name = require_string(CLUSTER_LABELS, sources)?;

        let port = match resolve(PORT_LABELS, sources) {
            None | Some(Value::Null) => DEFAULT_PORT,
            Some(value) => parse_port(value)?,
        };

        let interval = resolve_string(INTERVAL_LABELS, sources)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AGGREGATION_INTERVAL.to_string());

        let encryption_context = match resolve(ENCRYPTION_CONTEXT_LABELS, sources) {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_encryption_context(value)?),
        };

        Ok(Self {
            region,
            cluster_name,
            host,
            port,
            database,
            user,
            interval,
            debug: debug_enabled(sources),
            credentials: CredentialHint {
                encrypted_password: resolve_string(ENCRYPTED_PASSWORD_LABELS, sources),
                key_alias: resolve_string(KEY_ALIAS_LABELS, sources),
                encryption_context,
            },
        })
    }
}

#[cfg(test)]
impl ClusterConfig {
    /// Minimal configuration used across module tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            region: "us-east-1".to_string(),
            cluster_name: "analytics".to_string(),
            host: "cluster.example.com".to_string(),
            port: DEFAULT_PORT,
            database: "dev".to_string(),
            user: "monitor".to_string(),
            interval: DEFAULT_AGGREGATION_INTERVAL.to_string(),
            debug: true,
            credentials: CredentialHint::default(),
        }
    }
}
