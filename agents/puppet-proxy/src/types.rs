//! Puppet Environment and Class Types
//!
//! Wire types for the Puppet v3 `environment_classes` payload, the derived
//! class entity handed to callers, and the error taxonomy shared by every
//! retrieval path.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// A Puppet environment and its module search paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub paths: Vec<String>,
}

impl Environment {
    pub fn new(name: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            name: name.into(),
            paths,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Body of an `environment_classes` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassesPayload {
    /// Environment name echoed back by Puppet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One entry per manifest file Puppet parsed
    #[serde(default)]
    pub files: Vec<FileResult>,
}

/// Parse outcome of a single manifest file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// A file either failed to parse or yielded classes, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileOutcome {
    Error {
        error: String,
    },
    Classes {
        #[serde(default)]
        classes: Vec<ClassEntry>,
    },
}

impl FileResult {
    pub fn with_classes(path: impl Into<String>, classes: Vec<ClassEntry>) -> Self {
        Self {
            path: path.into(),
            outcome: FileOutcome::Classes { classes },
        }
    }

    pub fn with_error(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            outcome: FileOutcome::Error {
                error: error.into(),
            },
        }
    }

    /// Classes declared in this file, `None` when Puppet reported a parse error
    pub fn classes(&self) -> Option<&[ClassEntry]> {
        match &self.outcome {
            FileOutcome::Classes { classes } => Some(classes),
            FileOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FileOutcome::Error { error } => Some(error),
            FileOutcome::Classes { .. } => None,
        }
    }
}

/// A class as declared in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

/// A class parameter with its default in literal and/or source form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Evaluated default; an explicit JSON `null` is kept as `Some(Value::Null)`
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_literal: Option<Value>,
    /// Default expression exactly as written in the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_source: Option<String>,
    /// Keys such as `type` that are passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_literal: None,
            default_source: None,
            extra: Map::new(),
        }
    }

    pub fn literal(mut self, value: Value) -> Self {
        self.default_literal = Some(value);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.default_source = Some(source.into());
        self
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A Puppet class resolved for callers
///
/// `module` holds every segment before the last `::`, `short_name` the final
/// one. Parameters map to their resolved default values.
#[derive(Debug, Clone, PartialEq)]
pub struct PuppetClass {
    pub qualified_name: String,
    pub module: Option<String>,
    pub short_name: String,
    pub params: BTreeMap<String, Value>,
}

impl PuppetClass {
    pub fn new(qualified_name: impl Into<String>, params: BTreeMap<String, Value>) -> Self {
        let qualified_name = qualified_name.into();
        let (module, short_name) = match qualified_name.rsplit_once("::") {
            Some((module, short_name)) => (Some(module.to_string()), short_name.to_string()),
            None => (None, qualified_name.clone()),
        };

        Self {
            qualified_name,
            module,
            short_name,
            params,
        }
    }
}

#[derive(Serialize)]
struct PuppetClassBody<'a> {
    name: &'a str,
    module: Option<&'a str>,
    params: &'a BTreeMap<String, Value>,
}

/// Serializes as `{"<qualified_name>": {"name", "module", "params"}}`
impl Serialize for PuppetClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &self.qualified_name,
            &PuppetClassBody {
                name: &self.short_name,
                module: self.module.as_deref(),
                params: &self.params,
            },
        )?;
        map.end()
    }
}

/// Errors surfaced by class and environment retrieval
///
/// `Clone` so that a single failed fetch can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassesError {
    /// Puppet does not know the environment
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Transport or protocol failure talking to Puppet
    #[error("Puppet API unavailable: {0}")]
    RemoteUnavailable(String),

    /// The caller stopped waiting; the fetch keeps running
    #[error("Timed out after {waited:?} waiting for classes of environment '{environment}'")]
    FetchTimeout {
        environment: String,
        waited: Duration,
    },

    /// Puppet answered "not modified" for an environment with nothing cached
    #[error("Puppet reported classes of environment '{0}' unchanged, but none are cached")]
    CacheInconsistency(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_puppet_class_splits_on_last_separator() {
        let class = PuppetClass::new("dns::params::install", BTreeMap::new());
        assert_eq!(class.module.as_deref(), Some("dns::params"));
        assert_eq!(class.short_name, "install");

        let bare = PuppetClass::new("dns", BTreeMap::new());
        assert_eq!(bare.module, None);
        assert_eq!(bare.short_name, "dns");
    }

    #[test]
    fn test_puppet_class_serialization() {
        let mut params = BTreeMap::new();
        params.insert("dnsdir".to_string(), json!("${::dns::params::dnsdir}"));
        let class = PuppetClass::new("dns", params);

        assert_eq!(
            serde_json::to_value(&class).unwrap(),
            json!({"dns": {"name": "dns", "module": null, "params": {"dnsdir": "${::dns::params::dnsdir}"}}})
        );
    }

    #[test]
    fn test_file_result_deserializes_both_shapes() {
        let files: Vec<FileResult> = serde_json::from_value(json!([
            {"path": "a.pp", "classes": [{"name": "dns::install", "params": []}]},
            {"path": "b.pp", "error": "syntax error"}
        ]))
        .unwrap();

        assert_eq!(files[0].classes().map(|c| c.len()), Some(1));
        assert_eq!(files[1].error(), Some("syntax error"));
        assert!(files[1].classes().is_none());
    }

    #[test]
    fn test_param_spec_keeps_null_literal_and_extra_keys() {
        let param: ParamSpec = serde_json::from_value(json!({
            "name": "package", "default_literal": null, "type": "Optional[String]"
        }))
        .unwrap();

        assert_eq!(param.default_literal, Some(Value::Null));
        assert_eq!(param.extra.get("type"), Some(&json!("Optional[String]")));
        assert_eq!(
            serde_json::to_value(&param).unwrap(),
            json!({"name": "package", "default_literal": null, "type": "Optional[String]"})
        );
    }

    #[test]
    fn test_environment_display() {
        let env = Environment::new("production", vec!["/etc/puppetlabs/code/modules".to_string()]);
        assert_eq!(env.to_string(), "production");
    }
}
