//! Environment Classes Parser
//!
//! Two read-only views over one [`ClassesPayload`]: the flat class list
//! (files that failed to parse are dropped) and the per-file list that keeps
//! parse errors for diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::types::{ClassEntry, ClassesPayload, FileOutcome, FileResult, ParamSpec, PuppetClass};

/// A lone unbraced variable reference such as `$::dns::params::dnsdir`
static VARIABLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$((?:::)?[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*)$")
        .expect("variable reference pattern is valid")
});

/// Rewrite `$name` as `${name}`; any other source text comes back unchanged.
pub fn normalize_default_source(source: &str) -> Cow<'_, str> {
    match VARIABLE_REFERENCE.captures(source) {
        Some(captures) => Cow::Owned(format!("${{{}}}", &captures[1])),
        None => Cow::Borrowed(source),
    }
}

/// Resolve the default value of a parameter.
///
/// The evaluated literal wins when Puppet sent one. Otherwise the source
/// expression is used, normalized. A parameter without any default resolves
/// to `null`.
pub fn resolve_default(param: &ParamSpec) -> Value {
    if let Some(literal) = &param.default_literal {
        return literal.clone();
    }

    match &param.default_source {
        Some(source) => Value::String(normalize_default_source(source).into_owned()),
        None => Value::Null,
    }
}

fn to_puppet_class(entry: &ClassEntry) -> PuppetClass {
    let params: BTreeMap<String, Value> = entry
        .params
        .iter()
        .map(|param| (param.name.clone(), resolve_default(param)))
        .collect();

    PuppetClass::new(entry.name.clone(), params)
}

/// Flat list of classes from every file that parsed cleanly
pub fn classes_in_environment(payload: &ClassesPayload) -> Vec<PuppetClass> {
    payload
        .files
        .iter()
        .filter_map(FileResult::classes)
        .flatten()
        .map(to_puppet_class)
        .collect()
}

/// Every file with its classes or parse error
///
/// Unbraced variable references in `default_source` are normalized the same
/// way the flat view resolves them; everything else is passed through.
pub fn classes_and_errors_in_environment(payload: &ClassesPayload) -> Vec<FileResult> {
    payload
        .files
        .iter()
        .map(|file| match &file.outcome {
            FileOutcome::Error { .. } => file.clone(),
            FileOutcome::Classes { classes } => FileResult {
                path: file.path.clone(),
                outcome: FileOutcome::Classes {
                    classes: classes.iter().map(normalize_class_entry).collect(),
                },
            },
        })
        .collect()
}

fn normalize_class_entry(entry: &ClassEntry) -> ClassEntry {
    let params = entry
        .params
        .iter()
        .map(|param| {
            let mut param = param.clone();
            if let Some(source) = &param.default_source {
                if let Cow::Owned(normalized) = normalize_default_source(source) {
                    param.default_source = Some(normalized);
                }
            }
            param
        })
        .collect();

    ClassEntry {
        name: entry.name.clone(),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> ClassesPayload {
        serde_json::from_value(value).unwrap()
    }

    fn with_errors() -> ClassesPayload {
        payload(json!({
            "files": [
                {"classes": [{"name": "dns::config", "params": []}], "path": "/manifests/config.pp"},
                {"classes": [{"name": "dns::install", "params": []}], "path": "/manifests/install.pp"},
                {"error": "Syntax error at '=>' at /manifests/witherror.pp:20:19", "path": "/manifests/witherror.pp"}
            ],
            "name": "test_environment"
        }))
    }

    #[test]
    fn test_normalize_default_source() {
        assert_eq!(
            normalize_default_source("$::dns::params::namedconf_path"),
            "${::dns::params::namedconf_path}"
        );
        assert_eq!(normalize_default_source("$dnsdir"), "${dnsdir}");
        assert_eq!(normalize_default_source("${dnsdir}"), "${dnsdir}");
        assert_eq!(normalize_default_source("\"${dir}/named.conf\""), "\"${dir}/named.conf\"");
        assert_eq!(normalize_default_source("$a + $b"), "$a + $b");
        assert_eq!(normalize_default_source("literal default"), "literal default");
        assert!(matches!(normalize_default_source("'x'"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_flat_view_skips_files_with_errors() {
        let classes = classes_in_environment(&with_errors());

        assert_eq!(
            classes,
            vec![
                PuppetClass::new("dns::config", BTreeMap::new()),
                PuppetClass::new("dns::install", BTreeMap::new()),
            ]
        );
    }

    #[test]
    fn test_structured_view_keeps_errors() {
        let files = classes_and_errors_in_environment(&with_errors());

        assert_eq!(
            serde_json::to_value(&files).unwrap(),
            json!([
                {"classes": [{"name": "dns::config", "params": []}], "path": "/manifests/config.pp"},
                {"classes": [{"name": "dns::install", "params": []}], "path": "/manifests/install.pp"},
                {"error": "Syntax error at '=>' at /manifests/witherror.pp:20:19", "path": "/manifests/witherror.pp"}
            ])
        );
    }

    #[test]
    fn test_single_module_class_with_error_file() {
        let payload = payload(json!({"files": [
            {"path": "a.pp", "classes": [{"name": "dns::install", "params": []}]},
            {"path": "b.pp", "error": "syntax error"}
        ]}));

        let classes = classes_in_environment(&payload);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].module.as_deref(), Some("dns"));
        assert_eq!(classes[0].short_name, "install");
        assert!(classes[0].params.is_empty());

        assert_eq!(classes_and_errors_in_environment(&payload), payload.files);
    }

    #[test]
    fn test_variable_expression_defaults() {
        let payload = payload(json!({
            "files": [{"classes": [{"name": "dns", "params": [
                {"default_source": "$::dns::params::namedconf_path", "name": "namedconf_path"},
                {"default_source": "$::dns::params::dnsdir", "name": "dnsdir"}
            ]}], "path": "/manifests/init.pp"}],
            "name": "test_environment"
        }));

        let mut expected = BTreeMap::new();
        expected.insert("namedconf_path".to_string(), json!("${::dns::params::namedconf_path}"));
        expected.insert("dnsdir".to_string(), json!("${::dns::params::dnsdir}"));
        assert_eq!(classes_in_environment(&payload), vec![PuppetClass::new("dns", expected)]);

        assert_eq!(
            serde_json::to_value(classes_and_errors_in_environment(&payload)).unwrap(),
            json!([{"classes": [{"name": "dns", "params": [
                {"default_source": "${::dns::params::namedconf_path}", "name": "namedconf_path"},
                {"default_source": "${::dns::params::dnsdir}", "name": "dnsdir"}
            ]}], "path": "/manifests/init.pp"}])
        );
    }

    #[test]
    fn test_literal_defaults_win_over_source() {
        let raw = json!({
            "files": [{"classes": [{"name": "testing", "params": [
                {"default_literal": "literal default", "default_source": "literal default",
                 "name": "string_with_literal_default", "type": "String"},
                {"default_literal": {"one": "foo", "two": "hello"},
                 "default_source": "{'one' => 'foo', 'two' => 'hello'}",
                 "name": "a_hash", "type": "Hash"}
            ]}], "path": "init.pp"}],
            "name": "test_environment"
        });
        let payload = payload(raw.clone());

        let classes = classes_in_environment(&payload);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].params["string_with_literal_default"], json!("literal default"));
        assert_eq!(classes[0].params["a_hash"], json!({"one": "foo", "two": "hello"}));

        assert_eq!(
            serde_json::to_value(classes_and_errors_in_environment(&payload)).unwrap(),
            raw["files"]
        );
    }

    #[test]
    fn test_resolve_default_edge_cases() {
        assert_eq!(resolve_default(&ParamSpec::new("required")), Value::Null);
        assert_eq!(
            resolve_default(&ParamSpec::new("optional").literal(Value::Null).source("undef")),
            Value::Null
        );
        assert_eq!(
            resolve_default(&ParamSpec::new("list").literal(json!([1, 2])).source("[1, 2]")),
            json!([1, 2])
        );
        assert_eq!(
            resolve_default(&ParamSpec::new("enabled").source("$::osfamily == 'Debian'")),
            json!("$::osfamily == 'Debian'")
        );
    }

    #[test]
    fn test_repeated_parameter_name_last_wins() {
        let entry = ClassEntry {
            name: "dup".to_string(),
            params: vec![
                ParamSpec::new("port").literal(json!(53)),
                ParamSpec::new("port").literal(json!(5353)),
            ],
        };

        assert_eq!(to_puppet_class(&entry).params["port"], json!(5353));
    }

    #[test]
    fn test_views_agree_on_class_set() {
        let payload = payload(json!({"files": [
            {"path": "init.pp", "classes": [{"name": "dns", "params": [
                {"name": "dnsdir", "default_source": "$::dns::params::dnsdir"}
            ]}]},
            {"path": "broken.pp", "error": "Could not parse"},
            {"path": "server.pp", "classes": [{"name": "dns::server::config", "params": [
                {"name": "port", "default_literal": 53, "default_source": "53"}
            ]}]}
        ]}));

        let reparsed = ClassesPayload {
            name: None,
            files: classes_and_errors_in_environment(&payload),
        };

        assert_eq!(classes_in_environment(&reparsed), classes_in_environment(&payload));
    }

    #[test]
    fn test_file_without_classes_or_error_yields_nothing() {
        let payload = payload(json!({"files": [{"path": "empty.pp"}]}));

        assert!(classes_in_environment(&payload).is_empty());
        assert_eq!(payload.files[0].classes(), Some(&[][..]));
    }
}
