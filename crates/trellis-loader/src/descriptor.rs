//! Pack descriptor (`trellis.pack.json`) parsing.
//!
//! Descriptors are JSON objects with a handful of polymorphic fields, so
//! parsing walks the JSON value by hand and reports every shape violation as
//! a validation error naming the offending field.

use crate::environment::Environment;
use crate::error::{LoaderError, LoaderResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parsed pack metadata.
#[derive(Debug, Clone)]
pub struct PackDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,

    /// Constraint on the active environment; `None` loads everywhere.
    pub environment: Option<Environment>,

    pub description: Option<String>,
    pub license: Option<String>,
    pub authors: Vec<String>,
    pub credits: Vec<String>,
    pub contact: BTreeMap<String, String>,

    /// Qualified names of entrypoint units declared by the pack.
    pub entrypoints: Vec<String>,

    /// Weave configuration resources, keyed by the pack id that must be
    /// loaded for them to apply. Bare string and array shapes bind to the
    /// host program's own id.
    pub weaves: BTreeMap<String, Vec<String>>,
}

impl PackDescriptor {
    /// Parse a descriptor. `host_id` receives weave bindings declared
    /// without an explicit owner.
    pub fn parse(bytes: &[u8], host_id: &str) -> LoaderResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let object = value
            .as_object()
            .ok_or_else(|| LoaderError::validation("<root>", "descriptor must be an object"))?;

        let environment = match object.get("environment") {
            None => None,
            Some(value) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| LoaderError::validation("environment", "must be a string"))?;
                match s {
                    "both" => None,
                    other => Some(Environment::parse(other).ok_or_else(|| {
                        LoaderError::validation(
                            "environment",
                            format!("invalid environment '{other}', must be 'client', 'server' or 'both'"),
                        )
                    })?),
                }
            }
        };

        Ok(Self {
            id: require_string(object, "id")?,
            name: require_string(object, "name")?,
            version: require_string(object, "version")?,
            environment,
            description: parse_description(object.get("description"))?,
            license: optional_string(object, "license")?,
            authors: optional_string_array(object, "authors")?,
            credits: optional_string_array(object, "credits")?,
            contact: optional_string_map(object, "contact")?,
            entrypoints: optional_string_array(object, "entrypoints")?,
            weaves: parse_weaves(object.get("weaves"), host_id)?,
        })
    }

    /// Whether this pack may load in the given environment.
    pub fn can_load_in(&self, environment: Environment) -> bool {
        self.environment.map_or(true, |e| e == environment)
    }
}

fn require_string(object: &Map<String, Value>, field: &str) -> LoaderResult<String> {
    match object.get(field) {
        None => Err(LoaderError::validation(field, "not specified")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(LoaderError::validation(field, "must be a string")),
    }
}

fn optional_string(object: &Map<String, Value>, field: &str) -> LoaderResult<Option<String>> {
    match object.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(LoaderError::validation(field, "must be a string")),
    }
}

fn optional_string_array(object: &Map<String, Value>, field: &str) -> LoaderResult<Vec<String>> {
    let Some(value) = object.get(field) else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| LoaderError::validation(field, "must be an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| LoaderError::validation(field, "must be an array of strings"))
        })
        .collect()
}

fn optional_string_map(
    object: &Map<String, Value>,
    field: &str,
) -> LoaderResult<BTreeMap<String, String>> {
    let Some(value) = object.get(field) else {
        return Ok(BTreeMap::new());
    };
    let entries = value
        .as_object()
        .ok_or_else(|| LoaderError::validation(field, "must be an object with string values"))?;
    let mut out = BTreeMap::new();
    for (key, value) in entries {
        let value = value
            .as_str()
            .ok_or_else(|| LoaderError::validation(field, "must be an object with string values"))?;
        out.insert(key.clone(), value.to_string());
    }
    Ok(out)
}

fn parse_description(value: Option<&Value>) -> LoaderResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Array(items)) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let part = item.as_str().ok_or_else(|| {
                    LoaderError::validation("description", "must be a string or an array of strings")
                })?;
                parts.push(part);
            }
            Ok(Some(parts.join(" ")))
        }
        Some(_) => Err(LoaderError::validation(
            "description",
            "must be a string or an array of strings",
        )),
    }
}

fn parse_weaves(value: Option<&Value>, host_id: &str) -> LoaderResult<BTreeMap<String, Vec<String>>> {
    let mut weaves: BTreeMap<String, Vec<String>> = BTreeMap::new();
    match value {
        None => {}
        Some(Value::String(s)) => {
            weaves.entry(host_id.to_string()).or_default().push(s.clone());
        }
        Some(Value::Array(items)) => {
            for item in items {
                let config = item.as_str().ok_or_else(|| {
                    LoaderError::validation(
                        "weaves",
                        "must be an object, an array of strings or a string",
                    )
                })?;
                weaves
                    .entry(host_id.to_string())
                    .or_default()
                    .push(config.to_string());
            }
        }
        Some(Value::Object(entries)) => {
            for (owner, value) in entries {
                match value {
                    Value::String(s) => {
                        weaves.entry(owner.clone()).or_default().push(s.clone());
                    }
                    Value::Array(items) => {
                        for item in items {
                            let config = item.as_str().ok_or_else(|| {
                                LoaderError::validation(
                                    "weaves",
                                    "must contain strings or arrays of strings",
                                )
                            })?;
                            weaves.entry(owner.clone()).or_default().push(config.to_string());
                        }
                    }
                    _ => {
                        return Err(LoaderError::validation(
                            "weaves",
                            "must contain strings or arrays of strings",
                        ))
                    }
                }
            }
        }
        Some(_) => {
            return Err(LoaderError::validation(
                "weaves",
                "must be an object, an array of strings or a string",
            ))
        }
    }
    Ok(weaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "host";

    fn parse(json: &str) -> LoaderResult<PackDescriptor> {
        PackDescriptor::parse(json.as_bytes(), HOST)
    }

    #[test]
    fn test_parse_minimal() {
        let descriptor = parse(r#"{"id": "acme", "name": "Acme", "version": "1.0.0"}"#).unwrap();
        assert_eq!(descriptor.id, "acme");
        assert_eq!(descriptor.name, "Acme");
        assert_eq!(descriptor.version, "1.0.0");
        assert!(descriptor.environment.is_none());
        assert!(descriptor.weaves.is_empty());
        assert!(descriptor.can_load_in(Environment::Client));
        assert!(descriptor.can_load_in(Environment::Server));
    }

    #[test]
    fn test_missing_required_field_named() {
        let err = parse(r#"{"id": "acme", "version": "1.0.0"}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_environment_shapes() {
        let client = parse(
            r#"{"id": "a", "name": "A", "version": "1", "environment": "client"}"#,
        )
        .unwrap();
        assert_eq!(client.environment, Some(Environment::Client));
        assert!(client.can_load_in(Environment::Client));
        assert!(!client.can_load_in(Environment::Server));

        let both =
            parse(r#"{"id": "a", "name": "A", "version": "1", "environment": "both"}"#).unwrap();
        assert!(both.environment.is_none());

        let err = parse(r#"{"id": "a", "name": "A", "version": "1", "environment": "moon"}"#)
            .unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "environment"));
    }

    #[test]
    fn test_description_array_joined_with_spaces() {
        let descriptor = parse(
            r#"{"id": "a", "name": "A", "version": "1", "description": ["one", "two", "three"]}"#,
        )
        .unwrap();
        assert_eq!(descriptor.description.as_deref(), Some("one two three"));

        let err = parse(r#"{"id": "a", "name": "A", "version": "1", "description": 7}"#)
            .unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "description"));
    }

    #[test]
    fn test_weaves_bare_string_binds_to_host() {
        let descriptor =
            parse(r#"{"id": "a", "name": "A", "version": "1", "weaves": "acme.weaves.json"}"#)
                .unwrap();
        assert_eq!(descriptor.weaves[HOST], vec!["acme.weaves.json"]);
    }

    #[test]
    fn test_weaves_array_binds_to_host() {
        let descriptor = parse(
            r#"{"id": "a", "name": "A", "version": "1", "weaves": ["one.json", "two.json"]}"#,
        )
        .unwrap();
        assert_eq!(descriptor.weaves[HOST], vec!["one.json", "two.json"]);
    }

    #[test]
    fn test_weaves_object_form_fully_supported() {
        let descriptor = parse(
            r#"{
                "id": "a", "name": "A", "version": "1",
                "weaves": {
                    "other-pack": ["x.json", "y.json"],
                    "host": "z.json"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(descriptor.weaves["other-pack"], vec!["x.json", "y.json"]);
        assert_eq!(descriptor.weaves[HOST], vec!["z.json"]);
    }

    #[test]
    fn test_weaves_bad_shapes_rejected() {
        let err = parse(r#"{"id": "a", "name": "A", "version": "1", "weaves": 4}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "weaves"));

        let err = parse(
            r#"{"id": "a", "name": "A", "version": "1", "weaves": {"owner": {"bad": true}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "weaves"));
    }

    #[test]
    fn test_contact_and_authors() {
        let descriptor = parse(
            r#"{
                "id": "a", "name": "A", "version": "1",
                "authors": ["ada", "grace"],
                "credits": ["everyone"],
                "contact": {"homepage": "https://acme.example", "issues": "https://acme.example/bugs"}
            }"#,
        )
        .unwrap();
        assert_eq!(descriptor.authors, vec!["ada", "grace"]);
        assert_eq!(descriptor.credits, vec!["everyone"]);
        assert_eq!(descriptor.contact["homepage"], "https://acme.example");

        let err = parse(r#"{"id": "a", "name": "A", "version": "1", "authors": [1]}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "authors"));
    }
}
