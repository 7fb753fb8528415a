//! The Trellis compiled unit format.
//!
//! A compiled unit (`.tcu` file) is the binary form the loader resolves,
//! transforms and defines into an executable unit.
//!
//! ## Format
//!
//! ```text
//! +----------------+
//! | Magic (4 bytes)|  "TCU\x01" (version 1)
//! +----------------+
//! | JSON body      |  name, flags, markers, functions, fields, co_load
//! +----------------+
//! ```
//!
//! Markers carry an ordered key/value payload over [`MarkerValue`], a closed
//! tagged variant, so payload consumers can match exhaustively. Member lists
//! keep declaration order; the scanner relies on it.

use crate::error::{UnitError, UnitResult};
use serde::{Deserialize, Serialize};

/// Magic bytes for compiled unit files.
pub const UNIT_MAGIC: &[u8; 4] = b"TCU\x01";

/// File extension for compiled unit files.
pub const UNIT_EXTENSION: &str = "tcu";

/// Convert a dotted unit name to its file path relative to a source root.
pub fn unit_path(name: &str) -> String {
    format!("{}.{}", name.replace('.', "/"), UNIT_EXTENSION)
}

/// One compiled code unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Version of the unit format.
    #[serde(default = "default_format")]
    pub format: u8,

    /// Qualified dotted name; must match the path the unit was resolved by.
    pub name: String,

    /// Unit-level access flags.
    #[serde(default)]
    pub flags: UnitFlags,

    /// Markers declared on the unit itself.
    #[serde(default)]
    pub markers: Vec<Marker>,

    /// Function members (including constructors), in declaration order.
    #[serde(default)]
    pub functions: Vec<FunctionMember>,

    /// Field members, in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldMember>,

    /// Units force-resolved when this unit is defined.
    #[serde(default)]
    pub co_load: Vec<String>,
}

fn default_format() -> u8 {
    1
}

/// Unit-level access flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    #[serde(default)]
    pub public: bool,
}

/// Member access flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFlags {
    #[serde(default)]
    pub public: bool,

    #[serde(rename = "static", default)]
    pub static_: bool,
}

/// A function member of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionMember {
    pub name: String,

    /// Parameter type names, in declaration order.
    #[serde(default)]
    pub params: Vec<String>,

    /// Return type name, absent for unit-typed functions.
    #[serde(default)]
    pub returns: Option<String>,

    /// Whether this member is a constructor.
    #[serde(default)]
    pub constructor: bool,

    #[serde(default)]
    pub flags: MemberFlags,

    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl FunctionMember {
    /// Compact descriptor, e.g. `(i64,str)->bool`. Zero-parameter functions
    /// start with `()`.
    pub fn descriptor(&self) -> String {
        match &self.returns {
            Some(ret) => format!("({})->{}", self.params.join(","), ret),
            None => format!("({})", self.params.join(",")),
        }
    }
}

/// A field member of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMember {
    pub name: String,

    /// Field type name.
    pub descriptor: String,

    #[serde(default)]
    pub flags: MemberFlags,

    #[serde(default)]
    pub markers: Vec<Marker>,
}

/// Whether a marker survives into the runtime form or exists only at build
/// time. The scanner treats both identically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    Runtime,
    Build,
}

/// A declarative marker attached to a unit or member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    /// Qualified name of the marker type.
    pub marker: String,

    #[serde(default)]
    pub retention: Retention,

    /// Payload entries, preserved in declaration order.
    #[serde(default)]
    pub values: Vec<(String, MarkerValue)>,
}

impl Marker {
    /// Look up a payload entry by key.
    pub fn value(&self, key: &str) -> Option<&MarkerValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// A marker payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MarkerValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Reference to another unit or marker type by qualified name.
    TypeRef(String),
    List(Vec<MarkerValue>),
}

impl MarkerValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MarkerValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MarkerValue]> {
        match self {
            MarkerValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl Unit {
    /// Parse a unit from its binary form.
    pub fn parse(bytes: &[u8]) -> UnitResult<Self> {
        if bytes.len() < UNIT_MAGIC.len() || &bytes[..UNIT_MAGIC.len()] != UNIT_MAGIC {
            return Err(UnitError::BadMagic);
        }

        let unit: Unit = serde_json::from_slice(&bytes[UNIT_MAGIC.len()..])?;
        unit.validate()?;
        Ok(unit)
    }

    /// Serialize the unit back to its binary form.
    pub fn encode(&self) -> UnitResult<Vec<u8>> {
        let mut out = UNIT_MAGIC.to_vec();
        out.extend(serde_json::to_vec(self)?);
        Ok(out)
    }

    /// Validate the unit structure.
    pub fn validate(&self) -> UnitResult<()> {
        if self.format != 1 {
            return Err(UnitError::malformed(
                &self.name,
                format!("unsupported unit format: {}", self.format),
            ));
        }

        if self.name.is_empty() {
            return Err(UnitError::malformed("<unit>", "unit name cannot be empty"));
        }

        for function in &self.functions {
            if function.name.is_empty() {
                return Err(UnitError::malformed(&self.name, "function name cannot be empty"));
            }
        }

        for field in &self.fields {
            if field.name.is_empty() {
                return Err(UnitError::malformed(&self.name, "field name cannot be empty"));
            }
        }

        Ok(())
    }

    /// Look up a function member by name.
    pub fn function(&self, name: &str) -> Option<&FunctionMember> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a field member by name.
    pub fn field(&self, name: &str) -> Option<&FieldMember> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit() -> Unit {
        Unit {
            format: 1,
            name: "acme.widgets.Button".to_string(),
            flags: UnitFlags { public: true },
            markers: vec![Marker {
                marker: "trellis.api.Entrypoint".to_string(),
                retention: Retention::Runtime,
                values: vec![(
                    "requires".to_string(),
                    MarkerValue::List(vec![MarkerValue::Str("acme-base".to_string())]),
                )],
            }],
            functions: vec![FunctionMember {
                name: "register".to_string(),
                params: vec![],
                returns: None,
                constructor: false,
                flags: MemberFlags {
                    public: true,
                    static_: true,
                },
                markers: vec![],
            }],
            fields: vec![FieldMember {
                name: "ID".to_string(),
                descriptor: "str".to_string(),
                flags: MemberFlags {
                    public: true,
                    static_: true,
                },
                markers: vec![],
            }],
            co_load: vec![],
        }
    }

    #[test]
    fn test_unit_round_trip() {
        let unit = sample_unit();
        let bytes = unit.encode().unwrap();
        assert_eq!(&bytes[..4], UNIT_MAGIC);

        let parsed = Unit::parse(&bytes).unwrap();
        assert_eq!(parsed.name, "acme.widgets.Button");
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.markers[0].marker, "trellis.api.Entrypoint");
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let result = Unit::parse(b"nope");
        assert!(matches!(result, Err(UnitError::BadMagic)));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut unit = sample_unit();
        unit.name = String::new();
        assert!(unit.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let mut unit = sample_unit();
        unit.format = 9;
        assert!(unit.validate().is_err());
    }

    #[test]
    fn test_marker_payload_order_preserved() {
        let marker = Marker {
            marker: "acme.Meta".to_string(),
            retention: Retention::Build,
            values: vec![
                ("z".to_string(), MarkerValue::Int(1)),
                ("a".to_string(), MarkerValue::Bool(true)),
            ],
        };
        let keys: Vec<_> = marker.values.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["z", "a"]);
        assert_eq!(marker.value("a"), Some(&MarkerValue::Bool(true)));
    }

    #[test]
    fn test_function_descriptor() {
        let function = FunctionMember {
            name: "resize".to_string(),
            params: vec!["i64".to_string(), "i64".to_string()],
            returns: Some("bool".to_string()),
            constructor: false,
            flags: MemberFlags::default(),
            markers: vec![],
        };
        assert_eq!(function.descriptor(), "(i64,i64)->bool");

        let nullary = FunctionMember {
            name: "init".to_string(),
            params: vec![],
            returns: None,
            constructor: false,
            flags: MemberFlags::default(),
            markers: vec![],
        };
        assert_eq!(nullary.descriptor(), "()");
    }

    #[test]
    fn test_unit_path() {
        assert_eq!(unit_path("acme.widgets.Button"), "acme/widgets/Button.tcu");
    }
}
