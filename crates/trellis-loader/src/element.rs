//! Marked elements extracted from compiled units.

use trellis_unit::{FieldMember, FunctionMember, Marker, MarkerValue, MemberFlags, Unit};

/// What kind of element carries the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Type,
    Function,
    Constructor,
    Field,
}

/// One marker occurrence on a unit or member. Immutable after scanning.
#[derive(Debug)]
pub struct AnnotatedElement {
    pack: String,
    unit_path: String,
    kind: ElementKind,
    container: String,
    member_name: Option<String>,
    member_descriptor: Option<String>,
    member_flags: Option<MemberFlags>,
    marker: String,
    values: Vec<(String, MarkerValue)>,
}

impl AnnotatedElement {
    pub fn for_type(pack: &str, unit_path: &str, unit: &Unit, marker: &Marker) -> Self {
        Self {
            pack: pack.to_string(),
            unit_path: unit_path.to_string(),
            kind: ElementKind::Type,
            container: unit.name.clone(),
            member_name: None,
            member_descriptor: None,
            member_flags: None,
            marker: marker.marker.clone(),
            values: marker.values.clone(),
        }
    }

    pub fn for_function(
        pack: &str,
        unit_path: &str,
        unit: &Unit,
        function: &FunctionMember,
        marker: &Marker,
    ) -> Self {
        Self {
            pack: pack.to_string(),
            unit_path: unit_path.to_string(),
            kind: if function.constructor {
                ElementKind::Constructor
            } else {
                ElementKind::Function
            },
            container: unit.name.clone(),
            member_name: Some(function.name.clone()),
            member_descriptor: Some(function.descriptor()),
            member_flags: Some(function.flags),
            marker: marker.marker.clone(),
            values: marker.values.clone(),
        }
    }

    pub fn for_field(
        pack: &str,
        unit_path: &str,
        unit: &Unit,
        field: &FieldMember,
        marker: &Marker,
    ) -> Self {
        Self {
            pack: pack.to_string(),
            unit_path: unit_path.to_string(),
            kind: ElementKind::Field,
            container: unit.name.clone(),
            member_name: Some(field.name.clone()),
            member_descriptor: Some(field.descriptor.clone()),
            member_flags: Some(field.flags),
            marker: marker.marker.clone(),
            values: marker.values.clone(),
        }
    }

    /// Id of the pack that owns the declaring unit.
    pub fn pack(&self) -> &str {
        &self.pack
    }

    /// Path of the declaring unit file, relative to the pack root.
    pub fn unit_path(&self) -> &str {
        &self.unit_path
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Qualified name of the declaring unit.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Member name; `None` for type-kind elements.
    pub fn member_name(&self) -> Option<&str> {
        self.member_name.as_deref()
    }

    /// Member descriptor; `None` for type-kind elements.
    pub fn member_descriptor(&self) -> Option<&str> {
        self.member_descriptor.as_deref()
    }

    /// Member flags; `None` for type-kind elements.
    pub fn member_flags(&self) -> Option<MemberFlags> {
        self.member_flags
    }

    /// Qualified name of the marker type.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The full marker payload, in declaration order.
    pub fn values(&self) -> &[(String, MarkerValue)] {
        &self.values
    }

    /// Look up one payload entry by key.
    pub fn value(&self, key: &str) -> Option<&MarkerValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_unit::{Retention, UnitFlags};

    fn sample_unit() -> Unit {
        Unit {
            format: 1,
            name: "acme.Widget".to_string(),
            flags: UnitFlags::default(),
            markers: vec![],
            functions: vec![FunctionMember {
                name: "new".to_string(),
                params: vec!["str".to_string()],
                returns: None,
                constructor: true,
                flags: MemberFlags {
                    public: true,
                    static_: false,
                },
                markers: vec![],
            }],
            fields: vec![],
            co_load: vec![],
        }
    }

    fn sample_marker() -> Marker {
        Marker {
            marker: "acme.Register".to_string(),
            retention: Retention::Runtime,
            values: vec![("group".to_string(), MarkerValue::Str("widgets".to_string()))],
        }
    }

    #[test]
    fn test_type_element_has_no_member() {
        let unit = sample_unit();
        let element = AnnotatedElement::for_type("acme", "acme/Widget.tcu", &unit, &sample_marker());
        assert_eq!(element.kind(), ElementKind::Type);
        assert_eq!(element.container(), "acme.Widget");
        assert!(element.member_name().is_none());
        assert!(element.member_descriptor().is_none());
        assert!(element.member_flags().is_none());
        assert_eq!(
            element.value("group"),
            Some(&MarkerValue::Str("widgets".to_string()))
        );
    }

    #[test]
    fn test_constructor_member_kind() {
        let unit = sample_unit();
        let element = AnnotatedElement::for_function(
            "acme",
            "acme/Widget.tcu",
            &unit,
            &unit.functions[0],
            &sample_marker(),
        );
        assert_eq!(element.kind(), ElementKind::Constructor);
        assert_eq!(element.member_name(), Some("new"));
        assert_eq!(element.member_descriptor(), Some("(str)"));
    }
}
