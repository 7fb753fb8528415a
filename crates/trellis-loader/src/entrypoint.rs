//! Gated entrypoints.
//!
//! A unit or function marked `trellis.api.Entrypoint` becomes eligible for
//! invocation once its preconditions hold: every pack id in its `requires`
//! payload is loaded and its derived environment (if any) matches the active
//! one. The actual invocation is handed to an [`EntrypointHandler`], so the
//! loader never interprets host code itself.

use crate::element::{AnnotatedElement, ElementKind};
use crate::environment::Environment;
use crate::error::{LoaderError, LoaderResult};
use crate::loader::Loader;
use crate::pack::{Pack, ScanHook};
use crate::resolver::DefinedUnit;
use std::sync::Arc;
use tracing::info;
use trellis_unit::MarkerValue;

/// Marker type declaring an entrypoint.
pub const ENTRYPOINT_MARKER: &str = "trellis.api.Entrypoint";

/// One entrypoint derived from a scanned element.
pub struct EntrypointContainer {
    requires: Vec<String>,
    environment: Option<Environment>,
    element: Arc<AnnotatedElement>,
}

impl EntrypointContainer {
    /// Derive an entrypoint from an element, if its marker is the entrypoint
    /// marker. An `env` payload naming both environments leaves the
    /// entrypoint unconstrained; naming neither yields no entrypoint at all.
    pub fn try_from_element(element: &Arc<AnnotatedElement>) -> Option<Self> {
        if element.marker() != ENTRYPOINT_MARKER {
            return None;
        }

        let mut requires = Vec::new();
        if let Some(MarkerValue::List(items)) = element.value("requires") {
            for item in items {
                if let MarkerValue::Str(pack) = item {
                    requires.push(pack.clone());
                }
            }
        }

        let (mut client, mut server) = (false, false);
        match element.value("env") {
            None => {
                client = true;
                server = true;
            }
            Some(MarkerValue::List(items)) => {
                for item in items {
                    match item.as_str().and_then(Environment::parse) {
                        Some(Environment::Client) => client = true,
                        Some(Environment::Server) => server = true,
                        None => {}
                    }
                }
            }
            Some(_) => {}
        }

        let environment = match (client, server) {
            (true, true) => None,
            (true, false) => Some(Environment::Client),
            (false, true) => Some(Environment::Server),
            // An entrypoint asked to load in neither environment is ignored.
            (false, false) => return None,
        };

        Some(Self {
            requires,
            environment,
            element: Arc::clone(element),
        })
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn environment(&self) -> Option<Environment> {
        self.environment
    }

    pub fn element(&self) -> &Arc<AnnotatedElement> {
        &self.element
    }

    /// Whether this entrypoint may be invoked right now: the element must be
    /// type- or function-kind, every required pack must be loaded, and the
    /// derived environment must match the active one.
    pub fn is_safe_to_load(&self, loader: &Loader) -> bool {
        if !matches!(
            self.element.kind(),
            ElementKind::Type | ElementKind::Function
        ) {
            return false;
        }

        for pack in &self.requires {
            if !loader.is_pack_loaded(pack) {
                return false;
            }
        }

        match self.environment {
            None => true,
            Some(environment) => environment == loader.environment(),
        }
    }

    /// Invoke the entrypoint. Function-kind entrypoints must be zero-arg,
    /// static and public; violating that contract is a usage error, distinct
    /// from being currently unsafe to load. Type-kind entrypoints force the
    /// declaring unit's definition; a unit stripped away by an earlier
    /// transformation is skipped silently.
    pub fn invoke(&self, loader: &Loader) -> LoaderResult<()> {
        match self.element.kind() {
            ElementKind::Function => self.invoke_function(loader),
            ElementKind::Type => self.force_definition(loader),
            _ => Err(LoaderError::usage(
                "only type and function entrypoints can be invoked",
            )),
        }
    }

    fn invoke_function(&self, loader: &Loader) -> LoaderResult<()> {
        let name = self
            .element
            .member_name()
            .ok_or_else(|| LoaderError::usage("entrypoint element has no member name"))?;

        let descriptor = self.element.member_descriptor().unwrap_or("()");
        if !descriptor.starts_with("()") {
            return Err(LoaderError::usage(format!(
                "cannot call entrypoint '{name}': it takes parameters"
            )));
        }

        let flags = self.element.member_flags().unwrap_or_default();
        if !flags.static_ {
            return Err(LoaderError::usage(format!(
                "cannot call entrypoint '{name}': it is not static"
            )));
        }
        if !flags.public {
            return Err(LoaderError::usage(format!(
                "cannot call entrypoint '{name}': it is not public"
            )));
        }

        let unit = match loader.target_resolver().resolve(self.element.container()) {
            Ok(unit) => unit,
            // The declaring unit was stripped by a transformation.
            Err(LoaderError::UnitNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if unit.unit.function(name).is_none() {
            // The member itself was stripped.
            return Ok(());
        }

        loader.entrypoint_handler().invoke_static(&unit, name)
    }

    fn force_definition(&self, loader: &Loader) -> LoaderResult<()> {
        match loader.target_resolver().resolve(self.element.container()) {
            Ok(_) => Ok(()),
            // A marked type always existed at scan time; the only way it is
            // missing now is that a transformer stripped it for the inactive
            // environment.
            Err(LoaderError::UnitNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Collaborator that performs the actual invocation of a gated entrypoint.
pub trait EntrypointHandler: Send + Sync {
    /// Invoke the zero-arg static function `function` of `unit`.
    fn invoke_static(&self, unit: &DefinedUnit, function: &str) -> LoaderResult<()>;
}

/// Default handler: records invocations in the log and succeeds.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl EntrypointHandler for LoggingHandler {
    fn invoke_static(&self, unit: &DefinedUnit, function: &str) -> LoaderResult<()> {
        info!("invoking {}::{function}", unit.name);
        Ok(())
    }
}

/// Scan hook collecting entrypoint containers into their pack.
pub(crate) struct EntrypointHook;

impl ScanHook for EntrypointHook {
    fn element_scanned(&self, pack: &mut Pack, element: &Arc<AnnotatedElement>) {
        if let Some(entrypoint) = EntrypointContainer::try_from_element(element) {
            pack.add_entrypoint(entrypoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_unit::{Marker, MemberFlags, Retention, Unit, UnitFlags};

    fn unit_with_marker(values: Vec<(String, MarkerValue)>) -> (Unit, Marker) {
        let marker = Marker {
            marker: ENTRYPOINT_MARKER.to_string(),
            retention: Retention::Runtime,
            values,
        };
        let unit = Unit {
            format: 1,
            name: "acme.Boot".to_string(),
            flags: UnitFlags::default(),
            markers: vec![marker.clone()],
            functions: vec![],
            fields: vec![],
            co_load: vec![],
        };
        (unit, marker)
    }

    fn element_with(values: Vec<(String, MarkerValue)>) -> Arc<AnnotatedElement> {
        let (unit, marker) = unit_with_marker(values);
        Arc::new(AnnotatedElement::for_type("acme", "acme/Boot.tcu", &unit, &marker))
    }

    #[test]
    fn test_no_env_payload_is_unconstrained() {
        let container = EntrypointContainer::try_from_element(&element_with(vec![])).unwrap();
        assert!(container.environment().is_none());
        assert!(container.requires().is_empty());
    }

    #[test]
    fn test_single_env_constrains() {
        let container = EntrypointContainer::try_from_element(&element_with(vec![(
            "env".to_string(),
            MarkerValue::List(vec![MarkerValue::Str("client".to_string())]),
        )]))
        .unwrap();
        assert_eq!(container.environment(), Some(Environment::Client));
    }

    #[test]
    fn test_both_envs_unconstrained() {
        let container = EntrypointContainer::try_from_element(&element_with(vec![(
            "env".to_string(),
            MarkerValue::List(vec![
                MarkerValue::Str("client".to_string()),
                MarkerValue::Str("server".to_string()),
            ]),
        )]))
        .unwrap();
        assert!(container.environment().is_none());
    }

    #[test]
    fn test_empty_env_list_yields_no_container() {
        let result = EntrypointContainer::try_from_element(&element_with(vec![(
            "env".to_string(),
            MarkerValue::List(vec![]),
        )]));
        assert!(result.is_none());
    }

    #[test]
    fn test_requires_payload_collected() {
        let container = EntrypointContainer::try_from_element(&element_with(vec![(
            "requires".to_string(),
            MarkerValue::List(vec![
                MarkerValue::Str("acme-base".to_string()),
                MarkerValue::Str("acme-extras".to_string()),
            ]),
        )]))
        .unwrap();
        assert_eq!(container.requires(), ["acme-base", "acme-extras"]);
    }

    #[test]
    fn test_other_markers_yield_no_container() {
        let marker = Marker {
            marker: "acme.Register".to_string(),
            retention: Retention::Runtime,
            values: vec![],
        };
        let (unit, _) = unit_with_marker(vec![]);
        let element = Arc::new(AnnotatedElement::for_type("acme", "acme/Boot.tcu", &unit, &marker));
        assert!(EntrypointContainer::try_from_element(&element).is_none());
    }

    #[test]
    fn test_field_elements_are_never_containers_to_invoke() {
        let (unit, marker) = unit_with_marker(vec![]);
        let field = trellis_unit::FieldMember {
            name: "F".to_string(),
            descriptor: "str".to_string(),
            flags: MemberFlags::default(),
            markers: vec![],
        };
        let element = Arc::new(AnnotatedElement::for_field(
            "acme",
            "acme/Boot.tcu",
            &unit,
            &field,
            &marker,
        ));
        // A field-marked entrypoint still derives a container...
        let container = EntrypointContainer::try_from_element(&element).unwrap();
        // ...but its kind can never pass the safety gate (checked against a
        // real loader in the integration tests).
        assert_eq!(container.element().kind(), ElementKind::Field);
    }
}
