//! Co-load edge injection.
//!
//! A type marked `trellis.api.LoadWith` asks to be defined together with the
//! units its payload lists. During scanning, the [`CoLoadHook`] records one
//! edge per listed unit; when a listed unit later resolves, the
//! [`CoLoadInjector`] rewrites it so its definition force-resolves the
//! marked type. The registry keeps growing while packs are scanned, so the
//! injector's applicability can change between resolutions; reapplying the
//! chain on every resolution is what makes that visible.

use crate::element::{AnnotatedElement, ElementKind};
use crate::pack::{Pack, ScanHook};
use crate::transform::Transformer;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use trellis_unit::{MarkerValue, Unit};

/// Marker type declaring co-load edges.
pub const LOAD_WITH_MARKER: &str = "trellis.api.LoadWith";

/// Shared registry of unit name → co-loaded unit names.
#[derive(Debug, Default)]
pub struct CoLoadRegistry {
    targets: Mutex<BTreeMap<String, Vec<String>>>,
}

impl CoLoadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that defining `target` must also define `co_unit`.
    pub fn register(&self, target: &str, co_unit: &str) {
        debug!("registering co-load edge {target} -> {co_unit}");
        let mut targets = self.targets.lock().unwrap();
        let list = targets.entry(target.to_string()).or_default();
        if !list.iter().any(|c| c == co_unit) {
            list.push(co_unit.to_string());
        }
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.targets.lock().unwrap().contains_key(target)
    }

    pub fn co_loads(&self, target: &str) -> Vec<String> {
        self.targets
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

/// Injects registered co-load edges into matching units.
pub struct CoLoadInjector {
    registry: Arc<CoLoadRegistry>,
}

impl CoLoadInjector {
    pub fn new(registry: Arc<CoLoadRegistry>) -> Self {
        Self { registry }
    }
}

impl Transformer for CoLoadInjector {
    fn name(&self) -> &str {
        "co-load-injector"
    }

    fn can_transform(&self, unit_name: &str) -> bool {
        self.registry.has_target(unit_name)
    }

    fn transform(&self, unit_name: &str, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let mut unit = Unit::parse(&bytes).ok()?;
        for co_unit in self.registry.co_loads(unit_name) {
            if !unit.co_load.contains(&co_unit) {
                unit.co_load.push(co_unit);
            }
        }
        unit.encode().ok()
    }
}

/// Scan hook: a `LoadWith`-marked type registers itself as a co-load of
/// every unit its payload references.
pub struct CoLoadHook {
    registry: Arc<CoLoadRegistry>,
}

impl CoLoadHook {
    pub fn new(registry: Arc<CoLoadRegistry>) -> Self {
        Self { registry }
    }
}

impl ScanHook for CoLoadHook {
    fn element_scanned(&self, _pack: &mut Pack, element: &Arc<AnnotatedElement>) {
        if element.marker() != LOAD_WITH_MARKER || element.kind() != ElementKind::Type {
            return;
        }
        if let Some(MarkerValue::List(items)) = element.value("value") {
            for item in items {
                if let MarkerValue::TypeRef(target) = item {
                    self.registry.register(target, element.container());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_unit::UnitFlags;

    fn encoded(name: &str) -> Vec<u8> {
        Unit {
            format: 1,
            name: name.to_string(),
            flags: UnitFlags::default(),
            markers: vec![],
            functions: vec![],
            fields: vec![],
            co_load: vec![],
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_registry_deduplicates_edges() {
        let registry = CoLoadRegistry::new();
        registry.register("acme.Target", "acme.Companion");
        registry.register("acme.Target", "acme.Companion");
        registry.register("acme.Target", "acme.Other");

        assert_eq!(registry.co_loads("acme.Target"), ["acme.Companion", "acme.Other"]);
        assert!(registry.co_loads("acme.None").is_empty());
    }

    #[test]
    fn test_injector_only_matches_registered_targets() {
        let registry = Arc::new(CoLoadRegistry::new());
        let injector = CoLoadInjector::new(Arc::clone(&registry));

        assert!(!injector.can_transform("acme.Target"));
        registry.register("acme.Target", "acme.Companion");
        assert!(injector.can_transform("acme.Target"));
    }

    #[test]
    fn test_injector_appends_edges() {
        let registry = Arc::new(CoLoadRegistry::new());
        registry.register("acme.Target", "acme.Companion");

        let injector = CoLoadInjector::new(registry);
        let out = injector.transform("acme.Target", encoded("acme.Target")).unwrap();
        let unit = Unit::parse(&out).unwrap();
        assert_eq!(unit.co_load, ["acme.Companion"]);
    }
}
