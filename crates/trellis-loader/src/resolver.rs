//! The layered unit-resolution hierarchy.
//!
//! Two cooperating scopes form a strict two-level hierarchy. The privileged
//! [`PluginResolver`] serves trusted extension units straight from its
//! sources, with no transformation. The [`TargetResolver`] lazily resolves
//! host-program units: raw bytes run through the pre-definition chain, the
//! result is materialized into a [`DefinedUnit`], co-load edges are
//! resolved, and the post-definition chain runs before the unit is handed to
//! the caller. Unit names under a delegated pack prefix resolve through the
//! privileged scope instead, so plugin units can transparently serve as part
//! of the target program.
//!
//! Byte lookup keeps the **last** successful source (later-installed sources
//! shadow earlier ones); resource lookup is **first**-match. This asymmetry
//! is deliberate and both scopes share it.
//!
//! Materialization is at-most-once per unit name: concurrent resolutions of
//! the same name serialize on a per-name cell, so no two divergent defined
//! forms are ever observable. There is no timeout anywhere in resolution; a
//! co-load cycle blocks forever.

use crate::error::{LoaderError, LoaderResult};
use crate::transform::Transformers;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};
use trellis_unit::{Location, Unit, UnitSource};

/// A unit materialized into its defined form.
#[derive(Debug)]
pub struct DefinedUnit {
    /// The qualified name the unit was resolved under.
    pub name: String,

    /// The materialized unit.
    pub unit: Unit,

    /// The final binary form, after both chains.
    pub bytes: Vec<u8>,
}

type UnitSlot = Arc<OnceCell<Arc<DefinedUnit>>>;

/// The privileged resolution scope, serving trusted extension units.
#[derive(Default)]
pub struct PluginResolver {
    sources: RwLock<Vec<Arc<dyn UnitSource>>>,
    units: Mutex<HashMap<String, UnitSlot>>,
}

impl PluginResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Later sources shadow earlier ones for unit bytes.
    pub fn add_source(&self, source: Arc<dyn UnitSource>) {
        self.sources.write().unwrap().push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().unwrap().len()
    }

    /// Raw unit bytes: every source is consulted and the last success wins.
    pub fn load_unit_bytes(&self, name: &str) -> LoaderResult<Vec<u8>> {
        let sources = self.sources.read().unwrap();
        let mut bytes = None;
        for source in sources.iter() {
            if let Ok(found) = source.load_unit(name) {
                bytes = Some(found);
            }
        }
        bytes.ok_or_else(|| LoaderError::UnitNotFound(name.to_string()))
    }

    /// Resolve and define a unit. No transformation chain applies in this
    /// scope.
    pub fn resolve(&self, name: &str) -> LoaderResult<Arc<DefinedUnit>> {
        let slot = slot_for(&self.units, name);
        slot.get_or_try_init(|| {
            trace!("defining plugin unit {name}");
            let bytes = self.load_unit_bytes(name)?;
            let unit = materialize(name, &bytes)?;
            Ok(Arc::new(DefinedUnit {
                name: name.to_string(),
                unit,
                bytes,
            }))
        })
        .map(Arc::clone)
    }

    /// First location providing `path`, in source-registration order.
    pub fn find_resource(&self, path: &str) -> Option<Location> {
        let sources = self.sources.read().unwrap();
        for source in sources.iter() {
            if let Some(location) = source.locate(path).into_iter().next() {
                return Some(location);
            }
        }
        None
    }

    /// Every location providing `path`, concatenated in source-registration
    /// order.
    pub fn find_resources(&self, path: &str) -> Vec<Location> {
        let sources = self.sources.read().unwrap();
        sources
            .iter()
            .flat_map(|source| source.locate(path))
            .collect()
    }
}

/// The target resolution scope, serving host-program units through the
/// transformer chains.
pub struct TargetResolver {
    plugin: Arc<PluginResolver>,
    delegated: RwLock<HashSet<String>>,
    sources: RwLock<Vec<Arc<dyn UnitSource>>>,
    transformers: OnceCell<Arc<Transformers>>,
    units: Mutex<HashMap<String, UnitSlot>>,
}

impl TargetResolver {
    pub fn new(plugin: Arc<PluginResolver>) -> Self {
        Self {
            plugin,
            delegated: RwLock::new(HashSet::new()),
            sources: RwLock::new(Vec::new()),
            transformers: OnceCell::new(),
            units: Mutex::new(HashMap::new()),
        }
    }

    /// The privileged scope this resolver delegates to.
    pub fn plugin_scope(&self) -> &Arc<PluginResolver> {
        &self.plugin
    }

    /// Designate a pack name whose units resolve through the privileged
    /// scope.
    pub fn delegate_package(&self, pack_name: &str) {
        debug!("delegating package '{pack_name}' to the plugin scope");
        self.delegated.write().unwrap().insert(pack_name.to_string());
    }

    /// Whether a unit name falls under a delegated pack name.
    pub fn is_delegated(&self, unit_name: &str) -> bool {
        let delegated = self.delegated.read().unwrap();
        delegated.iter().any(|pack| {
            unit_name
                .strip_prefix(pack.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Register a source. Later sources shadow earlier ones for unit bytes.
    pub fn add_source(&self, source: Arc<dyn UnitSource>) {
        self.sources.write().unwrap().push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().unwrap().len()
    }

    /// Hand the sealed transformer set to this resolver. Can only happen
    /// once, at hierarchy assembly.
    pub fn install_transformers(&self, transformers: Arc<Transformers>) -> LoaderResult<()> {
        self.transformers
            .set(transformers)
            .map_err(|_| LoaderError::usage("transformer set already installed"))
    }

    /// Raw unit bytes from this scope's own sources; the last success wins.
    pub fn load_unit_bytes(&self, name: &str) -> LoaderResult<Vec<u8>> {
        let sources = self.sources.read().unwrap();
        let mut bytes = None;
        for source in sources.iter() {
            if let Ok(found) = source.load_unit(name) {
                bytes = Some(found);
            }
        }
        bytes.ok_or_else(|| LoaderError::UnitNotFound(name.to_string()))
    }

    /// Resolve and define a unit. Delegated names go to the privileged
    /// scope; everything else runs through the transformer chains. Any
    /// failing stage surfaces as [`LoaderError::UnitNotFound`] for the
    /// requested name, with no partial materialization.
    pub fn resolve(&self, name: &str) -> LoaderResult<Arc<DefinedUnit>> {
        if self.is_delegated(name) {
            return self.plugin.resolve(name);
        }

        let slot = slot_for(&self.units, name);
        slot.get_or_try_init(|| self.define(name)).map(Arc::clone)
    }

    fn define(&self, name: &str) -> LoaderResult<Arc<DefinedUnit>> {
        trace!("defining target unit {name}");
        let raw = self.load_unit_bytes(name)?;

        let transformers = self.transformers.get();

        let bytes = match transformers {
            Some(t) => t.pre().apply(name, raw).map_err(|e| not_found(name, e))?,
            None => raw,
        };

        let unit = materialize(name, &bytes)?;

        // Definition side effects: force-resolve co-load edges.
        for co_unit in &unit.co_load {
            if co_unit != name {
                self.resolve(co_unit).map_err(|e| not_found(name, e))?;
            }
        }

        let bytes = match transformers {
            Some(t) => t.post().apply(name, bytes).map_err(|e| not_found(name, e))?,
            None => bytes,
        };

        Ok(Arc::new(DefinedUnit {
            name: name.to_string(),
            unit,
            bytes,
        }))
    }

    /// First location providing `path` across this scope's own sources.
    pub fn find_resource(&self, path: &str) -> Option<Location> {
        let sources = self.sources.read().unwrap();
        for source in sources.iter() {
            if let Some(location) = source.locate(path).into_iter().next() {
                return Some(location);
            }
        }
        None
    }

    /// Every location providing `path`, concatenated in source-registration
    /// order.
    pub fn find_resources(&self, path: &str) -> Vec<Location> {
        let sources = self.sources.read().unwrap();
        sources
            .iter()
            .flat_map(|source| source.locate(path))
            .collect()
    }
}

fn slot_for(units: &Mutex<HashMap<String, UnitSlot>>, name: &str) -> UnitSlot {
    let mut units = units.lock().unwrap();
    Arc::clone(units.entry(name.to_string()).or_default())
}

fn materialize(name: &str, bytes: &[u8]) -> LoaderResult<Unit> {
    let unit = Unit::parse(bytes).map_err(|e| not_found(name, e.into()))?;
    if unit.name != name {
        debug!("unit name mismatch: requested {name}, payload declares {}", unit.name);
        return Err(LoaderError::UnitNotFound(name.to_string()));
    }
    Ok(unit)
}

fn not_found(name: &str, cause: LoaderError) -> LoaderError {
    debug!("resolution of {name} failed: {cause}");
    LoaderError::UnitNotFound(name.to_string())
}

#[cfg(test)]
mod tests {
    // Resolution has no cancellation or timeout anywhere: a transformer or
    // co-load edge that never completes blocks the calling thread (and, for
    // a co-load cycle, deadlocks the per-name cells) indefinitely. That is a
    // known liveness gap of the design, so no test below exercises a cycle.

    use super::*;
    use crate::transform::Transformer;
    use std::collections::HashMap;
    use trellis_unit::{UnitError, UnitResult};

    /// In-memory source mapping unit names to raw bytes.
    struct MapSource(HashMap<String, Vec<u8>>);

    impl MapSource {
        fn of(entries: &[(&str, &[u8])]) -> Arc<Self> {
            Arc::new(Self(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
            ))
        }
    }

    impl UnitSource for MapSource {
        fn locate(&self, _path: &str) -> Vec<Location> {
            Vec::new()
        }

        fn load_unit(&self, name: &str) -> UnitResult<Vec<u8>> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| UnitError::NotFound(name.to_string()))
        }
    }

    fn encoded_unit(name: &str) -> Vec<u8> {
        Unit {
            format: 1,
            name: name.to_string(),
            flags: Default::default(),
            markers: vec![],
            functions: vec![],
            fields: vec![],
            co_load: vec![],
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_last_source_wins_for_unit_bytes() {
        let resolver = PluginResolver::new();
        resolver.add_source(MapSource::of(&[("acme.X", b"first")]));
        resolver.add_source(MapSource::of(&[("acme.X", b"second")]));

        assert_eq!(resolver.load_unit_bytes("acme.X").unwrap(), b"second");
    }

    #[test]
    fn test_missing_unit_is_not_found() {
        let resolver = PluginResolver::new();
        resolver.add_source(MapSource::of(&[("acme.X", b"x")]));

        let err = resolver.load_unit_bytes("acme.Y").unwrap_err();
        assert!(matches!(err, LoaderError::UnitNotFound(ref n) if n == "acme.Y"));
    }

    /// Source pretending to provide every resource under one root.
    struct ResourceSource(std::path::PathBuf);

    impl UnitSource for ResourceSource {
        fn locate(&self, path: &str) -> Vec<Location> {
            vec![Location::File(self.0.join(path))]
        }
    }

    #[test]
    fn test_resource_lookup_is_first_match_and_enumeration_keeps_order() {
        let resolver = PluginResolver::new();
        resolver.add_source(Arc::new(ResourceSource("s1".into())));
        resolver.add_source(Arc::new(ResourceSource("s2".into())));

        let first = resolver.find_resource("x.json").unwrap();
        assert_eq!(first.to_string(), format!("s1{}x.json", std::path::MAIN_SEPARATOR));

        let all: Vec<String> = resolver
            .find_resources("x.json")
            .iter()
            .map(|location| location.to_string())
            .collect();
        assert_eq!(
            all,
            vec![
                format!("s1{}x.json", std::path::MAIN_SEPARATOR),
                format!("s2{}x.json", std::path::MAIN_SEPARATOR)
            ]
        );
    }

    #[test]
    fn test_definition_is_at_most_once() {
        let resolver = PluginResolver::new();
        resolver.add_source(MapSource::of(&[("acme.X", &encoded_unit("acme.X"))]));

        let first = resolver.resolve("acme.X").unwrap();
        let second = resolver.resolve("acme.X").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_delegated_names_resolve_through_plugin_scope() {
        let plugin = Arc::new(PluginResolver::new());
        plugin.add_source(MapSource::of(&[("ext.agent.Boot", &encoded_unit("ext.agent.Boot"))]));

        let target = TargetResolver::new(Arc::clone(&plugin));
        target.delegate_package("ext.agent");

        assert!(target.is_delegated("ext.agent.Boot"));
        assert!(!target.is_delegated("ext.agentx.Boot"));
        assert!(!target.is_delegated("ext.agent"));

        // The target scope has no source for the unit; only delegation can
        // resolve it.
        let defined = target.resolve("ext.agent.Boot").unwrap();
        assert_eq!(defined.unit.name, "ext.agent.Boot");
    }

    #[test]
    fn test_target_rejection_surfaces_as_not_found() {
        struct RejectAll;

        impl Transformer for RejectAll {
            fn name(&self) -> &str {
                "reject-all"
            }
            fn can_transform(&self, _unit_name: &str) -> bool {
                true
            }
            fn transform(&self, _unit_name: &str, _bytes: Vec<u8>) -> Option<Vec<u8>> {
                None
            }
        }

        let target = TargetResolver::new(Arc::new(PluginResolver::new()));
        target.add_source(MapSource::of(&[("acme.X", &encoded_unit("acme.X"))]));

        let mut transformers = Transformers::new();
        transformers.install_pre(Box::new(RejectAll)).unwrap();
        transformers.seal();
        target.install_transformers(Arc::new(transformers)).unwrap();

        let err = target.resolve("acme.X").unwrap_err();
        assert!(matches!(err, LoaderError::UnitNotFound(ref n) if n == "acme.X"));
    }

    #[test]
    fn test_name_mismatch_is_not_found() {
        let target = TargetResolver::new(Arc::new(PluginResolver::new()));
        target.add_source(MapSource::of(&[("acme.X", &encoded_unit("acme.Other"))]));

        let err = target.resolve("acme.X").unwrap_err();
        assert!(matches!(err, LoaderError::UnitNotFound(ref n) if n == "acme.X"));
    }

    #[test]
    fn test_co_load_edges_resolve_on_definition() {
        let target = TargetResolver::new(Arc::new(PluginResolver::new()));

        let mut with_edge = Unit {
            format: 1,
            name: "acme.Main".to_string(),
            flags: Default::default(),
            markers: vec![],
            functions: vec![],
            fields: vec![],
            co_load: vec!["acme.Side".to_string()],
        };
        let main_bytes = with_edge.encode().unwrap();
        with_edge.name = "acme.Side".to_string();
        with_edge.co_load.clear();
        let side_bytes = with_edge.encode().unwrap();

        target.add_source(MapSource::of(&[
            ("acme.Main", &main_bytes),
            ("acme.Side", &side_bytes),
        ]));

        target.resolve("acme.Main").unwrap();
        // The co-load edge was defined as a side effect.
        let side = target.resolve("acme.Side").unwrap();
        assert_eq!(side.unit.name, "acme.Side");
    }

    #[test]
    fn test_missing_co_load_edge_fails_resolution() {
        let target = TargetResolver::new(Arc::new(PluginResolver::new()));

        let unit = Unit {
            format: 1,
            name: "acme.Main".to_string(),
            flags: Default::default(),
            markers: vec![],
            functions: vec![],
            fields: vec![],
            co_load: vec!["acme.Gone".to_string()],
        };
        target.add_source(MapSource::of(&[("acme.Main", &unit.encode().unwrap())]));

        let err = target.resolve("acme.Main").unwrap_err();
        assert!(matches!(err, LoaderError::UnitNotFound(ref n) if n == "acme.Main"));
    }
}
