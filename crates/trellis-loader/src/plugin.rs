//! Loader plugins: discovery, instantiation and initialization.
//!
//! Plugins are trusted extension code participating in the bootstrap before
//! packs load: they can install unit sources and transformers while
//! registration is still open. Plugin descriptors (`trellis.plugin.json`)
//! are discovered through the privileged scope's resource enumeration; the
//! types they name are instantiated through an explicit constructor
//! registry populated by the embedding application.

use crate::error::{LoaderError, LoaderResult, Problem};
use crate::loader::Loader;
use crate::phase::{Phase, ProblemReport};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Resource name of plugin descriptors.
pub const PLUGIN_DESCRIPTOR: &str = "trellis.plugin.json";

/// A plugin participating in the bootstrap.
pub trait LoaderPlugin {
    /// Runs before the freeze point; installers are still open.
    fn init(&mut self, loader: &mut Loader) -> Result<(), Problem>;

    /// Runs after resolver assembly, right before the host launches.
    fn post_init(&mut self, loader: &mut Loader) -> Result<(), Problem> {
        let _ = loader;
        Ok(())
    }
}

/// One parsed plugin descriptor.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    id: String,
    package: String,
    entry_types: Vec<String>,
}

impl PluginInfo {
    /// Parse a descriptor. The `plugins` array holds bare type-name
    /// suffixes, each resolved against the declared `package`.
    pub fn parse(bytes: &[u8]) -> LoaderResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let object = value
            .as_object()
            .ok_or_else(|| LoaderError::validation("<root>", "descriptor must be an object"))?;

        let id = require_string(object, "id")?;
        let package = require_string(object, "package")?;

        let plugins = object
            .get("plugins")
            .ok_or_else(|| LoaderError::validation("plugins", "not specified"))?;
        let plugins = plugins
            .as_array()
            .ok_or_else(|| LoaderError::validation("plugins", "must be an array of strings"))?;

        let mut entry_types = Vec::with_capacity(plugins.len());
        for item in plugins {
            let suffix = item
                .as_str()
                .ok_or_else(|| LoaderError::validation("plugins", "must contain only strings"))?;
            entry_types.push(format!("{package}.{suffix}"));
        }

        Ok(Self {
            id,
            package,
            entry_types,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The package name delegated to the privileged scope.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Qualified names of the plugin types to instantiate.
    pub fn entry_types(&self) -> &[String] {
        &self.entry_types
    }
}

fn require_string(object: &Map<String, Value>, field: &str) -> LoaderResult<String> {
    match object.get(field) {
        None => Err(LoaderError::validation(field, "not specified")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(LoaderError::validation(field, "must be a string")),
    }
}

/// Explicit factory registry standing in for reflective instantiation: the
/// embedding application registers one constructor per qualified plugin
/// type name before the bootstrap runs.
#[derive(Default)]
pub struct PluginConstructors {
    factories: HashMap<String, Box<dyn Fn() -> Box<dyn LoaderPlugin>>>,
}

impl PluginConstructors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        qualified_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn LoaderPlugin> + 'static,
    ) {
        self.factories.insert(qualified_name.into(), Box::new(factory));
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.factories.contains_key(qualified_name)
    }

    pub fn construct(&self, qualified_name: &str) -> Option<Box<dyn LoaderPlugin>> {
        self.factories.get(qualified_name).map(|factory| factory())
    }
}

/// One instantiated plugin, tagged with its descriptor id.
pub struct LoadedPlugin {
    pub(crate) id: String,
    pub(crate) plugin: Box<dyn LoaderPlugin>,
}

impl LoadedPlugin {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Finds plugin descriptors through the privileged scope.
pub struct PluginDiscoveryPhase;

impl Phase for PluginDiscoveryPhase {
    type Output = Vec<PluginInfo>;

    fn name(&self) -> &'static str {
        "PluginDiscovery"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) -> Vec<PluginInfo> {
        let mut infos = Vec::new();
        let mut used_ids = HashSet::new();
        used_ids.insert(loader.host_id().to_string());

        for location in loader.plugin_resolver().find_resources(PLUGIN_DESCRIPTOR) {
            let source = location.to_string();
            let parsed = location
                .read()
                .map_err(LoaderError::from)
                .and_then(|bytes| PluginInfo::parse(&bytes));

            match parsed {
                Ok(info) => {
                    if used_ids.contains(info.id()) {
                        report.record(
                            source.clone(),
                            Problem::new(LoaderError::DuplicateId {
                                kind: "plugin",
                                id: info.id().to_string(),
                            })
                            .critical()
                            .subject(source),
                        );
                        continue;
                    }
                    used_ids.insert(info.id().to_string());
                    debug!("discovered plugin '{}' from {source}", info.id());
                    infos.push(info);
                }
                Err(e) => {
                    report.record(
                        source.clone(),
                        Problem::new(e).critical().subject(source),
                    );
                }
            }
        }

        info!("discovered {} plugin descriptors", infos.len());
        infos
    }
}

/// Instantiates every discovered plugin type through the constructor
/// registry.
pub struct InstantiatePluginsPhase {
    infos: Vec<PluginInfo>,
}

impl InstantiatePluginsPhase {
    pub fn new(infos: Vec<PluginInfo>) -> Self {
        Self { infos }
    }
}

impl Phase for InstantiatePluginsPhase {
    type Output = Vec<LoadedPlugin>;

    fn name(&self) -> &'static str {
        "InstantiatePlugins"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) -> Vec<LoadedPlugin> {
        let mut plugins = Vec::new();
        let mut seen_types = HashSet::new();

        for info in &self.infos {
            for entry_type in info.entry_types() {
                if !seen_types.insert(entry_type.clone()) {
                    debug!("plugin type '{entry_type}' already instantiated");
                    continue;
                }

                match loader.plugin_constructors().construct(entry_type) {
                    Some(plugin) => {
                        debug!("instantiated plugin type '{entry_type}'");
                        plugins.push(LoadedPlugin {
                            id: info.id().to_string(),
                            plugin,
                        });
                    }
                    None => report.record(
                        info.id().to_string(),
                        Problem::new(LoaderError::validation(
                            "plugins",
                            format!("no registered constructor for plugin type '{entry_type}'"),
                        ))
                        .critical()
                        .subject(info.id()),
                    ),
                }
            }
        }

        plugins
    }
}

/// Which initialization pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    PreInit,
    PostInit,
}

/// Runs one initialization pass over every instantiated plugin.
pub struct InitializePluginsPhase {
    stage: InitStage,
}

impl InitializePluginsPhase {
    pub fn pre_init() -> Self {
        Self {
            stage: InitStage::PreInit,
        }
    }

    pub fn post_init() -> Self {
        Self {
            stage: InitStage::PostInit,
        }
    }
}

impl Phase for InitializePluginsPhase {
    type Output = ();

    fn name(&self) -> &'static str {
        match self.stage {
            InitStage::PreInit => "InitializePlugins",
            InitStage::PostInit => "PostInitializePlugins",
        }
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) {
        let mut plugins = loader.take_plugins();

        for loaded in plugins.iter_mut() {
            let outcome = match self.stage {
                InitStage::PreInit => loaded.plugin.init(loader),
                InitStage::PostInit => loaded.plugin.post_init(loader),
            };
            if let Err(problem) = outcome {
                report.record(loaded.id.clone(), problem);
            }
        }

        loader.restore_plugins(plugins);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolves_suffixes_against_package() {
        let info = PluginInfo::parse(
            br#"{"id": "agent", "package": "ext.agent", "plugins": ["Boot", "Tweaks"]}"#,
        )
        .unwrap();
        assert_eq!(info.id(), "agent");
        assert_eq!(info.package(), "ext.agent");
        assert_eq!(info.entry_types(), ["ext.agent.Boot", "ext.agent.Tweaks"]);
    }

    #[test]
    fn test_parse_requires_fields() {
        let err = PluginInfo::parse(br#"{"package": "p", "plugins": []}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "id"));

        let err = PluginInfo::parse(br#"{"id": "a", "package": "p"}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "plugins"));

        let err = PluginInfo::parse(br#"{"id": "a", "package": "p", "plugins": [3]}"#).unwrap_err();
        assert!(matches!(err, LoaderError::Validation { ref field, .. } if field == "plugins"));
    }

    #[test]
    fn test_constructor_registry() {
        struct Noop;
        impl LoaderPlugin for Noop {
            fn init(&mut self, _loader: &mut Loader) -> Result<(), Problem> {
                Ok(())
            }
        }

        let mut constructors = PluginConstructors::new();
        constructors.register("ext.agent.Boot", || Box::new(Noop));

        assert!(constructors.contains("ext.agent.Boot"));
        assert!(constructors.construct("ext.agent.Boot").is_some());
        assert!(constructors.construct("ext.agent.Missing").is_none());
    }
}
