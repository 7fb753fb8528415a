//! The bootstrap orchestrator.

use crate::config::LoaderConfig;
use crate::discovery::{user_packs_dir, PackDiscoveryPhase, PackFileId, PackFiles};
use crate::entrypoint::{EntrypointHandler, EntrypointHook, LoggingHandler};
use crate::environment::Environment;
use crate::error::{LoaderError, LoaderResult, Problem};
use crate::load::PackLoadingPhase;
use crate::pack::{Pack, ScanHook};
use crate::phase::{Phase, PhaseStatus, ProblemReport};
use crate::plugin::{
    InitializePluginsPhase, InstantiatePluginsPhase, LoadedPlugin, PluginConstructors,
    PluginDiscoveryPhase,
};
use crate::resolver::{PluginResolver, TargetResolver};
use crate::scan::ScanPacksPhase;
use crate::transform::{Transformer, Transformers};
use crate::transformers::{CoLoadHook, CoLoadInjector, CoLoadRegistry, EnvStripper, UnitExporter};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use trellis_unit::{PackStore, UnitSource};

/// Debug export settings: dotted-name prefix filter and target directory.
#[derive(Debug, Clone)]
struct ExportSettings {
    filter: String,
    dir: PathBuf,
}

/// The loader: owns the bootstrap state and drives the phase pipeline.
pub struct Loader {
    environment: Environment,
    host_id: String,

    pack_roots: Vec<PathBuf>,
    host_units: Option<PathBuf>,
    export: Option<ExportSettings>,

    pack_files: PackFiles,
    discovered: Vec<PackFileId>,
    packs: Vec<Pack>,
    packs_by_id: HashMap<String, usize>,

    plugin_resolver: Arc<PluginResolver>,
    target_resolver: Arc<TargetResolver>,

    plugins: Vec<LoadedPlugin>,
    plugin_constructors: PluginConstructors,

    transformers: Transformers,
    default_sources: Vec<Arc<dyn UnitSource>>,
    scan_hooks: Vec<Box<dyn ScanHook>>,
    co_load: Arc<CoLoadRegistry>,

    weave_configs: Vec<String>,
    entrypoint_handler: Box<dyn EntrypointHandler>,
    current_phase: Option<&'static str>,
}

impl Loader {
    pub fn new(environment: Environment, host_id: impl Into<String>) -> Self {
        let plugin_resolver = Arc::new(PluginResolver::new());
        let target_resolver = Arc::new(TargetResolver::new(Arc::clone(&plugin_resolver)));
        let co_load = Arc::new(CoLoadRegistry::new());

        let scan_hooks: Vec<Box<dyn ScanHook>> = vec![
            Box::new(EntrypointHook),
            Box::new(CoLoadHook::new(Arc::clone(&co_load))),
        ];

        Self {
            environment,
            host_id: host_id.into(),
            pack_roots: Vec::new(),
            host_units: None,
            export: None,
            pack_files: PackFiles::new(),
            discovered: Vec::new(),
            packs: Vec::new(),
            packs_by_id: HashMap::new(),
            plugin_resolver,
            target_resolver,
            plugins: Vec::new(),
            plugin_constructors: PluginConstructors::new(),
            transformers: Transformers::new(),
            default_sources: Vec::new(),
            scan_hooks,
            co_load,
            weave_configs: Vec::new(),
            entrypoint_handler: Box::new(LoggingHandler),
            current_phase: None,
        }
    }

    /// Build a loader from the launcher configuration.
    pub fn from_config(config: &LoaderConfig, environment: Environment) -> Self {
        let mut loader = Self::new(environment, config.host.id.clone());

        for root in &config.packs.roots {
            loader.add_pack_root(root.clone());
        }
        if config.packs.include_user_dir {
            if let Some(dir) = user_packs_dir() {
                loader.add_pack_root(dir);
            }
        }

        loader.host_units = Some(config.host.units.clone());
        loader.export = config.debug.export_units.as_ref().map(|filter| ExportSettings {
            filter: filter.clone(),
            dir: config.debug.export_dir.clone(),
        });

        loader
    }

    // ---- accessors -------------------------------------------------------

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The implicit pack id of the host program.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Name of the currently running phase, for introspection from inside
    /// phase code.
    pub fn current_phase(&self) -> Option<&'static str> {
        self.current_phase
    }

    pub fn pack_roots(&self) -> &[PathBuf] {
        &self.pack_roots
    }

    pub fn pack_files(&self) -> &PackFiles {
        &self.pack_files
    }

    pub(crate) fn pack_files_mut(&mut self) -> &mut PackFiles {
        &mut self.pack_files
    }

    /// Pack file ids accepted by discovery.
    pub fn discovered(&self) -> &[PackFileId] {
        &self.discovered
    }

    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    pub fn pack_by_id(&self, id: &str) -> Option<&Pack> {
        self.packs_by_id.get(id).and_then(|&index| self.packs.get(index))
    }

    pub fn is_pack_loaded(&self, id: &str) -> bool {
        self.packs_by_id.contains_key(id)
    }

    /// Weave configuration resources whose owning pack is loaded (or is the
    /// host itself).
    pub fn weave_configs(&self) -> &[String] {
        &self.weave_configs
    }

    pub fn plugin_resolver(&self) -> &Arc<PluginResolver> {
        &self.plugin_resolver
    }

    pub fn target_resolver(&self) -> &Arc<TargetResolver> {
        &self.target_resolver
    }

    pub fn plugin_constructors(&self) -> &PluginConstructors {
        &self.plugin_constructors
    }

    /// Register plugin constructors before calling [`Loader::bootstrap`].
    pub fn plugin_constructors_mut(&mut self) -> &mut PluginConstructors {
        &mut self.plugin_constructors
    }

    pub fn entrypoint_handler(&self) -> &dyn EntrypointHandler {
        self.entrypoint_handler.as_ref()
    }

    /// Replace the entrypoint invocation collaborator.
    pub fn set_entrypoint_handler(&mut self, handler: Box<dyn EntrypointHandler>) {
        self.entrypoint_handler = handler;
    }

    pub fn default_sources(&self) -> Vec<Arc<dyn UnitSource>> {
        self.default_sources.clone()
    }

    // ---- installer API (open until the freeze point) ---------------------

    pub fn add_pack_root(&mut self, root: PathBuf) {
        self.pack_roots.push(root);
    }

    /// Point the loader at the host program's compiled units; installed as a
    /// default source during default installation.
    pub fn set_host_units(&mut self, dir: PathBuf) {
        self.host_units = Some(dir);
    }

    /// Enable the debug unit export side channel.
    pub fn set_export(&mut self, filter: impl Into<String>, dir: PathBuf) {
        self.export = Some(ExportSettings {
            filter: filter.into(),
            dir,
        });
    }

    /// Install a default unit source, later assembled into the target
    /// resolver. Fails once registration is frozen.
    pub fn install_source(&mut self, source: Arc<dyn UnitSource>) -> LoaderResult<()> {
        if self.transformers.is_sealed() {
            return Err(LoaderError::usage(
                "source registration is closed after plugin initialization",
            ));
        }
        self.default_sources.push(source);
        Ok(())
    }

    /// Install a pre-definition transformer. Fails once registration is
    /// frozen.
    pub fn install_transformer(&mut self, transformer: Box<dyn Transformer>) -> LoaderResult<()> {
        self.transformers.install_pre(transformer)
    }

    pub(crate) fn install_post_transformer(
        &mut self,
        transformer: Box<dyn Transformer>,
    ) -> LoaderResult<()> {
        self.transformers.install_post(transformer)
    }

    /// Install a side-registration hook offered every scanned element.
    /// Fails once registration is frozen.
    pub fn install_scan_hook(&mut self, hook: Box<dyn ScanHook>) -> LoaderResult<()> {
        if self.transformers.is_sealed() {
            return Err(LoaderError::usage(
                "scan hook registration is closed after plugin initialization",
            ));
        }
        self.scan_hooks.push(hook);
        Ok(())
    }

    pub(crate) fn co_load_registry(&self) -> Arc<CoLoadRegistry> {
        Arc::clone(&self.co_load)
    }

    // ---- phase plumbing --------------------------------------------------

    pub(crate) fn take_plugins(&mut self) -> Vec<LoadedPlugin> {
        std::mem::take(&mut self.plugins)
    }

    pub(crate) fn restore_plugins(&mut self, plugins: Vec<LoadedPlugin>) {
        self.plugins = plugins;
    }

    pub(crate) fn take_packs(&mut self) -> Vec<Pack> {
        std::mem::take(&mut self.packs)
    }

    pub(crate) fn restore_packs(&mut self, packs: Vec<Pack>) {
        self.packs = packs;
    }

    pub(crate) fn take_scan_hooks(&mut self) -> Vec<Box<dyn ScanHook>> {
        std::mem::take(&mut self.scan_hooks)
    }

    pub(crate) fn restore_scan_hooks(&mut self, hooks: Vec<Box<dyn ScanHook>>) {
        self.scan_hooks = hooks;
    }

    /// Run one phase to completion. A warning report is surfaced and the
    /// pipeline proceeds; a fatal report is surfaced and the bootstrap
    /// aborts with a critical error. Partial side effects of a fatal phase
    /// are not rolled back.
    pub fn run_phase<P: Phase>(&mut self, phase: P) -> LoaderResult<P::Output> {
        let name = phase.name();
        debug!("starting phase {name}");
        self.current_phase = Some(name);

        let mut report = ProblemReport::new();
        let output = phase.run(self, &mut report);

        self.current_phase = None;

        let status = report.status();
        if status != PhaseStatus::Success {
            error!("phase {name} finished with status {status}");
            for (category, problems) in report.iter() {
                error!("-- {category} --");
                for problem in problems {
                    error!("   {problem}");
                }
            }
            if status == PhaseStatus::Fatal {
                return Err(LoaderError::Critical(format!(
                    "phase {name} failed, cannot continue loading"
                )));
            }
        }

        Ok(output)
    }

    // ---- the pipeline ----------------------------------------------------

    /// Run the whole bootstrap pipeline.
    pub fn bootstrap(&mut self) -> LoaderResult<()> {
        info!(
            "bootstrapping '{}' for environment {}",
            self.host_id, self.environment
        );

        let discovered = self.run_phase(PackDiscoveryPhase)?;
        info!("found {} pack files", discovered.len());
        self.discovered = discovered;

        // Every discovered pack serves plugin units through the privileged
        // scope.
        for id in &self.discovered {
            let store = Arc::clone(self.pack_files.get(*id).store());
            self.plugin_resolver.add_source(store);
        }

        let infos = self.run_phase(PluginDiscoveryPhase)?;
        for info in &infos {
            self.target_resolver.delegate_package(info.package());
        }

        let plugins = self.run_phase(InstantiatePluginsPhase::new(infos))?;
        info!("loaded {} plugins", plugins.len());
        self.plugins = plugins;

        self.run_phase(InstallDefaultsPhase)?;
        self.run_phase(InitializePluginsPhase::pre_init())?;

        // Freeze point: transformer, source and hook registration closes.
        self.transformers.seal();

        let files = self.discovered.clone();
        let packs = self.run_phase(PackLoadingPhase::new(files))?;
        self.set_packs(packs);
        self.collect_weave_configs();

        self.run_phase(ScanPacksPhase)?;
        self.run_phase(AssembleResolversPhase)?;
        self.run_phase(InitializePluginsPhase::post_init())?;

        info!("loaded {} packs", self.packs.len());
        Ok(())
    }

    /// Resolve the host's main unit through the target scope, run every
    /// safe entrypoint, then hand `main` to the entrypoint handler.
    pub fn launch(&self, main_unit: &str) -> LoaderResult<()> {
        info!("launching {main_unit}");
        let unit = self
            .target_resolver
            .resolve(main_unit)
            .map_err(|e| LoaderError::Critical(format!("failed to launch '{main_unit}': {e}")))?;

        self.run_entrypoints()?;
        self.entrypoint_handler.invoke_static(&unit, "main")
    }

    /// Invoke every currently-safe entrypoint of every loaded pack.
    pub fn run_entrypoints(&self) -> LoaderResult<()> {
        for pack in &self.packs {
            for entrypoint in pack.entrypoints() {
                if entrypoint.is_safe_to_load(self) {
                    entrypoint.invoke(self)?;
                }
            }
        }
        Ok(())
    }

    fn set_packs(&mut self, packs: Vec<Pack>) {
        self.packs = packs;
        self.packs_by_id = self
            .packs
            .iter()
            .enumerate()
            .map(|(index, pack)| (pack.id().to_string(), index))
            .collect();
    }

    /// Collect the weave configuration resources whose owner is loaded.
    fn collect_weave_configs(&mut self) {
        let mut configs = Vec::new();
        for pack in &self.packs {
            for (owner, resources) in &pack.descriptor().weaves {
                if owner == &self.host_id || self.packs_by_id.contains_key(owner) {
                    configs.extend(resources.iter().cloned());
                }
            }
        }
        debug!("{} weave configurations active", configs.len());
        self.weave_configs = configs;
    }

    fn install_defaults(&mut self, report: &mut ProblemReport) {
        if let Some(dir) = self.host_units.clone() {
            if !dir.is_dir() {
                warn!("host units directory {} does not exist", dir.display());
            }
            if let Err(e) = self.install_source(Arc::new(PackStore::Dir(dir))) {
                report.record("defaults", Problem::new(e).critical());
            }
        }

        let installed = [
            self.install_transformer(Box::new(EnvStripper::new(self.environment))),
            self.install_transformer(Box::new(CoLoadInjector::new(self.co_load_registry()))),
        ];
        for outcome in installed {
            if let Err(e) = outcome {
                report.record("defaults", Problem::new(e).critical());
            }
        }

        if let Some(export) = self.export.clone() {
            info!(
                "exporting units matching '{}' to {}",
                export.filter,
                export.dir.display()
            );
            let exporter = UnitExporter::new(&export.filter, export.dir);
            if let Err(e) = self.install_post_transformer(Box::new(exporter)) {
                report.record("defaults", Problem::new(e).critical());
            }
        }
    }

    fn assemble_resolvers(&mut self, report: &mut ProblemReport) {
        for source in self.default_sources.clone() {
            self.target_resolver.add_source(source);
        }
        for pack in &self.packs {
            self.target_resolver.add_source(Arc::clone(pack.store()) as Arc<dyn UnitSource>);
        }

        let sealed = std::mem::take(&mut self.transformers);
        // The placeholder left behind stays closed for good.
        self.transformers.seal();

        if let Err(e) = self.target_resolver.install_transformers(Arc::new(sealed)) {
            report.record("assembly", Problem::new(e).critical());
        }

        debug!(
            "assembled target resolver with {} sources",
            self.target_resolver.source_count()
        );
    }
}

/// Installs the host unit source and the built-in transformers.
pub struct InstallDefaultsPhase;

impl Phase for InstallDefaultsPhase {
    type Output = ();

    fn name(&self) -> &'static str {
        "InstallDefaults"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) {
        loader.install_defaults(report);
    }
}

/// Hands the default sources, every pack's store and the sealed transformer
/// set to the target resolver.
pub struct AssembleResolversPhase;

impl Phase for AssembleResolversPhase {
    type Output = ();

    fn name(&self) -> &'static str {
        "AssembleResolvers"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) {
        loader.assemble_resolvers(report);
    }
}
