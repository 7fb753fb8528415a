//! Pack loading: descriptor resolution over discovered pack files.

use crate::descriptor::PackDescriptor;
use crate::discovery::PackFileId;
use crate::error::{LoaderError, LoaderResult, Problem};
use crate::loader::Loader;
use crate::pack::Pack;
use crate::phase::{Phase, ProblemReport};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use trellis_unit::{Location, PackStore};

/// Resource name of pack descriptors.
pub const PACK_DESCRIPTOR: &str = "trellis.pack.json";

/// Loads a pack from every discovered file carrying a descriptor, plus any
/// descriptors served by the default sources (host or plugin-provided
/// packs). Pack ids are unique across the run; the host id is implicitly
/// taken.
pub struct PackLoadingPhase {
    files: Vec<PackFileId>,
}

impl PackLoadingPhase {
    pub fn new(files: Vec<PackFileId>) -> Self {
        Self { files }
    }
}

impl Phase for PackLoadingPhase {
    type Output = Vec<Pack>;

    fn name(&self) -> &'static str {
        "PackLoading"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) -> Vec<Pack> {
        let environment = loader.environment();
        let host_id = loader.host_id().to_string();

        let mut used_ids = HashSet::new();
        used_ids.insert(host_id.clone());

        let mut packs = Vec::new();

        for id in &self.files {
            let record = loader.pack_files().get(*id);
            let store = Arc::clone(record.store());
            let path = record.path().to_string();

            if !store.is_file(PACK_DESCRIPTOR) {
                debug!("pack file {path} carries no descriptor, skipping");
                continue;
            }

            let parsed = store
                .read(PACK_DESCRIPTOR)
                .map_err(LoaderError::from)
                .and_then(|bytes| PackDescriptor::parse(&bytes, &host_id));

            add_pack(
                parsed,
                store,
                path,
                environment,
                &mut used_ids,
                &mut packs,
                report,
            );
        }

        // Default sources may carry pack descriptors of their own, e.g. the
        // host program's built-in pack.
        for source in loader.default_sources() {
            for location in source.locate(PACK_DESCRIPTOR) {
                let display = location.to_string();
                let Some((root, store)) = descriptor_root(&location) else {
                    report.record(
                        display.clone(),
                        Problem::new(LoaderError::validation(
                            "<root>",
                            "descriptor location has no resolvable pack root",
                        ))
                        .critical()
                        .subject(display),
                    );
                    continue;
                };

                let parsed = location
                    .read()
                    .map_err(LoaderError::from)
                    .and_then(|bytes| PackDescriptor::parse(&bytes, &host_id));

                add_pack(
                    parsed,
                    Arc::new(store),
                    root,
                    environment,
                    &mut used_ids,
                    &mut packs,
                    report,
                );
            }
        }

        info!("loaded {} packs", packs.len());
        packs
    }
}

fn add_pack(
    parsed: LoaderResult<PackDescriptor>,
    store: Arc<PackStore>,
    path: String,
    environment: crate::environment::Environment,
    used_ids: &mut HashSet<String>,
    packs: &mut Vec<Pack>,
    report: &mut ProblemReport,
) {
    match parsed {
        Ok(descriptor) => {
            if used_ids.contains(&descriptor.id) {
                report.record(
                    path.clone(),
                    Problem::new(LoaderError::DuplicateId {
                        kind: "pack",
                        id: descriptor.id.clone(),
                    })
                    .critical()
                    .subject(path),
                );
                return;
            }
            used_ids.insert(descriptor.id.clone());

            if descriptor.can_load_in(environment) {
                debug!("loaded pack '{}' from {path}", descriptor.id);
                packs.push(Pack::new(descriptor, store, path));
            } else {
                debug!(
                    "pack '{}' skipped: not loadable in environment {environment}",
                    descriptor.id
                );
            }
        }
        Err(e) => {
            report.record(path.clone(), Problem::new(e).critical().subject(path));
        }
    }
}

/// Derive the pack root enclosing a located descriptor.
fn descriptor_root(location: &Location) -> Option<(String, PackStore)> {
    match location {
        Location::File(path) => {
            let root = path.parent()?;
            Some((
                root.display().to_string(),
                PackStore::Dir(root.to_path_buf()),
            ))
        }
        Location::Bundled { bundle, entry } => {
            let prefix = match entry.rsplit_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => String::new(),
            };
            let store = PackStore::Bundle {
                bundle: Arc::clone(bundle),
                prefix,
            };
            Some((store.display(), store))
        }
    }
}
