//! Pack discovery: recursive resolution of pack roots and their inclusion
//! trees.
//!
//! Discovery walks every configured packs directory breadth-first over
//! ownership depth. Each immediate child of a root becomes a candidate pack
//! file; each candidate's `inclusions/` directory yields further candidates
//! owned by it. A candidate only joins the result once its own inclusions
//! resolved; a failure inside a candidate's inclusion list excludes that
//! candidate (and with it, its whole subtree) without touching siblings.

use crate::error::{LoaderError, Problem};
use crate::loader::Loader;
use crate::phase::{Phase, ProblemReport};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use trellis_unit::{PackStore, StoreChild};

/// Name of the nested-packs directory inside a pack root.
pub const INCLUSIONS_DIR: &str = "inclusions";

/// Index of a discovered pack file in the [`PackFiles`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackFileId(usize);

/// One discovered pack root.
#[derive(Debug)]
pub struct PackFileRecord {
    path: String,
    store: Arc<PackStore>,
    owner: Option<PackFileId>,
    container: PackFileId,
}

impl PackFileRecord {
    /// Display path of this pack file, used for problem attribution.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> &Arc<PackStore> {
        &self.store
    }

    /// The pack file that directly includes this one.
    pub fn owner(&self) -> Option<PackFileId> {
        self.owner
    }

    /// The outermost pack file physically holding this one.
    pub fn container(&self) -> PackFileId {
        self.container
    }
}

/// Arena of discovered pack files. Ownership forms a forest expressed with
/// integer ids and parent links; the container is computed at insertion by
/// walking owners.
#[derive(Debug, Default)]
pub struct PackFiles {
    records: Vec<PackFileRecord>,
}

impl PackFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        path: String,
        store: Arc<PackStore>,
        owner: Option<PackFileId>,
    ) -> PackFileId {
        let id = PackFileId(self.records.len());
        let container = match owner {
            Some(mut ancestor) => {
                while let Some(above) = self.records[ancestor.0].owner {
                    ancestor = above;
                }
                ancestor
            }
            None => id,
        };
        self.records.push(PackFileRecord {
            path,
            store,
            owner,
            container,
        });
        id
    }

    pub fn get(&self, id: PackFileId) -> &PackFileRecord {
        &self.records[id.0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The per-user packs directory (`<data_dir>/trellis/packs`), searched in
/// addition to the configured roots.
pub fn user_packs_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "trellis-works", "trellis")
        .map(|dirs| dirs.data_dir().join("packs"))
}

/// Finds every pack reachable from the loader's pack roots.
pub struct PackDiscoveryPhase;

impl Phase for PackDiscoveryPhase {
    type Output = Vec<PackFileId>;

    fn name(&self) -> &'static str {
        "PackDiscovery"
    }

    fn run(self, loader: &mut Loader, report: &mut ProblemReport) -> Vec<PackFileId> {
        let roots = loader.pack_roots().to_vec();
        let mut discovery = Discovery {
            files: loader.pack_files_mut(),
            report,
            pending: VecDeque::new(),
            accepted: Vec::new(),
            seen: HashSet::new(),
        };

        for root in &roots {
            discovery.seed_root(root);
        }

        while let Some(id) = discovery.pending.pop_front() {
            discovery.resolve_inclusions(id);
        }

        info!("discovered {} pack files", discovery.accepted.len());
        discovery.accepted
    }
}

struct Discovery<'a> {
    files: &'a mut PackFiles,
    report: &'a mut ProblemReport,
    pending: VecDeque<PackFileId>,
    accepted: Vec<PackFileId>,
    seen: HashSet<String>,
}

impl Discovery<'_> {
    /// Enqueue every immediate child of a packs root. A missing root is
    /// fine; a child that fails to open is recorded against its own path
    /// and dropped.
    fn seed_root(&mut self, root: &std::path::Path) {
        if !root.exists() {
            debug!("packs root {} does not exist", root.display());
            return;
        }

        let store = PackStore::Dir(root.to_path_buf());
        let children = match store.list_children("") {
            Ok(children) => children,
            Err(e) => {
                self.report.record(
                    root.display().to_string(),
                    Problem::new(e.into()).critical().subject(root.display().to_string()),
                );
                return;
            }
        };

        for child in children {
            match self.construct(&store, "", &child, None) {
                Ok(Some(id)) => self.pending.push_back(id),
                Ok(None) => {}
                Err(problem) => {
                    let path = child_display(&store, "", &child);
                    self.report.record(path.clone(), problem.subject(path));
                }
            }
        }
    }

    /// Resolve a candidate's inclusions; only then does it join the result.
    /// Any failure among its inclusions is attributed to the candidate
    /// itself and excludes it.
    fn resolve_inclusions(&mut self, id: PackFileId) {
        match self.discover_children(id) {
            Ok(()) => self.accepted.push(id),
            Err(problem) => {
                let path = self.files.get(id).path().to_string();
                self.report.record(path.clone(), problem.subject(path));
            }
        }
    }

    fn discover_children(&mut self, owner: PackFileId) -> Result<(), Problem> {
        let store = Arc::clone(self.files.get(owner).store());
        let children = store
            .list_children(INCLUSIONS_DIR)
            .map_err(|e| Problem::new(e.into()))?;

        for child in children {
            match self.construct(&store, INCLUSIONS_DIR, &child, Some(owner)) {
                Ok(Some(id)) => self.pending.push_back(id),
                Ok(None) => {}
                Err(problem) => return Err(problem),
            }
        }

        Ok(())
    }

    /// Open one candidate child as a pack file. Duplicate physical paths are
    /// skipped; an unopenable child is an unrecoverable problem for whoever
    /// owns it.
    fn construct(
        &mut self,
        parent: &PackStore,
        rel: &str,
        child: &StoreChild,
        owner: Option<PackFileId>,
    ) -> Result<Option<PackFileId>, Problem> {
        let (display_path, store) = parent
            .open_child(rel, child)
            .map_err(|e| Problem::new(LoaderError::from(e)).critical())?;

        if !self.seen.insert(display_path.clone()) {
            debug!("skipping already-discovered pack file {}", display_path);
            return Ok(None);
        }

        debug!("discovered pack file {}", display_path);
        Ok(Some(self.files.insert(display_path, Arc::new(store), owner)))
    }
}

fn child_display(parent: &PackStore, rel: &str, child: &StoreChild) -> String {
    match parent {
        PackStore::Dir(base) => base.join(rel).join(&child.name).display().to_string(),
        PackStore::Bundle { .. } => format!("{}/{}", parent.display(), child.name),
    }
}
