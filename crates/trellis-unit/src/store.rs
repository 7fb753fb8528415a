//! Pack stores: uniform file access over a pack root.
//!
//! A pack root is either a plain directory or a `.tpk` bundle; a store hides
//! the difference behind one set of operations so discovery, loading and
//! scanning never branch on the physical form. A store can also view a
//! subtree of a bundle (a nested pack living under `inclusions/` of an
//! enclosing bundle).

use crate::bundle::Bundle;
use crate::error::{UnitError, UnitResult};
use crate::source::{Location, UnitSource};
use crate::unit::UNIT_EXTENSION;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An immediate child of a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChild {
    pub name: String,
    pub dir: bool,
}

/// Uniform file access over a pack root.
#[derive(Debug, Clone)]
pub enum PackStore {
    /// A directory tree on disk.
    Dir(PathBuf),

    /// A subtree of a bundle archive. An empty prefix is the bundle root;
    /// otherwise the prefix ends with `/`.
    Bundle { bundle: Arc<Bundle>, prefix: String },
}

impl PackStore {
    /// Open a pack root: a directory as-is, anything else as a bundle file.
    pub fn open(path: &Path) -> UnitResult<Self> {
        if path.is_dir() {
            Ok(PackStore::Dir(path.to_path_buf()))
        } else {
            Ok(PackStore::Bundle {
                bundle: Arc::new(Bundle::open(path)?),
                prefix: String::new(),
            })
        }
    }

    /// Display form of this store's root.
    pub fn display(&self) -> String {
        match self {
            PackStore::Dir(path) => path.display().to_string(),
            PackStore::Bundle { bundle, prefix } => {
                if prefix.is_empty() {
                    bundle.path().display().to_string()
                } else {
                    format!("{}!/{}", bundle.path().display(), prefix.trim_end_matches('/'))
                }
            }
        }
    }

    fn bundle_entry(prefix: &str, rel: &str) -> String {
        let rel = rel.trim_matches('/');
        if prefix.is_empty() {
            rel.to_string()
        } else if rel.is_empty() {
            prefix.trim_end_matches('/').to_string()
        } else {
            format!("{prefix}{rel}")
        }
    }

    /// Whether `rel` exists as a file.
    pub fn is_file(&self, rel: &str) -> bool {
        match self {
            PackStore::Dir(base) => base.join(rel).is_file(),
            PackStore::Bundle { bundle, prefix } => bundle.contains(&Self::bundle_entry(prefix, rel)),
        }
    }

    /// Read the bytes of the file at `rel`.
    pub fn read(&self, rel: &str) -> UnitResult<Vec<u8>> {
        match self {
            PackStore::Dir(base) => Ok(std::fs::read(base.join(rel))?),
            PackStore::Bundle { bundle, prefix } => {
                let entry = Self::bundle_entry(prefix, rel);
                bundle.read(&entry).ok_or(UnitError::NotFound(entry))
            }
        }
    }

    /// Immediate children of the directory at `rel`, sorted by name. A
    /// missing directory yields an empty list, not an error.
    pub fn list_children(&self, rel: &str) -> UnitResult<Vec<StoreChild>> {
        match self {
            PackStore::Dir(base) => {
                let dir = base.join(rel);
                if !dir.exists() {
                    return Ok(Vec::new());
                }
                let mut children = Vec::new();
                for entry in std::fs::read_dir(&dir)? {
                    let entry = entry?;
                    children.push(StoreChild {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        dir: entry.path().is_dir(),
                    });
                }
                children.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(children)
            }
            PackStore::Bundle { bundle, prefix } => {
                let entry = Self::bundle_entry(prefix, rel);
                Ok(bundle
                    .list_children(&entry)
                    .into_iter()
                    .map(|(name, dir)| StoreChild { name, dir })
                    .collect())
            }
        }
    }

    /// Open a child of the directory at `rel` as its own pack store,
    /// returning the child's display path alongside it. Directory children
    /// become directory (or bundle-subtree) stores; file children must be
    /// bundles.
    pub fn open_child(&self, rel: &str, child: &StoreChild) -> UnitResult<(String, PackStore)> {
        match self {
            PackStore::Dir(base) => {
                let path = base.join(rel).join(&child.name);
                let display = path.display().to_string();
                let store = PackStore::open(&path)?;
                Ok((display, store))
            }
            PackStore::Bundle { bundle, prefix } => {
                let parent = Self::bundle_entry(prefix, rel);
                let entry = if parent.is_empty() {
                    child.name.clone()
                } else {
                    format!("{parent}/{}", child.name)
                };
                let display = format!("{}!/{}", bundle.path().display(), entry);
                if child.dir {
                    Ok((
                        display,
                        PackStore::Bundle {
                            bundle: Arc::clone(bundle),
                            prefix: format!("{entry}/"),
                        },
                    ))
                } else {
                    let bytes = bundle
                        .read(&entry)
                        .ok_or_else(|| UnitError::NotFound(entry.clone()))?;
                    let nested = Bundle::parse(PathBuf::from(&display), &bytes)?;
                    Ok((
                        display,
                        PackStore::Bundle {
                            bundle: Arc::new(nested),
                            prefix: String::new(),
                        },
                    ))
                }
            }
        }
    }

    /// Relative paths of every compiled unit under this root, in sorted
    /// traversal order.
    pub fn unit_paths(&self) -> UnitResult<Vec<String>> {
        match self {
            PackStore::Dir(base) => {
                let mut paths = Vec::new();
                collect_units(base, base, &mut paths)?;
                paths.sort();
                Ok(paths)
            }
            PackStore::Bundle { bundle, prefix } => Ok(bundle
                .entry_paths()
                .filter_map(|entry| entry.strip_prefix(prefix.as_str()))
                .filter(|rel| rel.ends_with(&format!(".{UNIT_EXTENSION}")))
                .map(str::to_string)
                .collect()),
        }
    }
}

fn collect_units(root: &Path, dir: &Path, out: &mut Vec<String>) -> UnitResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_units(root, &path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(UNIT_EXTENSION) {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(rel);
        }
    }
    Ok(())
}

impl UnitSource for PackStore {
    fn locate(&self, path: &str) -> Vec<Location> {
        match self {
            PackStore::Dir(base) => {
                let full = base.join(path);
                if full.is_file() {
                    vec![Location::File(full)]
                } else {
                    Vec::new()
                }
            }
            PackStore::Bundle { bundle, prefix } => {
                let entry = Self::bundle_entry(prefix, path);
                if bundle.contains(&entry) {
                    vec![Location::Bundled {
                        bundle: Arc::clone(bundle),
                        entry,
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    }
}
