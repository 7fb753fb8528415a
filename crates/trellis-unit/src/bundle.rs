//! Single-file pack archives.
//!
//! A bundle (`.tpk` file) packages a whole pack root into one file so packs
//! can be shipped as a single artifact. The format mirrors the unit format:
//! magic bytes followed by a JSON body.
//!
//! ```text
//! +----------------+
//! | Magic (4 bytes)|  "TPK\x01" (version 1)
//! +----------------+
//! | JSON body      |  { "format": 1, "entries": { "<path>": "<base64>" } }
//! +----------------+
//! ```
//!
//! Entry paths are `/`-separated and relative to the pack root. A bundle may
//! contain further bundles (e.g. under `inclusions/`); those open as child
//! bundles from their entry bytes.

use crate::error::{UnitError, UnitResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Magic bytes for bundle files.
pub const BUNDLE_MAGIC: &[u8; 4] = b"TPK\x01";

/// File extension for bundle files.
pub const BUNDLE_EXTENSION: &str = "tpk";

#[derive(Debug, Serialize, Deserialize)]
struct BundleBody {
    #[serde(default = "default_format")]
    format: u8,

    #[serde(default)]
    entries: BTreeMap<String, String>,
}

fn default_format() -> u8 {
    1
}

/// An opened bundle archive, fully decoded into memory.
#[derive(Debug)]
pub struct Bundle {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    /// Open a bundle file from disk.
    pub fn open(path: &Path) -> UnitResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(path.to_path_buf(), &bytes)
    }

    /// Parse a bundle from raw bytes. `path` is only used for display; it
    /// may name an entry inside another bundle (`outer.tpk!/inclusions/inner.tpk`).
    pub fn parse(path: PathBuf, bytes: &[u8]) -> UnitResult<Self> {
        if bytes.len() < BUNDLE_MAGIC.len() || &bytes[..BUNDLE_MAGIC.len()] != BUNDLE_MAGIC {
            return Err(UnitError::BadMagic);
        }

        let body: BundleBody = serde_json::from_slice(&bytes[BUNDLE_MAGIC.len()..])?;
        if body.format != 1 {
            return Err(UnitError::malformed(
                path.display().to_string(),
                format!("unsupported bundle format: {}", body.format),
            ));
        }

        let mut entries = BTreeMap::new();
        for (entry, data) in body.entries {
            let entry = normalize_entry(&path, entry)?;
            let data = BASE64.decode(data.as_bytes()).map_err(|e| {
                UnitError::malformed(path.display().to_string(), format!("entry '{entry}': {e}"))
            })?;
            entries.insert(entry, data);
        }

        Ok(Self { path, entries })
    }

    /// The path this bundle was opened from (display only).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the bytes of one entry.
    pub fn read(&self, entry: &str) -> Option<Vec<u8>> {
        self.entries.get(entry).cloned()
    }

    /// Whether an entry exists as a file.
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    /// Whether any entry lives under `prefix` (treated as a directory).
    pub fn is_dir(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        self.entries.keys().any(|k| k.starts_with(&dir))
    }

    /// Immediate children under `prefix`: `(name, is_dir)` pairs in sorted
    /// order. An empty prefix lists the bundle root.
    pub fn list_children(&self, prefix: &str) -> Vec<(String, bool)> {
        let dir = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };

        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for key in self.entries.keys() {
            let Some(rest) = key.strip_prefix(&dir) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((name, _)) => {
                    children.insert(name.to_string(), true);
                }
                None => {
                    children.entry(rest.to_string()).or_insert(false);
                }
            }
        }

        children.into_iter().collect()
    }

    /// All entry paths, in sorted order.
    pub fn entry_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn normalize_entry(bundle: &Path, entry: String) -> UnitResult<String> {
    let entry = entry.trim_start_matches('/').to_string();
    if entry.is_empty() || entry.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(UnitError::malformed(
            bundle.display().to_string(),
            format!("invalid entry path '{entry}'"),
        ));
    }
    Ok(entry)
}

/// Builds bundle files, mainly for packaging tools and tests.
#[derive(Debug, Default)]
pub struct BundleBuilder {
    entries: BTreeMap<String, String>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry.
    pub fn entry(mut self, path: &str, bytes: &[u8]) -> Self {
        self.entries
            .insert(path.trim_start_matches('/').to_string(), BASE64.encode(bytes));
        self
    }

    /// Serialize to the bundle binary form.
    pub fn encode(self) -> UnitResult<Vec<u8>> {
        let body = BundleBody {
            format: 1,
            entries: self.entries,
        };
        let mut out = BUNDLE_MAGIC.to_vec();
        out.extend(serde_json::to_vec(&body)?);
        Ok(out)
    }

    /// Write the bundle to a file.
    pub fn write_to(self, path: &Path) -> UnitResult<()> {
        let bytes = self.encode()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
