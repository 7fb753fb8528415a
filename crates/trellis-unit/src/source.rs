//! Unit sources: the capability to locate named resources and load raw unit
//! bytes across a storage backend.

use crate::bundle::Bundle;
use crate::error::{UnitError, UnitResult};
use crate::unit::unit_path;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A resolved location of a resource within some source.
#[derive(Debug, Clone)]
pub enum Location {
    /// A plain file on disk.
    File(PathBuf),

    /// An entry inside a bundle archive.
    Bundled { bundle: Arc<Bundle>, entry: String },
}

impl Location {
    /// Read the located resource.
    pub fn read(&self) -> UnitResult<Vec<u8>> {
        match self {
            Location::File(path) => Ok(std::fs::read(path)?),
            Location::Bundled { bundle, entry } => bundle
                .read(entry)
                .ok_or_else(|| UnitError::NotFound(entry.clone())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Bundled { bundle, entry } => {
                write!(f, "{}!/{}", bundle.path().display(), entry)
            }
        }
    }
}

/// The capability to locate named resources across a storage backend.
///
/// Implementations return every match for a resource path in their own
/// internal order. Composition across sources is the resolvers' concern:
/// resource lookup is first-match in consulted-source order, while unit byte
/// lookup in the layered hierarchy keeps the last successful source.
pub trait UnitSource: Send + Sync {
    /// All locations providing `path`, in source-internal order.
    fn locate(&self, path: &str) -> Vec<Location>;

    /// Load the raw bytes of the unit `name` (dotted form), taking the first
    /// located match. Fails with [`UnitError::NotFound`] when no match exists
    /// or the match cannot be read.
    fn load_unit(&self, name: &str) -> UnitResult<Vec<u8>> {
        let path = unit_path(name);
        let located = self.locate(&path);
        let location = located
            .first()
            .ok_or_else(|| UnitError::NotFound(name.to_string()))?;
        location
            .read()
            .map_err(|_| UnitError::NotFound(name.to_string()))
    }
}
