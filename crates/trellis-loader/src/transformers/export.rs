//! Debug unit export.
//!
//! A post-definition transformer that mirrors resolved units into an export
//! directory, gated on a comma-separated dotted-name prefix filter. The
//! export is a pure side channel: write failures are logged and the unit
//! passes through untouched either way.

use crate::transform::Transformer;
use std::path::PathBuf;
use tracing::warn;
use trellis_unit::unit_path;

/// Writes resolved units matching a prefix filter to an export directory.
pub struct UnitExporter {
    prefixes: Vec<String>,
    dir: PathBuf,
}

impl UnitExporter {
    /// `filter` is a comma-separated list of dotted-name prefixes.
    pub fn new(filter: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            prefixes: filter
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            dir: dir.into(),
        }
    }
}

impl Transformer for UnitExporter {
    fn name(&self) -> &str {
        "unit-exporter"
    }

    fn can_transform(&self, unit_name: &str) -> bool {
        self.prefixes.iter().any(|p| unit_name.starts_with(p.as_str()))
    }

    fn transform(&self, unit_name: &str, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let path = self.dir.join(unit_path(unit_name));
        let written = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &bytes)
        })();

        if let Err(e) = written {
            warn!("failed to export unit {unit_name} to {}: {e}", path.display());
        }

        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_matches_prefixes() {
        let exporter = UnitExporter::new("acme.widgets, acme.core", "/tmp/unused");
        assert!(exporter.can_transform("acme.widgets.Button"));
        assert!(exporter.can_transform("acme.core.Boot"));
        assert!(!exporter.can_transform("other.Thing"));
    }

    #[test]
    fn test_export_writes_mirrored_path_and_passes_through() {
        let temp = TempDir::new().unwrap();
        let exporter = UnitExporter::new("acme", temp.path());

        let out = exporter
            .transform("acme.widgets.Button", b"payload".to_vec())
            .unwrap();
        assert_eq!(out, b"payload");

        let exported = temp.path().join("acme/widgets/Button.tcu");
        assert_eq!(std::fs::read(exported).unwrap(), b"payload");
    }

    #[test]
    fn test_write_failure_never_propagates() {
        let temp = TempDir::new().unwrap();
        // A file where the export directory should be makes every write fail.
        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();

        let exporter = UnitExporter::new("acme", &blocker);
        let out = exporter.transform("acme.X", b"payload".to_vec());
        assert_eq!(out.unwrap(), b"payload");
    }
}
