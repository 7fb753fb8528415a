//! Launcher configuration loading.
//!
//! The launcher reads its configuration from
//! `$XDG_CONFIG_HOME/trellis/config.toml`. If the file doesn't exist, a
//! default configuration with documented comments is written first.

use crate::error::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main launcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Host program configuration.
    pub host: HostConfig,

    /// Pack discovery configuration.
    #[serde(default)]
    pub packs: PacksConfig,

    /// Debug side channels.
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Host program configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Pack id reserved for the host program itself.
    pub id: String,

    /// Directory holding the host program's compiled units.
    pub units: PathBuf,

    /// Qualified name of the host main unit.
    pub main: String,
}

/// Pack discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacksConfig {
    /// Packs directories searched for pack roots.
    /// Default: `["packs"]`
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Whether the per-user packs directory is searched too.
    /// Default: true
    #[serde(default = "default_true")]
    pub include_user_dir: bool,
}

/// Debug side channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugConfig {
    /// Comma-separated dotted-name prefixes; resolved units matching one are
    /// mirrored into the export directory.
    #[serde(default)]
    pub export_units: Option<String>,

    /// Where exported units land.
    /// Default: `.trellis/debug/units`
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("packs")]
}

fn default_true() -> bool {
    true
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".trellis/debug/units")
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            packs: PacksConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            id: "host".to_string(),
            units: PathBuf::from("host/units"),
            main: "host.Main".to_string(),
        }
    }
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            include_user_dir: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            export_units: None,
            export_dir: default_export_dir(),
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let config: LoaderConfig = toml::from_str(&content).map_err(|e| {
            LoaderError::validation("<config>", format!("{}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, writing a documented default file
    /// first if none exists.
    pub fn load_default() -> LoaderResult<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// The default configuration file path
    /// (`$XDG_CONFIG_HOME/trellis/config.toml`).
    pub fn default_config_path() -> LoaderResult<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "trellis-works", "trellis").ok_or_else(
            || LoaderError::usage("failed to determine the configuration directory"),
        )?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> LoaderResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::default_config_content())?;
        tracing::info!("created default configuration at {}", path.display());
        Ok(())
    }

    fn default_config_content() -> String {
        r#"# Trellis launcher configuration.

[host]
# Pack id reserved for the host program itself. Weave bindings declared
# without an owner attach to this id.
id = "host"

# Directory holding the host program's compiled units.
units = "host/units"

# Qualified name of the host main unit.
main = "host.Main"

[packs]
# Packs directories searched for pack roots (directories or .tpk bundles).
roots = ["packs"]

# Also search the per-user packs directory under the platform data dir.
include_user_dir = true

[debug]
# Mirror resolved units whose dotted name starts with one of these
# comma-separated prefixes into the export directory.
# export_units = "host.,acme."

# Where exported units land.
export_dir = ".trellis/debug/units"
"#
        .to_string()
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> LoaderResult<()> {
        if self.host.id.is_empty() {
            return Err(LoaderError::validation("host.id", "cannot be empty"));
        }
        if self.host.main.is_empty() {
            return Err(LoaderError::validation("host.main", "cannot be empty"));
        }
        if self.packs.roots.is_empty() {
            return Err(LoaderError::validation("packs.roots", "cannot be empty"));
        }
        if let Some(filter) = &self.debug.export_units {
            if filter.split(',').all(|p| p.trim().is_empty()) {
                return Err(LoaderError::validation(
                    "debug.export_units",
                    "filter lists no prefixes",
                ));
            }
        }
        Ok(())
    }
}
