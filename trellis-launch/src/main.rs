//! # trellis-launch
//!
//! The bootstrap binary: loads the launcher configuration, runs the loader
//! pipeline and launches the host program's main unit.
//!
//! ```bash
//! # Launch with the default configuration
//! trellis-launch
//!
//! # Server side, extra packs directory, debug logging
//! RUST_LOG=debug trellis-launch --env server --packs ./dev-packs
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trellis_loader::{Environment, Loader, LoaderConfig};

#[derive(Debug, Parser)]
#[command(name = "trellis-launch", version, about = "Boot the Trellis loader and launch the host program")]
struct Args {
    /// Path to the launcher configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Active environment.
    #[arg(long, value_enum, default_value_t = EnvArg::Client)]
    env: EnvArg,

    /// Additional packs directories, searched after the configured roots.
    #[arg(long = "packs")]
    packs: Vec<PathBuf>,

    /// Override the host main unit from the configuration.
    #[arg(long)]
    launch: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EnvArg {
    Client,
    Server,
}

impl From<EnvArg> for Environment {
    fn from(arg: EnvArg) -> Self {
        match arg {
            EnvArg::Client => Environment::Client,
            EnvArg::Server => Environment::Server,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LoaderConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => match LoaderConfig::load_default() {
            Ok(config) => config,
            Err(e) => {
                info!("failed to load configuration, using defaults: {e}");
                LoaderConfig::default()
            }
        },
    };

    let mut loader = Loader::from_config(&config, args.env.into());
    for root in &args.packs {
        loader.add_pack_root(root.clone());
    }

    loader.bootstrap().context("bootstrap failed")?;

    let main_unit = args.launch.as_deref().unwrap_or(&config.host.main);
    loader
        .launch(main_unit)
        .with_context(|| format!("failed to launch {main_unit}"))?;

    Ok(())
}
