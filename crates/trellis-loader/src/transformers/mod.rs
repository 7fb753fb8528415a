//! Built-in transformers installed during default installation.

pub mod co_load;
pub mod env_strip;
pub mod export;

pub use co_load::{CoLoadHook, CoLoadInjector, CoLoadRegistry, LOAD_WITH_MARKER};
pub use env_strip::{EnvStripper, CLIENT_ONLY_MARKER, SERVER_ONLY_MARKER};
pub use export::UnitExporter;
