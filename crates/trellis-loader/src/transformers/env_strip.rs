//! Environment stripping.
//!
//! Units and members marked for the inactive environment never reach the
//! defined form: a marked unit rejects entirely (its resolution fails as
//! not-found), marked members are removed from the unit.

use crate::environment::Environment;
use crate::transform::Transformer;
use tracing::debug;
use trellis_unit::Unit;

/// Marker confining a unit or member to the client environment.
pub const CLIENT_ONLY_MARKER: &str = "trellis.api.ClientOnly";

/// Marker confining a unit or member to the server environment.
pub const SERVER_ONLY_MARKER: &str = "trellis.api.ServerOnly";

/// Strips elements belonging to the inactive environment.
pub struct EnvStripper {
    environment: Environment,
}

impl EnvStripper {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// The marker that makes an element foreign to the active environment.
    fn stripped_marker(&self) -> &'static str {
        match self.environment {
            Environment::Client => SERVER_ONLY_MARKER,
            Environment::Server => CLIENT_ONLY_MARKER,
        }
    }
}

impl Transformer for EnvStripper {
    fn name(&self) -> &str {
        "env-stripper"
    }

    fn can_transform(&self, _unit_name: &str) -> bool {
        true
    }

    fn transform(&self, unit_name: &str, bytes: Vec<u8>) -> Option<Vec<u8>> {
        let mut unit = Unit::parse(&bytes).ok()?;
        let marker = self.stripped_marker();

        if unit.markers.iter().any(|m| m.marker == marker) {
            debug!("stripping unit {unit_name} for environment {}", self.environment);
            return None;
        }

        unit.functions
            .retain(|f| !f.markers.iter().any(|m| m.marker == marker));
        unit.fields
            .retain(|f| !f.markers.iter().any(|m| m.marker == marker));

        unit.encode().ok()
    }
}
