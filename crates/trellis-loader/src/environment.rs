//! The environments a host program can run as.

use std::fmt;

/// Which side of the host program is active. Packs, units and members can be
/// constrained to one environment and are skipped or stripped in the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Client,
    Server,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Client => "client",
            Environment::Server => "server",
        }
    }

    /// Parse an environment name; anything but `client` or `server` is
    /// rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Environment::Client),
            "server" => Some(Environment::Server),
            _ => None,
        }
    }

    /// The opposite environment.
    pub fn other(&self) -> Environment {
        match self {
            Environment::Client => Environment::Server,
            Environment::Server => Environment::Client,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
