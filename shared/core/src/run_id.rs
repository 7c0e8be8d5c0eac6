use std::fmt;

use serde::{Deserialize, Serialize};

/// Timestamp-derived name for one miner run. Doubles as the checkpoint
/// directory name, so it must stay filesystem-safe.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunIdentity(String);

impl RunIdentity {
    /// Mints a fresh identity from the local wall clock.
    pub fn mint() -> Self {
        Self(chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
