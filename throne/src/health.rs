//! Health status reported by the house service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Accepting requests
    #[default]
    Ready,
    /// Ready, but the resource is currently held
    Busy,
    /// Shutdown requested; draining connections
    Stopping,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Busy => "BUSY",
            Self::Stopping => "STOPPING",
        }
    }
}
