//! Priority classes for admission requests.

use serde::{Deserialize, Serialize};

/// Closed, totally ordered set of request categories.
///
/// The derived `Ord` follows declaration order, so sorting ascending puts the
/// most urgent class first: `Emergency < Work < Health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    /// Critical need. Outranks any number of standard requests.
    #[serde(alias = "critical")]
    Emergency,
    /// Standard request, work-related (getting ready to leave, etc).
    Work,
    /// Standard request, health/hygiene routine.
    Health,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 3] = [Self::Emergency, Self::Work, Self::Health];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Work => "work",
            Self::Health => "health",
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
