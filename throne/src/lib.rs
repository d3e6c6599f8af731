//! throne: priority admission queue for a single shared household resource.

mod error;
mod health;
mod id;
mod priority;
mod request;
mod slot;
mod version;

pub mod directory;
pub mod ledger;
pub mod queue;
pub mod ratings;
pub mod service;
pub mod supplies;
pub mod transport;

pub use directory::{Directory, DirectoryError, IdentityTag, InMemoryDirectory, Profile, User};
pub use error::{Classify, ErrorClass};
pub use health::Health;
pub use id::{RatingId, RequestId, SupplyId, UserId};
pub use ledger::{FileLedger, Ledger, LedgerEntry, LedgerError, LedgerEvent, TracingLedger};
pub use priority::PriorityClass;
pub use queue::{AdmissionError, AdmissionQueue, QueueConfig};
pub use ratings::{HygieneRating, HygieneRatings, RatingError};
pub use request::{Request, RequestStatus};
pub use service::{BathroomState, HealthSnapshot, HouseService};
pub use supplies::{Supplies, Supply, SupplyError};
pub use version::{THRONE_VERSION, VersionInfo};
