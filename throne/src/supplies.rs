//! Shared supplies and whose turn it is to buy them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::directory::{Directory, DirectoryError};
use crate::error::{Classify, ErrorClass};
use crate::id::{SupplyId, UserId};

pub const MAX_SUPPLY_NAME_LEN: usize = 64;
/// Number of supplies returned by `list`.
pub const LIST_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supply {
    pub id: SupplyId,
    pub name: String,
    pub last_bought_by_user_id: UserId,
    pub last_bought_by_name: String,
    pub last_bought_date: DateTime<Utc>,
    pub next_buyer_user_id: Option<UserId>,
    pub next_buyer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupplyError {
    #[error("Invalid supply name: {0}")]
    InvalidName(String),
    #[error("User not found: {0}")]
    UnknownUser(UserId),
    #[error("Utility item not found: {0}")]
    NotFound(SupplyId),
    #[error(transparent)]
    Directory(DirectoryError),
}

impl Classify for SupplyError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidName(_) => ErrorClass::Validation,
            Self::UnknownUser(_) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::Directory(e) => e.class(),
        }
    }
}

impl From<DirectoryError> for SupplyError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(id) => Self::UnknownUser(id),
            other => Self::Directory(other),
        }
    }
}

pub struct Supplies {
    directory: Arc<dyn Directory>,
    items: DashMap<SupplyId, Supply>,
    seq: AtomicU64,
}

impl Supplies {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            items: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Record a purchase.
    ///
    /// An unknown next buyer is kept by id with no name; only the last
    /// buyer is required to exist.
    pub async fn record(
        &self,
        name: &str,
        last_buyer: UserId,
        next_buyer: Option<UserId>,
    ) -> Result<Supply, SupplyError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_SUPPLY_NAME_LEN {
            return Err(SupplyError::InvalidName(format!(
                "name must be 1 to {MAX_SUPPLY_NAME_LEN} characters"
            )));
        }

        let buyer = self.directory.resolve(last_buyer).await?;
        let next_buyer_name = match next_buyer {
            Some(id) => match self.directory.resolve(id).await {
                Ok(profile) => Some(profile.display_name),
                Err(DirectoryError::NotFound(_)) => {
                    tracing::debug!(next_buyer = %id, "Next buyer not in directory; storing id only");
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let now = Utc::now();
        let supply = Supply {
            id: SupplyId::new(),
            name: name.to_string(),
            last_bought_by_user_id: last_buyer,
            last_bought_by_name: buyer.display_name,
            last_bought_date: now,
            next_buyer_user_id: next_buyer,
            next_buyer_name,
            created_at: now,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.items.insert(supply.id, supply.clone());

        tracing::info!(supply_id = %supply.id, name = %supply.name, %last_buyer, "Supply purchase recorded");
        Ok(supply)
    }

    /// Most recently recorded supplies first.
    pub fn list(&self) -> Vec<Supply> {
        let mut all: Vec<Supply> = self.items.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        all.truncate(LIST_CAP);
        all
    }

    pub async fn assign_next_buyer(
        &self,
        supply_id: SupplyId,
        user_id: UserId,
    ) -> Result<Supply, SupplyError> {
        let profile = self.directory.resolve(user_id).await?;

        let mut supply = self
            .items
            .get_mut(&supply_id)
            .ok_or(SupplyError::NotFound(supply_id))?;
        supply.next_buyer_user_id = Some(user_id);
        supply.next_buyer_name = Some(profile.display_name);
        let updated = supply.clone();
        drop(supply);

        tracing::info!(%supply_id, next_buyer = %user_id, "Next buyer assigned");
        Ok(updated)
    }
}
