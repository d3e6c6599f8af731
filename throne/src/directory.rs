//! User directory.
//!
//! The admission queue only ever asks two questions of the directory: who is
//! this user, and is this identity tag already taken. `Directory` is that
//! seam; `InMemoryDirectory` is the implementation the server ships with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::error::{Classify, ErrorClass};
use crate::id::UserId;

pub const MAX_NAME_LEN: usize = 64;

/// Visual identity marker. At most one user may hold each tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityTag {
    Red,
    Blue,
    Green,
    Yellow,
    Orange,
    Purple,
    Pink,
    Cyan,
}

impl IdentityTag {
    pub const ALL: [IdentityTag; 8] = [
        Self::Red,
        Self::Blue,
        Self::Green,
        Self::Yellow,
        Self::Orange,
        Self::Purple,
        Self::Pink,
        Self::Cyan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Purple => "purple",
            Self::Pink => "pink",
            Self::Cyan => "cyan",
        }
    }
}

impl std::fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(rename = "color")]
    pub tag: IdentityTag,
    pub created_at: DateTime<Utc>,
}

/// Display attributes resolved for a user at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    pub tag: IdentityTag,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    NotFound(UserId),
    #[error("Color already taken by another user: {0}")]
    TagTaken(IdentityTag),
    #[error("Invalid user name: {0}")]
    InvalidName(String),
}

impl Classify for DirectoryError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::TagTaken(_) => ErrorClass::Conflict,
            Self::InvalidName(_) => ErrorClass::Validation,
        }
    }
}

/// Read-only view of the user directory consumed by the queue and the
/// household record stores.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve(&self, id: UserId) -> Result<Profile, DirectoryError>;

    /// Only consulted when creating users.
    async fn is_tag_in_use(&self, tag: IdentityTag) -> bool;
}

/// Directory backed by two concurrent maps: users by id, and the tag claim
/// index that enforces tag uniqueness.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, User>,
    tags: DashMap<IdentityTag, UserId>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_user(&self, name: &str, tag: IdentityTag) -> Result<User, DirectoryError> {
        let name = validate_name(name)?;

        // The vacant entry holds the tag's shard lock until the claim is
        // written, so two racing creates cannot both take the same tag.
        match self.tags.entry(tag) {
            Entry::Occupied(_) => {
                tracing::warn!(%tag, "Rejected user: tag already in use");
                Err(DirectoryError::TagTaken(tag))
            }
            Entry::Vacant(claim) => {
                let user = User {
                    id: UserId::new(),
                    name,
                    tag,
                    created_at: Utc::now(),
                };
                self.users.insert(user.id, user.clone());
                claim.insert(user.id);
                tracing::info!(user_id = %user.id, %tag, "User created");
                Ok(user)
            }
        }
    }

    /// All users, oldest first.
    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        users
    }

    /// Remove a user and release their tag. Requests already captured keep
    /// their snapshot of the user's name and tag.
    pub fn delete_user(&self, id: UserId) -> Result<(), DirectoryError> {
        let (_, user) = self.users.remove(&id).ok_or(DirectoryError::NotFound(id))?;
        self.tags.remove_if(&user.tag, |_, owner| *owner == id);
        tracing::info!(user_id = %id, tag = %user.tag, "User deleted");
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn resolve(&self, id: UserId) -> Result<Profile, DirectoryError> {
        self.users
            .get(&id)
            .map(|u| Profile {
                display_name: u.name.clone(),
                tag: u.tag,
            })
            .ok_or(DirectoryError::NotFound(id))
    }

    async fn is_tag_in_use(&self, tag: IdentityTag) -> bool {
        self.tags.contains_key(&tag)
    }
}

fn validate_name(name: &str) -> Result<String, DirectoryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::InvalidName("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DirectoryError::InvalidName(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}
