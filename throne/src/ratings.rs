//! Hygiene ratings left by housemates after a visit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::directory::{Directory, DirectoryError};
use crate::error::{Classify, ErrorClass};
use crate::id::{RatingId, UserId};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const MAX_COMMENT_LEN: usize = 500;
/// Number of ratings returned by `list`.
pub const LIST_CAP: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HygieneRating {
    pub id: RatingId,
    pub rated_by_user_id: UserId,
    pub rated_by_name: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatingError {
    #[error("Rating must be between 1 and 5, got {0}")]
    OutOfRange(i64),
    #[error("Comment must be at most 500 characters")]
    CommentTooLong,
    #[error("User not found: {0}")]
    UnknownRater(UserId),
    #[error(transparent)]
    Directory(DirectoryError),
}

impl Classify for RatingError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::OutOfRange(_) | Self::CommentTooLong => ErrorClass::Validation,
            Self::UnknownRater(_) => ErrorClass::NotFound,
            Self::Directory(e) => e.class(),
        }
    }
}

impl From<DirectoryError> for RatingError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(id) => Self::UnknownRater(id),
            other => Self::Directory(other),
        }
    }
}

pub struct HygieneRatings {
    directory: Arc<dyn Directory>,
    ratings: DashMap<RatingId, HygieneRating>,
    seq: AtomicU64,
}

impl HygieneRatings {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            ratings: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Record a rating. The rater's name is captured at submission.
    ///
    /// `rating` is taken wide so out-of-range input from the wire is
    /// reported as a validation failure rather than a decode error.
    pub async fn rate(
        &self,
        user_id: UserId,
        rating: i64,
        comment: Option<String>,
    ) -> Result<HygieneRating, RatingError> {
        let rating = u8::try_from(rating)
            .ok()
            .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
            .ok_or(RatingError::OutOfRange(rating))?;
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN)
        {
            return Err(RatingError::CommentTooLong);
        }

        let profile = self.directory.resolve(user_id).await?;
        let entry = HygieneRating {
            id: RatingId::new(),
            rated_by_user_id: user_id,
            rated_by_name: profile.display_name,
            rating,
            comment,
            created_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.ratings.insert(entry.id, entry.clone());

        tracing::info!(rating_id = %entry.id, %user_id, rating, "Hygiene rating recorded");
        Ok(entry)
    }

    pub fn latest(&self) -> Option<HygieneRating> {
        self.ratings
            .iter()
            .max_by_key(|e| (e.created_at, e.seq))
            .map(|e| e.value().clone())
    }

    /// Most recent ratings first.
    pub fn list(&self) -> Vec<HygieneRating> {
        let mut all: Vec<HygieneRating> = self.ratings.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        all.truncate(LIST_CAP);
        all
    }
}
