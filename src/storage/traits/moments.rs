//! Moment source trait.

use crate::Result;
use crate::models::{DateRange, Moment, MomentId, MomentUpdate, NewMoment, UserId};
use async_trait::async_trait;

/// Trait for the moment relation.
///
/// Journal listings are scoped to an owner and ordered by moment date,
/// newest first. `list_by_authors` backs the following feed and is ordered by
/// creation time, newest first, with the author profile joined.
#[async_trait]
pub trait MomentSource: Send + Sync {
    /// Lists every moment of `owner`.
    async fn list_all(&self, owner: &UserId) -> Result<Vec<Moment>>;

    /// Lists moments of `owner` dated within `range`.
    async fn list_by_date_range(&self, owner: &UserId, range: DateRange) -> Result<Vec<Moment>>;

    /// Lists moments of `owner` sharing at least one tag with `tags`.
    async fn list_by_tags(&self, owner: &UserId, tags: &[String]) -> Result<Vec<Moment>>;

    /// Lists moments written by any of `authors`.
    async fn list_by_authors(&self, authors: &[UserId]) -> Result<Vec<Moment>>;

    /// Fetches one moment.
    async fn get(&self, id: &MomentId) -> Result<Option<Moment>>;

    /// Inserts a moment authored by `author` and returns the stored row.
    async fn create(&self, author: &UserId, request: &NewMoment) -> Result<Moment>;

    /// Applies `update` to a moment.
    ///
    /// Fails with [`crate::Error::NotFound`] for an unknown id.
    async fn update(&self, id: &MomentId, update: &MomentUpdate) -> Result<()>;

    /// Deletes a moment.
    ///
    /// Fails with [`crate::Error::NotFound`] for an unknown id.
    async fn delete(&self, id: &MomentId) -> Result<()>;

    /// Removes the image at `index` (and its storage token) from a moment.
    ///
    /// Fails with [`crate::Error::InvalidInput`] for an out-of-range index.
    async fn delete_image(&self, id: &MomentId, index: usize) -> Result<()>;
}
