//! Moments and the requests that create or change them.

use super::{EngagementCounters, MomentId, ProfileSummary, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    /// Moment id.
    pub id: MomentId,
    /// Author of the moment.
    pub author_id: UserId,
    /// Author profile, when the query joined it.
    #[serde(default)]
    pub author: Option<ProfileSummary>,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// The day the moment is about.
    pub date: NaiveDate,
    /// Public image URLs, in display order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Object-storage tokens, index-aligned with `images`.
    #[serde(default)]
    pub image_tokens: Vec<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Mirrored engagement counters.
    #[serde(default)]
    pub counters: EngagementCounters,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Moment {
    /// Returns `true` if any of the moment's tags is in `tags`.
    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// An image already uploaded to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    /// Public URL.
    pub url: String,
    /// Opaque token used to delete the object later.
    pub token: String,
}

/// Request to create a moment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMoment {
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// The day the moment is about.
    pub date: Option<NaiveDate>,
    /// Images uploaded ahead of the insert.
    pub images: Vec<UploadedImage>,
    /// Tags.
    pub tags: Vec<String>,
}

/// Request to change a moment. `None` fields are left untouched;
/// `images` are appended to the existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MomentUpdate {
    /// New title.
    pub title: Option<String>,
    /// New body text.
    pub content: Option<String>,
    /// New date.
    pub date: Option<NaiveDate>,
    /// Images uploaded ahead of the update.
    pub images: Vec<UploadedImage>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
}

impl MomentUpdate {
    /// Applies the update to `moment`, stamping `now` as the update time.
    pub fn apply_to(&self, moment: &mut Moment, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            moment.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            moment.content.clone_from(content);
        }
        if let Some(date) = self.date {
            moment.date = date;
        }
        if let Some(tags) = &self.tags {
            moment.tags.clone_from(tags);
        }
        for image in &self.images {
            moment.images.push(image.url.clone());
            moment.image_tokens.push(image.token.clone());
        }
        moment.updated_at = now;
    }
}
