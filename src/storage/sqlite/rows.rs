//! Row conversion utilities for the `SQLite` social store.
//!
//! Timestamps are stored as microseconds since the epoch, dates as
//! `YYYY-MM-DD` text and string lists as JSON arrays.

use crate::models::{
    Comment, CommentId, EngagementCounters, Like, Moment, MomentId, Profile, ProfileSummary,
    Repost, RepostId, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

/// Columns selected by [`moment_from_row`], author profile joined as `p`.
pub const MOMENT_COLUMNS: &str = "m.id, m.user_id, m.title, m.content, m.date, m.images, \
     m.image_tokens, m.tags, m.like_count, m.comment_count, m.repost_count, m.created_at, \
     m.updated_at, p.id, p.username, p.avatar_url, p.follower_count, p.following_count";

/// `FROM` clause matching [`MOMENT_COLUMNS`].
pub const MOMENT_FROM: &str = "FROM moments m LEFT JOIN profiles p ON p.id = m.user_id";

/// Columns selected by [`profile_from_row`].
pub const PROFILE_COLUMNS: &str =
    "id, username, avatar_url, follower_count, following_count, created_at, updated_at";

/// Date format of the `moments.date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Converts a timestamp to its stored form.
#[must_use]
pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Converts a non-negative stored counter to `u64`.
fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn string_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Encodes a string list for storage.
#[must_use]
pub fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Builds a [`Moment`] from a row selected with [`MOMENT_COLUMNS`].
pub fn moment_from_row(row: &Row<'_>) -> rusqlite::Result<Moment> {
    let author_id: Option<String> = row.get(13)?;
    let author = match author_id {
        Some(id) => Some(ProfileSummary {
            id: UserId::new(id),
            username: row.get(14)?,
            avatar_url: row.get(15)?,
            follower_count: count(row, 16)?,
            following_count: count(row, 17)?,
        }),
        None => None,
    };

    Ok(Moment {
        id: MomentId::new(row.get::<_, String>(0)?),
        author_id: UserId::new(row.get::<_, String>(1)?),
        author,
        title: row.get(2)?,
        content: row.get(3)?,
        date: date(row, 4)?,
        images: string_list(row, 5)?,
        image_tokens: string_list(row, 6)?,
        tags: string_list(row, 7)?,
        counters: EngagementCounters {
            like_count: count(row, 8)?,
            comment_count: count(row, 9)?,
            repost_count: count(row, 10)?,
        },
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
    })
}

/// Builds a [`Profile`] from a row selected with [`PROFILE_COLUMNS`].
pub fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: UserId::new(row.get::<_, String>(0)?),
        username: row.get(1)?,
        avatar_url: row.get(2)?,
        follower_count: count(row, 3)?,
        following_count: count(row, 4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

/// Builds a [`Like`] from `user_id, moment_id, created_at`.
pub fn like_from_row(row: &Row<'_>) -> rusqlite::Result<Like> {
    Ok(Like {
        user_id: UserId::new(row.get::<_, String>(0)?),
        moment_id: MomentId::new(row.get::<_, String>(1)?),
        created_at: timestamp(row, 2)?,
    })
}

/// Builds a [`Comment`] from `id, user_id, moment_id, content, created_at`.
pub fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: CommentId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        moment_id: MomentId::new(row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

/// Builds a [`Repost`] from `id, user_id, moment_id, content, created_at`.
pub fn repost_from_row(row: &Row<'_>) -> rusqlite::Result<Repost> {
    Ok(Repost {
        id: RepostId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        moment_id: MomentId::new(row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}
