//! `SQLite` social store.
//!
//! An embedded stand-in for the remote relational backend: follow graph,
//! profiles, moments, engagement relations and the atomic counter RPC, all
//! in one database file.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. Each trait call holds
//! the lock for the duration of its statements and never across an await.
//! Counter updates are single `UPDATE ... SET n = n + 1` statements, so they
//! are atomic without any read-modify-write in Rust.

use super::connection::{acquire_lock, open_connection, remote_error};
use super::metrics::record_operation_metrics;
use super::rows::{
    DATE_FORMAT, MOMENT_COLUMNS, MOMENT_FROM, PROFILE_COLUMNS, comment_from_row, encode_list,
    like_from_row, moment_from_row, profile_from_row, repost_from_row, to_micros,
};
use super::sql::{SOCIAL_SCHEMA, numbered_placeholders};
use crate::models::{
    Comment, CommentId, CounterKind, DateRange, Like, Moment, MomentId, MomentUpdate, NewMoment,
    Profile, Repost, RepostId, UserId,
};
use crate::storage::traits::{EngagementBackend, GraphAccess, MomentSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Params, Row, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const BACKEND: &str = "sqlite_social";

/// `SQLite`-backed implementation of [`GraphAccess`], [`EngagementBackend`]
/// and [`MomentSource`].
pub struct SqliteSocialStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteSocialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSocialStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteSocialStore {
    /// Opens (or creates) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(Some(&db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = open_connection(None)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path, `None` for in-memory stores.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(SOCIAL_SCHEMA)
            .map_err(|e| Error::failed("initialize_social_schema", e))
    }

    /// Inserts or replaces a profile row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.run("upsert_profile", |conn| {
            conn.execute(
                "INSERT INTO profiles (id, username, avatar_url, follower_count, following_count,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     username = excluded.username,
                     avatar_url = excluded.avatar_url,
                     follower_count = excluded.follower_count,
                     following_count = excluded.following_count,
                     created_at = excluded.created_at,
                     updated_at = excluded.updated_at",
                params![
                    profile.id.as_str(),
                    profile.username,
                    profile.avatar_url,
                    saturating_i64(profile.follower_count),
                    saturating_i64(profile.following_count),
                    to_micros(profile.created_at),
                    to_micros(profile.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Runs `f` under the connection lock, mapping errors and recording
    /// metrics.
    fn run<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            f(&conn).map_err(|e| remote_error(operation, &e))
        };
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(BACKEND, operation, start, status);
        result
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn collect<T>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
    f: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?;
    let values = rows.collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(values)
}

fn text_values(ids: &[UserId]) -> Vec<Value> {
    ids.iter().map(|id| Value::Text(id.to_string())).collect()
}

fn fetch_moment(conn: &Connection, id: &MomentId) -> rusqlite::Result<Option<Moment>> {
    conn.query_row(
        &format!("SELECT {MOMENT_COLUMNS} {MOMENT_FROM} WHERE m.id = ?1"),
        params![id.as_str()],
        moment_from_row,
    )
    .optional()
}

fn write_moment(conn: &Connection, moment: &Moment) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE moments SET title = ?2, content = ?3, date = ?4, images = ?5,
             image_tokens = ?6, tags = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            moment.id.as_str(),
            moment.title,
            moment.content,
            moment.date.format(DATE_FORMAT).to_string(),
            encode_list(&moment.images),
            encode_list(&moment.image_tokens),
            encode_list(&moment.tags),
            to_micros(moment.updated_at),
        ],
    )
}

enum ImageRemoval {
    Removed,
    MissingMoment,
    OutOfRange(usize),
}

/// Returns `(table, column)` of a counter.
const fn counter_column(kind: CounterKind) -> (&'static str, &'static str) {
    match kind {
        CounterKind::Like => ("moments", "like_count"),
        CounterKind::Comment => ("moments", "comment_count"),
        CounterKind::Repost => ("moments", "repost_count"),
        CounterKind::Follower => ("profiles", "follower_count"),
        CounterKind::Following => ("profiles", "following_count"),
    }
}

#[async_trait]
impl GraphAccess for SqliteSocialStore {
    #[instrument(skip_all, fields(user = %user))]
    async fn followings_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.run("followings_of", |conn| {
            collect(
                conn,
                "SELECT following_id FROM follows WHERE follower_id = ?1 ORDER BY seq DESC",
                params![user.as_str()],
                |row| Ok(UserId::new(row.get::<_, String>(0)?)),
            )
        })
    }

    #[instrument(skip_all, fields(user = %user))]
    async fn followers_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.run("followers_of", |conn| {
            collect(
                conn,
                "SELECT follower_id FROM follows WHERE following_id = ?1 ORDER BY seq DESC",
                params![user.as_str()],
                |row| Ok(UserId::new(row.get::<_, String>(0)?)),
            )
        })
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    async fn users_following(
        &self,
        targets: &[UserId],
        excluding: &UserId,
    ) -> Result<Vec<UserId>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT follower_id FROM follows
             WHERE follower_id <> ?1 AND following_id IN ({})
             ORDER BY seq",
            numbered_placeholders(2, targets.len())
        );
        let mut values = vec![Value::Text(excluding.to_string())];
        values.extend(text_values(targets));
        self.run("users_following", |conn| {
            collect(conn, &sql, params_from_iter(values), |row| {
                Ok(UserId::new(row.get::<_, String>(0)?))
            })
        })
    }

    async fn recent_profiles(&self, excluding: &UserId, limit: usize) -> Result<Vec<Profile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id <> ?1
             ORDER BY created_at DESC LIMIT ?2"
        );
        self.run("recent_profiles", |conn| {
            collect(
                conn,
                &sql,
                params![excluding.as_str(), sql_limit(limit)],
                profile_from_row,
            )
        })
    }

    async fn active_profiles(
        &self,
        excluding: &UserId,
        excluding_set: &[UserId],
        limit: usize,
    ) -> Result<Vec<Profile>> {
        let exclusion = if excluding_set.is_empty() {
            String::new()
        } else {
            format!(
                "AND id NOT IN ({})",
                numbered_placeholders(3, excluding_set.len())
            )
        };
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id <> ?1 {exclusion}
             ORDER BY updated_at DESC LIMIT ?2"
        );
        let mut values = vec![
            Value::Text(excluding.to_string()),
            Value::Integer(sql_limit(limit)),
        ];
        values.extend(text_values(excluding_set));
        self.run("active_profiles", |conn| {
            collect(conn, &sql, params_from_iter(values), profile_from_row)
        })
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id IN ({})",
            numbered_placeholders(1, ids.len())
        );
        self.run("profiles", |conn| {
            collect(conn, &sql, params_from_iter(text_values(ids)), profile_from_row)
        })
    }

    async fn has_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.run("has_follow", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
                params![follower.as_str(), following.as_str()],
                |row| row.get(0),
            )
        })
    }

    #[instrument(skip_all, fields(follower = %follower, following = %following))]
    async fn insert_follow(&self, follower: &UserId, following: &UserId) -> Result<()> {
        if follower == following {
            return Err(Error::InvalidInput("cannot follow yourself".to_string()));
        }
        self.run("insert_follow", |conn| {
            conn.execute(
                "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)",
                params![follower.as_str(), following.as_str(), to_micros(Utc::now())],
            )?;
            Ok(())
        })
    }

    #[instrument(skip_all, fields(follower = %follower, following = %following))]
    async fn delete_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.run("delete_follow", |conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower.as_str(), following.as_str()],
            )?;
            Ok(removed > 0)
        })
    }
}

#[async_trait]
impl EngagementBackend for SqliteSocialStore {
    async fn has_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.run("has_like", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM likes WHERE user_id = ?1 AND moment_id = ?2)",
                params![user.as_str(), moment.as_str()],
                |row| row.get(0),
            )
        })
    }

    async fn insert_like(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        self.run("insert_like", |conn| {
            conn.execute(
                "INSERT INTO likes (user_id, moment_id, created_at) VALUES (?1, ?2, ?3)",
                params![user.as_str(), moment.as_str(), to_micros(Utc::now())],
            )?;
            Ok(())
        })
    }

    async fn delete_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.run("delete_like", |conn| {
            let removed = conn.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND moment_id = ?2",
                params![user.as_str(), moment.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    async fn list_likes(&self, moment: &MomentId) -> Result<Vec<Like>> {
        self.run("list_likes", |conn| {
            collect(
                conn,
                "SELECT user_id, moment_id, created_at FROM likes WHERE moment_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                params![moment.as_str()],
                like_from_row,
            )
        })
    }

    async fn has_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.run("has_repost", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM reposts WHERE user_id = ?1 AND moment_id = ?2)",
                params![user.as_str(), moment.as_str()],
                |row| row.get(0),
            )
        })
    }

    async fn insert_repost(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: Option<&str>,
    ) -> Result<Repost> {
        let repost = Repost {
            id: RepostId::generate(),
            user_id: user.clone(),
            moment_id: moment.clone(),
            content: content.map(str::to_string),
            created_at: Utc::now(),
        };
        self.run("insert_repost", |conn| {
            conn.execute(
                "INSERT INTO reposts (id, user_id, moment_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    repost.id.as_str(),
                    repost.user_id.as_str(),
                    repost.moment_id.as_str(),
                    repost.content,
                    to_micros(repost.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(repost)
    }

    async fn delete_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.run("delete_repost", |conn| {
            let removed = conn.execute(
                "DELETE FROM reposts WHERE user_id = ?1 AND moment_id = ?2",
                params![user.as_str(), moment.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    async fn list_reposts(&self, moment: &MomentId) -> Result<Vec<Repost>> {
        self.run("list_reposts", |conn| {
            collect(
                conn,
                "SELECT id, user_id, moment_id, content, created_at FROM reposts
                 WHERE moment_id = ?1 ORDER BY created_at DESC, rowid DESC",
                params![moment.as_str()],
                repost_from_row,
            )
        })
    }

    async fn insert_comment(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: &str,
    ) -> Result<Comment> {
        let comment = Comment {
            id: CommentId::generate(),
            user_id: user.clone(),
            moment_id: moment.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.run("insert_comment", |conn| {
            conn.execute(
                "INSERT INTO comments (id, user_id, moment_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    comment.id.as_str(),
                    comment.user_id.as_str(),
                    comment.moment_id.as_str(),
                    comment.content,
                    to_micros(comment.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(comment)
    }

    async fn delete_comment(
        &self,
        user: &UserId,
        comment: &CommentId,
        moment: &MomentId,
    ) -> Result<bool> {
        self.run("delete_comment", |conn| {
            let removed = conn.execute(
                "DELETE FROM comments WHERE id = ?1 AND user_id = ?2 AND moment_id = ?3",
                params![comment.as_str(), user.as_str(), moment.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    async fn list_comments(&self, moment: &MomentId) -> Result<Vec<Comment>> {
        self.run("list_comments", |conn| {
            collect(
                conn,
                "SELECT id, user_id, moment_id, content, created_at FROM comments
                 WHERE moment_id = ?1 ORDER BY created_at DESC, rowid DESC",
                params![moment.as_str()],
                comment_from_row,
            )
        })
    }

    #[instrument(skip_all, fields(kind = %kind, id = target))]
    async fn increment(&self, kind: CounterKind, target: &str) -> Result<()> {
        let (table, column) = counter_column(kind);
        let sql = format!("UPDATE {table} SET {column} = {column} + 1 WHERE id = ?1");
        let updated = self.run("increment", |conn| conn.execute(&sql, params![target]))?;
        if updated == 0 {
            return Err(Error::query("increment", format!("no {kind} counter for {target}")));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(kind = %kind, id = target))]
    async fn decrement(&self, kind: CounterKind, target: &str) -> Result<()> {
        let (table, column) = counter_column(kind);
        let sql = format!("UPDATE {table} SET {column} = MAX({column} - 1, 0) WHERE id = ?1");
        let updated = self.run("decrement", |conn| conn.execute(&sql, params![target]))?;
        if updated == 0 {
            return Err(Error::query("decrement", format!("no {kind} counter for {target}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MomentSource for SqliteSocialStore {
    async fn list_all(&self, owner: &UserId) -> Result<Vec<Moment>> {
        let sql = format!(
            "SELECT {MOMENT_COLUMNS} {MOMENT_FROM} WHERE m.user_id = ?1
             ORDER BY m.date DESC, m.created_at DESC"
        );
        self.run("list_all", |conn| {
            collect(conn, &sql, params![owner.as_str()], moment_from_row)
        })
    }

    async fn list_by_date_range(&self, owner: &UserId, range: DateRange) -> Result<Vec<Moment>> {
        let sql = format!(
            "SELECT {MOMENT_COLUMNS} {MOMENT_FROM}
             WHERE m.user_id = ?1 AND m.date >= ?2 AND m.date <= ?3
             ORDER BY m.date DESC, m.created_at DESC"
        );
        self.run("list_by_date_range", |conn| {
            collect(
                conn,
                &sql,
                params![
                    owner.as_str(),
                    range.start.format(DATE_FORMAT).to_string(),
                    range.end.format(DATE_FORMAT).to_string(),
                ],
                moment_from_row,
            )
        })
    }

    async fn list_by_tags(&self, owner: &UserId, tags: &[String]) -> Result<Vec<Moment>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MOMENT_COLUMNS} {MOMENT_FROM}
             WHERE m.user_id = ?1
               AND EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value IN ({}))
             ORDER BY m.date DESC, m.created_at DESC",
            numbered_placeholders(2, tags.len())
        );
        let mut values = vec![Value::Text(owner.to_string())];
        values.extend(tags.iter().map(|t| Value::Text(t.clone())));
        self.run("list_by_tags", |conn| {
            collect(conn, &sql, params_from_iter(values), moment_from_row)
        })
    }

    #[instrument(skip_all, fields(authors = authors.len()))]
    async fn list_by_authors(&self, authors: &[UserId]) -> Result<Vec<Moment>> {
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MOMENT_COLUMNS} {MOMENT_FROM} WHERE m.user_id IN ({})
             ORDER BY m.created_at DESC, m.rowid DESC",
            numbered_placeholders(1, authors.len())
        );
        self.run("list_by_authors", |conn| {
            collect(conn, &sql, params_from_iter(text_values(authors)), moment_from_row)
        })
    }

    async fn get(&self, id: &MomentId) -> Result<Option<Moment>> {
        self.run("get", |conn| fetch_moment(conn, id))
    }

    #[instrument(skip_all, fields(author = %author))]
    async fn create(&self, author: &UserId, request: &NewMoment) -> Result<Moment> {
        let now = Utc::now();
        let id = MomentId::generate();
        let date = request.date.unwrap_or_else(|| now.date_naive());
        let images: Vec<String> = request.images.iter().map(|i| i.url.clone()).collect();
        let tokens: Vec<String> = request.images.iter().map(|i| i.token.clone()).collect();
        let created = self.run("create", |conn| {
            conn.execute(
                "INSERT INTO moments (id, user_id, title, content, date, images, image_tokens,
                     tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id.as_str(),
                    author.as_str(),
                    request.title,
                    request.content,
                    date.format(DATE_FORMAT).to_string(),
                    encode_list(&images),
                    encode_list(&tokens),
                    encode_list(&request.tags),
                    to_micros(now),
                ],
            )?;
            fetch_moment(conn, &id)
        })?;
        created.ok_or_else(|| Error::query("create", format!("moment {id} missing after insert")))
    }

    #[instrument(skip_all, fields(moment = %id))]
    async fn update(&self, id: &MomentId, update: &MomentUpdate) -> Result<()> {
        let found = self.run("update", |conn| {
            let Some(mut moment) = fetch_moment(conn, id)? else {
                return Ok(false);
            };
            update.apply_to(&mut moment, Utc::now());
            write_moment(conn, &moment)?;
            Ok(true)
        })?;
        if found {
            Ok(())
        } else {
            Err(Error::NotFound(format!("moment {id}")))
        }
    }

    #[instrument(skip_all, fields(moment = %id))]
    async fn delete(&self, id: &MomentId) -> Result<()> {
        let removed = self.run("delete", |conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = tx.execute("DELETE FROM moments WHERE id = ?1", params![id.as_str()])?;
            for table in ["likes", "reposts", "comments"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE moment_id = ?1"),
                    params![id.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })?;
        if removed == 0 {
            return Err(Error::NotFound(format!("moment {id}")));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(moment = %id, index = index))]
    async fn delete_image(&self, id: &MomentId, index: usize) -> Result<()> {
        let outcome = self.run("delete_image", |conn| {
            let Some(mut moment) = fetch_moment(conn, id)? else {
                return Ok(ImageRemoval::MissingMoment);
            };
            if index >= moment.images.len() {
                return Ok(ImageRemoval::OutOfRange(moment.images.len()));
            }
            moment.images.remove(index);
            if index < moment.image_tokens.len() {
                moment.image_tokens.remove(index);
            }
            moment.updated_at = Utc::now();
            write_moment(conn, &moment)?;
            Ok(ImageRemoval::Removed)
        })?;
        match outcome {
            ImageRemoval::Removed => Ok(()),
            ImageRemoval::MissingMoment => Err(Error::NotFound(format!("moment {id}"))),
            ImageRemoval::OutOfRange(len) => Err(Error::InvalidInput(format!(
                "image index {index} out of range for {len} images"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadedImage;
    use chrono::{Duration, NaiveDate};

    fn store_with_profiles(ids: &[&str]) -> SqliteSocialStore {
        let store = SqliteSocialStore::in_memory().unwrap();
        let base = Utc::now();
        for (i, id) in ids.iter().enumerate() {
            let at = base + Duration::seconds(i64::try_from(i).unwrap());
            store.upsert_profile(&Profile::new(*id, at)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_follow_edges_unique_and_ordered() {
        let store = store_with_profiles(&["a", "b", "c"]);
        let a = UserId::new("a");

        store.insert_follow(&a, &UserId::new("b")).await.unwrap();
        store.insert_follow(&a, &UserId::new("c")).await.unwrap();
        assert!(matches!(
            store.insert_follow(&a, &UserId::new("b")).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.insert_follow(&a, &a).await,
            Err(Error::InvalidInput(_))
        ));

        assert_eq!(
            store.followings_of(&a).await.unwrap(),
            vec![UserId::new("c"), UserId::new("b")]
        );
        assert!(store.delete_follow(&a, &UserId::new("b")).await.unwrap());
        assert!(!store.delete_follow(&a, &UserId::new("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_users_following_one_row_per_edge() {
        let store = store_with_profiles(&[]);
        for (follower, following) in [("c", "b1"), ("c", "b2"), ("d", "b1"), ("me", "b1")] {
            store
                .insert_follow(&UserId::new(follower), &UserId::new(following))
                .await
                .unwrap();
        }
        let rows = store
            .users_following(&[UserId::new("b1"), UserId::new("b2")], &UserId::new("me"))
            .await
            .unwrap();
        assert_eq!(rows, vec![UserId::new("c"), UserId::new("c"), UserId::new("d")]);
    }

    #[tokio::test]
    async fn test_profile_listings_order_and_exclusion() {
        let store = store_with_profiles(&["old", "mid", "new", "me"]);
        let me = UserId::new("me");

        let recent: Vec<_> = store
            .recent_profiles(&me, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(recent, vec![UserId::new("new"), UserId::new("mid")]);

        let active: Vec<_> = store
            .active_profiles(&me, &[UserId::new("new")], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(active, vec![UserId::new("mid"), UserId::new("old")]);
    }

    #[tokio::test]
    async fn test_counter_rpc_floors_at_zero() {
        let store = store_with_profiles(&["a"]);
        let moment = store
            .create(&UserId::new("a"), &NewMoment::default())
            .await
            .unwrap();

        store.increment(CounterKind::Like, moment.id.as_str()).await.unwrap();
        store.decrement(CounterKind::Like, moment.id.as_str()).await.unwrap();
        store.decrement(CounterKind::Like, moment.id.as_str()).await.unwrap();
        store.increment(CounterKind::Follower, "a").await.unwrap();

        let stored = store.get(&moment.id).await.unwrap().unwrap();
        assert_eq!(stored.counters.like_count, 0);
        assert_eq!(stored.author.map(|a| a.follower_count), Some(1));
        assert!(matches!(
            store.increment(CounterKind::Comment, "missing").await,
            Err(Error::RemoteQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_like_uniqueness() {
        let store = store_with_profiles(&["a"]);
        let user = UserId::new("a");
        let moment = MomentId::new("m1");

        store.insert_like(&user, &moment).await.unwrap();
        assert!(store.has_like(&user, &moment).await.unwrap());
        assert!(matches!(
            store.insert_like(&user, &moment).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(store.delete_like(&user, &moment).await.unwrap());
        assert!(!store.has_like(&user, &moment).await.unwrap());
    }

    #[tokio::test]
    async fn test_comment_delete_scoped_to_author_and_moment() {
        let store = store_with_profiles(&[]);
        let moment = MomentId::new("m1");
        let author = UserId::new("a");
        let comment = store.insert_comment(&author, &moment, "nice").await.unwrap();

        assert!(
            !store
                .delete_comment(&UserId::new("b"), &comment.id, &moment)
                .await
                .unwrap()
        );
        assert!(
            !store
                .delete_comment(&author, &comment.id, &MomentId::new("m2"))
                .await
                .unwrap()
        );
        assert!(store.delete_comment(&author, &comment.id, &moment).await.unwrap());
        assert!(store.list_comments(&moment).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_journal_queries() {
        let store = store_with_profiles(&["a"]);
        let owner = UserId::new("a");
        let day = |d| NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        for (d, tag) in [(1, "food"), (10, "travel"), (20, "food")] {
            store
                .create(
                    &owner,
                    &NewMoment {
                        title: format!("day {d}"),
                        date: Some(day(d)),
                        tags: vec![tag.to_string()],
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let all = store.list_all(&owner).await.unwrap();
        assert_eq!(all.iter().map(|m| m.date).collect::<Vec<_>>(), vec![day(20), day(10), day(1)]);

        let ranged = store
            .list_by_date_range(&owner, DateRange::new(day(5), day(25)))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let tagged = store.list_by_tags(&owner, &["food".to_string()]).await.unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(store.list_by_tags(&owner, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_image() {
        let store = store_with_profiles(&["a"]);
        let image = |n: &str| UploadedImage {
            url: format!("https://img/{n}"),
            token: format!("t{n}"),
        };
        let moment = store
            .create(
                &UserId::new("a"),
                &NewMoment {
                    images: vec![image("1")],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .update(
                &moment.id,
                &MomentUpdate {
                    title: Some("renamed".into()),
                    images: vec![image("2")],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.delete_image(&moment.id, 0).await.unwrap();
        assert!(matches!(
            store.delete_image(&moment.id, 5).await,
            Err(Error::InvalidInput(_))
        ));

        let stored = store.get(&moment.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "renamed");
        assert_eq!(stored.images, vec!["https://img/2"]);
        assert_eq!(stored.image_tokens, vec!["t2"]);

        store.delete(&moment.id).await.unwrap();
        assert!(matches!(
            store.delete(&moment.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.update(&moment.id, &MomentUpdate::default()).await,
            Err(Error::NotFound(_))
        ));
    }
}
