//! Schema and SQL helpers for the `SQLite` stores.

/// Schema of the social store.
///
/// Follow, like and repost rows are unique per pair; counters live on the
/// row they count and are only touched through single `UPDATE` statements.
pub const SOCIAL_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        username TEXT,
        avatar_url TEXT,
        follower_count INTEGER NOT NULL DEFAULT 0 CHECK (follower_count >= 0),
        following_count INTEGER NOT NULL DEFAULT 0 CHECK (following_count >= 0),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_profiles_created ON profiles(created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_profiles_updated ON profiles(updated_at DESC);

    CREATE TABLE IF NOT EXISTS follows (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        follower_id TEXT NOT NULL,
        following_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        CHECK (follower_id <> following_id)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_follows_pair ON follows(follower_id, following_id);
    CREATE INDEX IF NOT EXISTS idx_follows_following ON follows(following_id);

    CREATE TABLE IF NOT EXISTS moments (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        date TEXT NOT NULL,
        images TEXT NOT NULL DEFAULT '[]',
        image_tokens TEXT NOT NULL DEFAULT '[]',
        tags TEXT NOT NULL DEFAULT '[]',
        like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),
        comment_count INTEGER NOT NULL DEFAULT 0 CHECK (comment_count >= 0),
        repost_count INTEGER NOT NULL DEFAULT 0 CHECK (repost_count >= 0),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_moments_user_date ON moments(user_id, date DESC);
    CREATE INDEX IF NOT EXISTS idx_moments_created ON moments(created_at DESC);

    CREATE TABLE IF NOT EXISTS likes (
        user_id TEXT NOT NULL,
        moment_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_pair ON likes(user_id, moment_id);
    CREATE INDEX IF NOT EXISTS idx_likes_moment ON likes(moment_id);

    CREATE TABLE IF NOT EXISTS reposts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        moment_id TEXT NOT NULL,
        content TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_reposts_pair ON reposts(user_id, moment_id);
    CREATE INDEX IF NOT EXISTS idx_reposts_moment ON reposts(moment_id);

    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        moment_id TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_comments_moment ON comments(moment_id);
";

/// Schema of the snapshot key-value store.
pub const KV_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

/// Builds a comma-separated list of `count` numbered placeholders starting
/// at `?{start}`.
///
/// # Examples
///
/// ```
/// use moment_engine::storage::sqlite::numbered_placeholders;
///
/// assert_eq!(numbered_placeholders(2, 3), "?2, ?3, ?4");
/// assert_eq!(numbered_placeholders(1, 0), "");
/// ```
#[must_use]
pub fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
