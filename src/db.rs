//! SQLite database with Diesel ORM
//!
//! Stores users, their settings, and the journal tables.
//! Tables are created on open; every connection comes from an r2d2 pool.

use crate::auth::{hash_password, hashes_match};
use crate::config::DatabaseConfig;
use crate::schema::*;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version for flowjournal
pub const CURRENT_SCHEMA: JournalSchema = JournalSchema {
    major: 1,
    minor: 1,
    patch: 0,
    name: "flow-journal",
    features: &[
        "users",
        "user_settings",
        "intro_reflection",
        "daily_entries",
        "weekly_reflections",
        "final_reflection",
    ],
};

/// Emotion wheel document every new user starts with
pub const DEFAULT_EMOTION_WHEEL: &str = r#"{"custom_emotions":[],"hidden_emotions":[]}"#;

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct JournalSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl JournalSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for JournalSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

/// RFC 3339 timestamp used for every `*_at` column
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
struct NewSchemaVersion<'a> {
    version: &'a str,
    name: &'a str,
    features: &'a str,
    introduced_at: &'a str,
}

/// Insertable user
#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    username: &'a str,
    password_hash: &'a str,
    intro_completed: bool,
    created_at: &'a str,
}

/// Queryable user row
#[derive(Queryable, Debug, Clone)]
struct UserRow {
    id: i32,
    username: String,
    password_hash: String,
    intro_completed: bool,
    created_at: String,
}

/// Insertable settings row
#[derive(Insertable)]
#[diesel(table_name = user_settings)]
struct NewUserSettings<'a> {
    user_id: i32,
    emotion_wheel: &'a str,
    created_at: &'a str,
    updated_at: &'a str,
}

/// Identity resolved from a successful credential check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub id: i32,
    pub username: String,
    pub intro_completed: bool,
}

/// Public view of a user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct UserStatus {
    pub user_id: i32,
    pub username: String,
    pub intro_completed: bool,
    pub created_at: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub(crate) type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Per-connection setup applied every time the pool hands a connection out
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
///
/// Constructed once and shared by reference (usually behind an `Arc`).
/// Dropping it closes every pooled connection.
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl Database {
    /// Create a new database at a custom path with default pool settings
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path, &DatabaseConfig::default())
    }

    /// Open database at the configured path
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Self::open_at(&config.path, config)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P, config: &DatabaseConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbError::Connection(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(config.pool_max)
            .min_idle(Some(config.pool_min))
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)?;

        info!(
            path = %path.display(),
            pool_min = config.pool_min,
            pool_max = config.pool_max,
            "opened database"
        );

        let db = Self { pool, path };
        db.init_schema()?;
        Ok(db)
    }

    /// Path of the underlying SQLite file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        conn.batch_execute("PRAGMA journal_mode = WAL;")?;

        // Run raw SQL to create tables if they don't exist
        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                intro_completed BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL UNIQUE,
                emotion_wheel TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS intro_reflection (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL UNIQUE,
                q1_important_events TEXT NOT NULL,
                q2_current_thoughts TEXT NOT NULL,
                q3_physical_symptoms TEXT NOT NULL,
                q4_current_feelings TEXT NOT NULL,
                q5_brought_closer TEXT NOT NULL,
                q6_brought_further TEXT NOT NULL,
                q7_change_in_10_weeks TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS daily_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                entry_date TEXT NOT NULL,
                energy_level INTEGER,
                selected_emotions TEXT NOT NULL DEFAULT '[]',
                how_want_to_feel TEXT,
                daily_mantra TEXT,
                grateful_1 TEXT,
                grateful_2 TEXT,
                grateful_3 TEXT,
                goal_1 TEXT,
                goal_2 TEXT,
                goal_3 TEXT,
                selfcare_actions TEXT,
                free_journal TEXT,
                favorite_moment TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE(user_id, entry_date)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS weekly_reflections (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                week_number INTEGER NOT NULL,
                week_start_date TEXT NOT NULL,
                week_end_date TEXT NOT NULL,
                current_mood TEXT,
                important_results TEXT,
                important_realizations TEXT,
                proud_1 TEXT,
                proud_2 TEXT,
                proud_3 TEXT,
                proud_4 TEXT,
                proud_5 TEXT,
                change_phase TEXT,
                change_reflection TEXT,
                next_week_focus TEXT,
                task_1 TEXT,
                task_2 TEXT,
                task_3 TEXT,
                task_4 TEXT,
                task_5 TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE(user_id, week_number)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS final_reflection (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL UNIQUE,
                q1_starting_point TEXT NOT NULL,
                q2_feeling_and_goal TEXT NOT NULL,
                q3_journey_obstacles TEXT NOT NULL,
                q4_arrival_changes TEXT NOT NULL,
                q5_self_learning TEXT NOT NULL,
                q6_future_path TEXT NOT NULL,
                q7_journaling_impact TEXT NOT NULL,
                q8_celebration TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_daily_user_date ON daily_entries(user_id, entry_date DESC)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_weekly_user_week ON weekly_reflections(user_id, week_number DESC)").execute(&mut conn)?;

        // Register current schema
        self.register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &JournalSchema) -> Result<()> {
        let now = now_rfc3339();
        let features_json = serde_json::to_string(&schema.features)?;

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        debug!(schema = %schema, "schema registered");
        Ok(())
    }

    /// Latest schema version recorded in this database
    pub fn stored_schema_version(&self) -> Result<Option<String>> {
        let mut conn = self.get_conn()?;
        let version = schema_versions::table
            .order(schema_versions::id.desc())
            .select(schema_versions::version)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(version)
    }

    // ========================================================================
    // Credential Store
    // ========================================================================

    /// Create a user and their default settings row in one transaction
    pub fn register(&self, username: &str, password: &str) -> Result<i32> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let password_hash = hash_password(password);

        let new_user = NewUser {
            username,
            password_hash: &password_hash,
            intro_completed: false,
            created_at: &now,
        };

        let user_id = conn.immediate_transaction::<i32, DbError, _>(|conn| {
            diesel::insert_into(users::table)
                .values(&new_user)
                .execute(conn)
                .map_err(|e| match e {
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        DbError::DuplicateUsername(username.to_string())
                    }
                    other => DbError::Query(other),
                })?;

            let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
                .first(conn)?;

            diesel::insert_into(user_settings::table)
                .values(&NewUserSettings {
                    user_id: id,
                    emotion_wheel: DEFAULT_EMOTION_WHEEL,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;

            Ok(id)
        })?;

        info!(user_id, username, "registered user");
        Ok(user_id)
    }

    /// Resolve a username/password pair to an identity
    ///
    /// Returns `None` for an unknown user or a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<UserIdentity>> {
        let mut conn = self.get_conn()?;

        let user = users::table
            .filter(users::username.eq(username))
            .first::<UserRow>(&mut conn)
            .optional()?;

        let supplied = hash_password(password);
        Ok(user
            .filter(|u| hashes_match(&u.password_hash, &supplied))
            .map(|u| UserIdentity {
                id: u.id,
                username: u.username,
                intro_completed: u.intro_completed,
            }))
    }

    /// Account view for `/api/user/status`
    pub fn user_status(&self, user_id: i32) -> Result<UserStatus> {
        let mut conn = self.get_conn()?;

        let user = users::table
            .filter(users::id.eq(user_id))
            .first::<UserRow>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound("User"))?;

        Ok(UserStatus {
            user_id: user.id,
            username: user.username,
            intro_completed: user.intro_completed,
            created_at: user.created_at,
        })
    }

    // ========================================================================
    // Settings Store
    // ========================================================================

    /// Stored emotion wheel document for a user
    pub fn get_emotion_wheel(&self, user_id: i32) -> Result<serde_json::Value> {
        let mut conn = self.get_conn()?;

        let raw = user_settings::table
            .filter(user_settings::user_id.eq(user_id))
            .select(user_settings::emotion_wheel)
            .first::<String>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound("Settings"))?;

        Ok(serde_json::from_str(&raw)?)
    }

    /// Replace the emotion wheel document
    pub fn update_emotion_wheel(&self, user_id: i32, document: &serde_json::Value) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_rfc3339();
        let raw = serde_json::to_string(document)?;

        let updated = diesel::update(user_settings::table.filter(user_settings::user_id.eq(user_id)))
            .set((
                user_settings::emotion_wheel.eq(&raw),
                user_settings::updated_at.eq(&now),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(DbError::NotFound("Settings"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    #[test]
    fn test_schema_registered_on_open() {
        let (_dir, db) = test_db();
        assert_eq!(
            db.stored_schema_version().unwrap(),
            Some(CURRENT_SCHEMA.version_string())
        );
        assert!(CURRENT_SCHEMA.has_feature("daily_entries"));
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.1.0 (flow-journal)");
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.db");
        let first = Database::new(path.to_str().unwrap()).unwrap();
        let id = first.register("ana", "pw").unwrap();
        drop(first);

        let second = Database::new(path.to_str().unwrap()).unwrap();
        assert_eq!(second.verify("ana", "pw").unwrap().map(|u| u.id), Some(id));
    }

    #[test]
    fn test_register_duplicate_username() {
        let (_dir, db) = test_db();
        db.register("ana", "secret").unwrap();

        let err = db.register("ana", "other").unwrap_err();
        assert!(matches!(err, DbError::DuplicateUsername(ref name) if name == "ana"));
    }

    #[test]
    fn test_register_creates_default_settings() {
        let (_dir, db) = test_db();
        let id = db.register("ana", "secret").unwrap();

        let wheel = db.get_emotion_wheel(id).unwrap();
        let expected: serde_json::Value = serde_json::from_str(DEFAULT_EMOTION_WHEEL).unwrap();
        assert_eq!(wheel, expected);
    }

    #[test]
    fn test_failed_registration_leaves_no_settings_row() {
        let (_dir, db) = test_db();
        db.register("ana", "secret").unwrap();
        let _ = db.register("ana", "secret");

        let mut conn = db.get_conn().unwrap();
        let user_count: i64 = users::table.count().get_result(&mut conn).unwrap();
        let settings_count: i64 = user_settings::table.count().get_result(&mut conn).unwrap();
        assert_eq!(user_count, 1);
        assert_eq!(settings_count, 1);
    }

    #[test]
    fn test_settings_failure_rolls_back_user_row() {
        let (_dir, db) = test_db();
        {
            let mut conn = db.get_conn().unwrap();
            diesel::sql_query(
                "CREATE TRIGGER reject_settings BEFORE INSERT ON user_settings \
                 BEGIN SELECT RAISE(ABORT, 'settings rejected'); END",
            )
            .execute(&mut conn)
            .unwrap();
        }

        assert!(matches!(db.register("ana", "pw"), Err(DbError::Query(_))));
        assert!(db.verify("ana", "pw").unwrap().is_none());

        let mut conn = db.get_conn().unwrap();
        let user_count: i64 = users::table.count().get_result(&mut conn).unwrap();
        let settings_count: i64 = user_settings::table.count().get_result(&mut conn).unwrap();
        assert_eq!(user_count, 0);
        assert_eq!(settings_count, 0);
    }

    #[test]
    fn test_verify_right_and_wrong_password() {
        let (_dir, db) = test_db();
        let id = db.register("ana", "secret").unwrap();

        let identity = db.verify("ana", "secret").unwrap().unwrap();
        assert_eq!(
            identity,
            UserIdentity { id, username: "ana".to_string(), intro_completed: false }
        );
        assert!(db.verify("ana", "Secret").unwrap().is_none());
        assert!(db.verify("nobody", "secret").unwrap().is_none());
    }

    #[test]
    fn test_stored_hash_is_sha256_hex() {
        let (_dir, db) = test_db();
        db.register("ana", "password").unwrap();

        let mut conn = db.get_conn().unwrap();
        let stored: String = users::table
            .select(users::password_hash)
            .first(&mut conn)
            .unwrap();
        assert_eq!(
            stored,
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn test_user_status() {
        let (_dir, db) = test_db();
        let id = db.register("ana", "secret").unwrap();

        let status = db.user_status(id).unwrap();
        assert_eq!(status.user_id, id);
        assert_eq!(status.username, "ana");
        assert!(!status.intro_completed);
        assert!(chrono::DateTime::parse_from_rfc3339(&status.created_at).is_ok());

        assert!(matches!(db.user_status(id + 100), Err(DbError::NotFound("User"))));
    }

    #[test]
    fn test_update_emotion_wheel_replaces_document() {
        let (_dir, db) = test_db();
        let id = db.register("ana", "secret").unwrap();

        let doc = serde_json::json!({"core": {"joy": ["content", "proud"]}});
        db.update_emotion_wheel(id, &doc).unwrap();
        assert_eq!(db.get_emotion_wheel(id).unwrap(), doc);

        let replacement = serde_json::json!({"core": {}});
        db.update_emotion_wheel(id, &replacement).unwrap();
        assert_eq!(db.get_emotion_wheel(id).unwrap(), replacement);
    }

    #[test]
    fn test_settings_missing_is_not_found() {
        let (_dir, db) = test_db();
        assert!(matches!(db.get_emotion_wheel(42), Err(DbError::NotFound("Settings"))));
        assert!(matches!(
            db.update_emotion_wheel(42, &serde_json::json!({})),
            Err(DbError::NotFound("Settings"))
        ));
    }
}
