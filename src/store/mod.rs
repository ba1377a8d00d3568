pub mod memes;
pub mod user_aliases;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use teloxide::types::UserId;
use tokio::sync::Mutex;
use tracing::info;

pub use memes::{Meme, MemeType, NewMeme};

/// Failures surfaced by alias store operations.
///
/// `DuplicateAlias` and `InvalidContent` are expected business outcomes and are
/// turned into replies by the dispatcher. `Unavailable` means the database
/// itself failed and aborts the update that hit it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("alias '{alias}' is already saved to a different meme")]
    DuplicateAlias { alias: String },
    #[error("invalid {kind} content: {reason}")]
    InvalidContent { kind: MemeType, reason: String },
    #[error("alias store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage capability used by the dispatcher.
#[async_trait]
pub trait AliasStore: Send + Sync {
    /// Find the meme `requester` means by `alias`: their own scoped meme first,
    /// then a shared meme under one of their personal aliases, then a global one.
    async fn resolve(&self, alias: &str, requester: UserId) -> StoreResult<Option<Meme>>;

    /// Save `meme` under `alias` scoped to `owner`. Returns the meme id.
    async fn register_alias(&self, alias: &str, meme: &NewMeme, owner: UserId)
        -> StoreResult<i64>;

    /// Add `alias` to the personal aliases of `user`. Idempotent.
    async fn link_user_alias(&self, alias: &str, user: UserId) -> StoreResult<()>;

    /// Personal aliases of `user`, oldest first.
    async fn user_aliases(&self, user: UserId) -> StoreResult<Vec<String>>;
}

/// Row counts reported at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub memes: i64,
    pub meme_aliases: i64,
    pub user_aliases: i64,
}

/// Thread-safe SQLite alias store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Migrate before wrapping in the async Mutex; blocking_lock() panics inside a runtime.
        Self::run_migrations(&conn)?;

        info!("Alias store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meme (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type INTEGER NOT NULL,
                content TEXT NOT NULL,
                alias TEXT NOT NULL COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS meme_alias (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                meme_id INTEGER NOT NULL REFERENCES meme(id),
                user_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_alias (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                alias TEXT NOT NULL COLLATE NOCASE
            );

            CREATE INDEX IF NOT EXISTS ix_meme_alias ON meme(alias);
            CREATE INDEX IF NOT EXISTS ix_meme_alias_meme_id ON meme_alias(meme_id);
            CREATE INDEX IF NOT EXISTS ix_meme_alias_user_id ON meme_alias(user_id);
            CREATE INDEX IF NOT EXISTS ix_user_alias_alias ON user_alias(alias);
            CREATE INDEX IF NOT EXISTS ix_user_alias_user_id ON user_alias(user_id);

            -- link_user_alias relies on this for ON CONFLICT
            CREATE UNIQUE INDEX IF NOT EXISTS ux_user_alias_user_alias
                ON user_alias(user_id, alias);
            ",
        )
        .context("Failed to run alias store migrations")?;

        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().await;
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to count rows in {}", table))
        };

        Ok(StoreStats {
            memes: count("meme")?,
            meme_aliases: count("meme_alias")?,
            user_aliases: count("user_alias")?,
        })
    }
}

#[async_trait]
impl AliasStore for SqliteStore {
    async fn resolve(&self, alias: &str, requester: UserId) -> StoreResult<Option<Meme>> {
        self.find_meme(alias, requester).await
    }

    async fn register_alias(
        &self,
        alias: &str,
        meme: &NewMeme,
        owner: UserId,
    ) -> StoreResult<i64> {
        self.save_scoped_meme(alias, meme, owner).await
    }

    async fn link_user_alias(&self, alias: &str, user: UserId) -> StoreResult<()> {
        self.add_user_alias(alias, user).await
    }

    async fn user_aliases(&self, user: UserId) -> StoreResult<Vec<String>> {
        Ok(self
            .list_user_aliases(user)
            .await?
            .into_iter()
            .map(|row| row.alias)
            .collect())
    }
}

/// Telegram user ids fit in 52 bits, so the cast to SQLite's INTEGER is lossless.
pub(crate) fn user_key(user: UserId) -> i64 {
    user.0 as i64
}
