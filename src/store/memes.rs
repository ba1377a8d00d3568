use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::OptionalExtension;
use teloxide::types::UserId;

use super::{user_key, SqliteStore, StoreError, StoreResult};

/// Telegram refuses text messages longer than this.
const MAX_MESSAGE_LEN: usize = 4096;

/// How the `content` of a meme is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemeType {
    /// Raw text sent back as a message.
    Message = 0,
    /// Telegram file id of an uploaded photo.
    Photo = 1,
    /// Absolute http(s) URL of a photo hosted elsewhere.
    ExternalPhoto = 2,
}

impl std::fmt::Display for MemeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemeType::Message => write!(f, "message"),
            MemeType::Photo => write!(f, "photo"),
            MemeType::ExternalPhoto => write!(f, "external photo"),
        }
    }
}

impl ToSql for MemeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for MemeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(MemeType::Message),
            1 => Ok(MemeType::Photo),
            2 => Ok(MemeType::ExternalPhoto),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

/// A stored meme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meme {
    pub id: i64,
    pub kind: MemeType,
    pub content: String,
    pub alias: String,
}

/// Content for a meme that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeme {
    pub kind: MemeType,
    pub content: String,
}

impl NewMeme {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: MemeType::Message,
            content: text.into(),
        }
    }

    pub fn photo(file_id: impl Into<String>) -> Self {
        Self {
            kind: MemeType::Photo,
            content: file_id.into(),
        }
    }

    pub fn external_photo(url: impl Into<String>) -> Self {
        Self {
            kind: MemeType::ExternalPhoto,
            content: url.into(),
        }
    }

    /// Check that `content` makes sense for `kind`.
    pub fn validate(&self) -> StoreResult<()> {
        let reason = match self.kind {
            MemeType::Message if self.content.trim().is_empty() => Some("text is empty".to_string()),
            MemeType::Message if self.content.chars().count() > MAX_MESSAGE_LEN => Some(format!(
                "text is longer than {} characters",
                MAX_MESSAGE_LEN
            )),
            MemeType::Message => None,
            MemeType::Photo if self.content.is_empty() => Some("file id is empty".to_string()),
            MemeType::Photo if self.content.chars().any(char::is_whitespace) => {
                Some("file id contains whitespace".to_string())
            }
            MemeType::Photo => None,
            MemeType::ExternalPhoto => match url::Url::parse(&self.content) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => None,
                Ok(url) => Some(format!("unsupported URL scheme '{}'", url.scheme())),
                Err(e) => Some(format!("'{}' is not a valid URL ({})", self.content, e)),
            },
        };

        match reason {
            Some(reason) => Err(StoreError::InvalidContent {
                kind: self.kind,
                reason,
            }),
            None => Ok(()),
        }
    }
}

const MEME_COLUMNS: &str = "m.id, m.type, m.content, m.alias";

fn meme_from_row(row: &rusqlite::Row) -> rusqlite::Result<Meme> {
    Ok(Meme {
        id: row.get(0)?,
        kind: row.get(1)?,
        content: row.get(2)?,
        alias: row.get(3)?,
    })
}

/// Meme scoped to `?1` (user) under alias `?2`.
fn scoped_meme_sql() -> String {
    format!(
        "SELECT {MEME_COLUMNS} FROM meme m
         JOIN meme_alias ma ON ma.meme_id = m.id
         WHERE ma.user_id = ?1 AND m.alias = ?2
         ORDER BY m.id LIMIT 1"
    )
}

/// Shared meme under a personal alias `?2` owned by user `?1`.
fn user_alias_meme_sql() -> String {
    format!(
        "SELECT {MEME_COLUMNS} FROM user_alias ua
         JOIN meme m ON m.alias = ua.alias
         WHERE ua.user_id = ?1 AND ua.alias = ?2
           AND EXISTS (SELECT 1 FROM meme_alias ma WHERE ma.meme_id = m.id)
         ORDER BY m.id LIMIT 1"
    )
}

/// Global meme (no owner) under alias `?1`.
fn global_meme_sql() -> String {
    format!(
        "SELECT {MEME_COLUMNS} FROM meme m
         WHERE m.alias = ?1
           AND NOT EXISTS (SELECT 1 FROM meme_alias ma WHERE ma.meme_id = m.id)
         ORDER BY m.id LIMIT 1"
    )
}

impl SqliteStore {
    /// Three-tier alias lookup; see [`super::AliasStore::resolve`].
    pub async fn find_meme(&self, alias: &str, requester: UserId) -> StoreResult<Option<Meme>> {
        let conn = self.conn.lock().await;
        let user = user_key(requester);

        let scoped = conn
            .query_row(&scoped_meme_sql(), rusqlite::params![user, alias], meme_from_row)
            .optional()?;
        if scoped.is_some() {
            return Ok(scoped);
        }

        let personal = conn
            .query_row(
                &user_alias_meme_sql(),
                rusqlite::params![user, alias],
                meme_from_row,
            )
            .optional()?;
        if personal.is_some() {
            return Ok(personal);
        }

        Ok(conn
            .query_row(&global_meme_sql(), rusqlite::params![alias], meme_from_row)
            .optional()?)
    }

    /// Store `meme` under `alias` and scope it to `owner` in one transaction.
    pub async fn save_scoped_meme(
        &self,
        alias: &str,
        meme: &NewMeme,
        owner: UserId,
    ) -> StoreResult<i64> {
        meme.validate()?;

        let owner = user_key(owner);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(&scoped_meme_sql(), rusqlite::params![owner, alias], meme_from_row)
            .optional()?;
        if let Some(current) = current {
            if current.kind == meme.kind && current.content == meme.content {
                return Ok(current.id);
            }
            return Err(StoreError::DuplicateAlias {
                alias: alias.to_string(),
            });
        }

        // Only reuse rows that are already scoped; adopting a global meme would hide it
        // from everybody else.
        let reusable: Option<i64> = tx
            .query_row(
                "SELECT m.id FROM meme m
                 WHERE m.alias = ?1 AND m.type = ?2 AND m.content = ?3
                   AND EXISTS (SELECT 1 FROM meme_alias ma WHERE ma.meme_id = m.id)
                 ORDER BY m.id LIMIT 1",
                rusqlite::params![alias, meme.kind, &meme.content],
                |row| row.get(0),
            )
            .optional()?;

        let meme_id = match reusable {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO meme (type, content, alias) VALUES (?1, ?2, ?3)",
                    rusqlite::params![meme.kind, &meme.content, alias],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.execute(
            "INSERT INTO meme_alias (meme_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![meme_id, owner],
        )?;
        tx.commit()?;

        Ok(meme_id)
    }

    /// Insert a meme nobody owns. Global memes are seeded by operators, not by chat commands.
    #[cfg(test)]
    pub async fn insert_global_meme(&self, alias: &str, meme: &NewMeme) -> StoreResult<i64> {
        meme.validate()?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO meme (type, content, alias) VALUES (?1, ?2, ?3)",
            rusqlite::params![meme.kind, &meme.content, alias],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AliasStore;

    const ALICE: UserId = UserId(100);
    const BOB: UserId = UserId(200);

    // Resolution order is inferred from the meme/meme_alias/user_alias schema; these
    // tests pin that assumption rather than a behaviour observed elsewhere.

    #[tokio::test]
    async fn test_register_then_resolve_for_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .register_alias("foo", &NewMeme::message("hello"), ALICE)
            .await
            .unwrap();

        let meme = store.resolve("foo", ALICE).await.unwrap().unwrap();
        assert_eq!(meme.id, id);
        assert_eq!(meme.kind, MemeType::Message);
        assert_eq!(meme.content, "hello");
    }

    #[tokio::test]
    async fn test_scoped_meme_is_invisible_to_unrelated_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .register_alias("foo", &NewMeme::message("alice's"), ALICE)
            .await
            .unwrap();

        assert_eq!(store.resolve("foo", BOB).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrelated_user_falls_through_to_global() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .register_alias("foo", &NewMeme::message("alice's"), ALICE)
            .await
            .unwrap();
        store
            .insert_global_meme("foo", &NewMeme::message("everyone's"))
            .await
            .unwrap();

        let meme = store.resolve("foo", BOB).await.unwrap().unwrap();
        assert_eq!(meme.content, "everyone's");

        // The owner still sees their own meme first.
        let meme = store.resolve("foo", ALICE).await.unwrap().unwrap();
        assert_eq!(meme.content, "alice's");
    }

    #[tokio::test]
    async fn test_personal_alias_beats_global() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_global_meme("foo", &NewMeme::message("everyone's"))
            .await
            .unwrap();
        store
            .register_alias("foo", &NewMeme::message("alice's"), ALICE)
            .await
            .unwrap();
        store.link_user_alias("foo", BOB).await.unwrap();

        let meme = store.resolve("foo", BOB).await.unwrap().unwrap();
        assert_eq!(meme.content, "alice's");
    }

    #[tokio::test]
    async fn test_ties_resolve_to_lowest_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .insert_global_meme("dup", &NewMeme::message("one"))
            .await
            .unwrap();
        store
            .insert_global_meme("dup", &NewMeme::message("two"))
            .await
            .unwrap();

        for _ in 0..3 {
            let meme = store.resolve("dup", ALICE).await.unwrap().unwrap();
            assert_eq!(meme.id, first);
        }
    }

    #[tokio::test]
    async fn test_alias_match_ignores_case() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .register_alias("Cat", &NewMeme::photo("AgACAgIAAxkBAAI"), ALICE)
            .await
            .unwrap();

        let meme = store.resolve("cAT", ALICE).await.unwrap().unwrap();
        assert_eq!(meme.kind, MemeType::Photo);
        assert_eq!(meme.alias, "Cat");
    }

    #[tokio::test]
    async fn test_reregistering_same_content_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let meme = NewMeme::external_photo("https://example.com/cat.png");
        let first = store.register_alias("cat", &meme, ALICE).await.unwrap();
        let second = store.register_alias("cat", &meme, ALICE).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.stats().await.unwrap().meme_aliases, 1);
    }

    #[tokio::test]
    async fn test_conflicting_registration_is_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .register_alias("foo", &NewMeme::message("one"), ALICE)
            .await
            .unwrap();

        let err = store
            .register_alias("foo", &NewMeme::message("two"), ALICE)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAlias { ref alias } if alias == "foo"));

        // Nothing half-written: still exactly one meme.
        assert_eq!(store.stats().await.unwrap().memes, 1);
    }

    #[tokio::test]
    async fn test_same_content_from_two_owners_shares_the_meme_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store
            .register_alias("foo", &NewMeme::message("same"), ALICE)
            .await
            .unwrap();
        let b = store
            .register_alias("foo", &NewMeme::message("same"), BOB)
            .await
            .unwrap();

        assert_eq!(a, b);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.memes, 1);
        assert_eq!(stats.meme_aliases, 2);
    }

    #[tokio::test]
    async fn test_registration_never_adopts_global_meme() {
        let store = SqliteStore::open_in_memory().unwrap();
        let global = store
            .insert_global_meme("foo", &NewMeme::message("same"))
            .await
            .unwrap();
        let scoped = store
            .register_alias("foo", &NewMeme::message("same"), ALICE)
            .await
            .unwrap();

        assert_ne!(global, scoped);
        let meme = store.resolve("foo", BOB).await.unwrap().unwrap();
        assert_eq!(meme.id, global);
    }

    #[tokio::test]
    async fn test_concurrent_conflicting_registrations() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = NewMeme::message("first");
        let second = NewMeme::message("second");
        let (a, b) = tokio::join!(
            store.register_alias("baz", &first, ALICE),
            store.register_alias("baz", &second, ALICE),
        );

        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::DuplicateAlias { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 1);
    }

    #[tokio::test]
    async fn test_invalid_content_is_rejected_before_writing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .register_alias("foo", &NewMeme::external_photo("not a url"), ALICE)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::InvalidContent {
                kind: MemeType::ExternalPhoto,
                ..
            }
        ));
        assert_eq!(store.stats().await.unwrap().memes, 0);
    }

    #[test]
    fn test_validate_rules() {
        assert!(NewMeme::message("hi").validate().is_ok());
        assert!(NewMeme::message("   ").validate().is_err());
        assert!(NewMeme::message("x".repeat(MAX_MESSAGE_LEN + 1))
            .validate()
            .is_err());
        assert!(NewMeme::photo("AgACAgIAAxkBAAI").validate().is_ok());
        assert!(NewMeme::photo("two words").validate().is_err());
        assert!(NewMeme::photo("").validate().is_err());
        assert!(NewMeme::external_photo("https://example.com/a.jpg")
            .validate()
            .is_ok());
        assert!(NewMeme::external_photo("ftp://example.com/a.jpg")
            .validate()
            .is_err());
        assert!(NewMeme::external_photo("example.com/a.jpg")
            .validate()
            .is_err());
    }
}
