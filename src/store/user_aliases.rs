use teloxide::types::UserId;

use super::{user_key, SqliteStore, StoreResult};

/// A personal alias owned by one user
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct UserAlias {
    pub id: i64,
    pub user_id: i64,
    pub alias: String,
}

impl SqliteStore {
    /// Record `alias` as a personal alias of `user`; a second call is a no-op.
    pub async fn add_user_alias(&self, alias: &str, user: UserId) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO user_alias (user_id, alias) VALUES (?1, ?2)
             ON CONFLICT(user_id, alias) DO NOTHING",
            rusqlite::params![user_key(user), alias],
        )?;
        Ok(())
    }

    pub async fn list_user_aliases(&self, user: UserId) -> StoreResult<Vec<UserAlias>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, alias FROM user_alias
             WHERE user_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![user_key(user)], |row| {
                Ok(UserAlias {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    alias: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AliasStore;

    #[tokio::test]
    async fn test_link_twice_leaves_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.link_user_alias("bar", UserId(7)).await.unwrap();
        store.link_user_alias("bar", UserId(7)).await.unwrap();

        let rows = store.list_user_aliases(UserId(7)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].alias, "bar");
        assert_eq!(rows[0].user_id, 7);
    }

    #[tokio::test]
    async fn test_link_is_case_insensitive_per_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.link_user_alias("Bar", UserId(7)).await.unwrap();
        store.link_user_alias("bAR", UserId(7)).await.unwrap();

        assert_eq!(store.user_aliases(UserId(7)).await.unwrap(), vec!["Bar"]);
    }

    #[tokio::test]
    async fn test_aliases_are_per_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.link_user_alias("bar", UserId(7)).await.unwrap();
        store.link_user_alias("bar", UserId(8)).await.unwrap();
        store.link_user_alias("baz", UserId(8)).await.unwrap();

        assert_eq!(store.user_aliases(UserId(7)).await.unwrap(), vec!["bar"]);
        assert_eq!(
            store.user_aliases(UserId(8)).await.unwrap(),
            vec!["bar", "baz"]
        );
    }
}
