use crate::application::ports::KeyValueStore;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;

/// SQLite の `kv_store` テーブルを使う永続 KV ストア
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: Pool<Sqlite>,
}

impl SqliteKeyValueStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// マイグレーションを使わない環境向けにテーブルを作成する
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("key"))
            .collect())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<String, String> = HashMap::with_capacity(keys.len());
        // SQLite のバインド上限を超えないよう分割して取得する
        for chunk in keys.chunks(500) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT key, value FROM kv_store WHERE key IN (");
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            for row in rows {
                found.insert(row.get("key"), row.get("value"));
            }
        }

        Ok(keys
            .iter()
            .map(|key| (key.clone(), found.get(key).cloned()))
            .collect())
    }

    async fn multi_set(&self, entries: Vec<(String, String)>) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&key)
            .bind(&value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<(), AppError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key ASC",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("key"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> SqliteKeyValueStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteKeyValueStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_set_item_upserts() {
        let store = setup_store().await;

        store.set_item("sync_op:1", "first".into()).await.unwrap();
        store.set_item("sync_op:1", "second".into()).await.unwrap();

        assert_eq!(
            store.get_item("sync_op:1").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(store.get_all_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_multi_get_returns_missing_as_none() {
        let store = setup_store().await;
        store
            .multi_set(vec![
                ("cache_entry:a".into(), "1".into()),
                ("cache_entry:b".into(), "2".into()),
            ])
            .await
            .unwrap();

        let values = store
            .multi_get(&[
                "cache_entry:b".to_string(),
                "cache_entry:zzz".to_string(),
                "cache_entry:a".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(values[0].1.as_deref(), Some("2"));
        assert!(values[1].1.is_none());
        assert_eq!(values[2].1.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_prefix_query_does_not_treat_underscore_as_wildcard() {
        let store = setup_store().await;
        store.set_item("sync_op:1", "x".into()).await.unwrap();
        store.set_item("syncXop:2", "y".into()).await.unwrap();
        store.set_item("conflict:1", "z".into()).await.unwrap();

        let keys = store.keys_with_prefix("sync_op:").await.unwrap();
        assert_eq!(keys, vec!["sync_op:1".to_string()]);

        store.multi_remove(&keys).await.unwrap();
        assert_eq!(store.get_all_keys().await.unwrap().len(), 2);
    }
}
