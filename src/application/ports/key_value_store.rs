use crate::shared::error::AppError;
use async_trait::async_trait;

/// 端末ローカルの永続 KV ストア。
///
/// キャッシュ・同期キュー・コンフリクトはすべてプレフィックス付きのキーで
/// このストアに保存される。キー単位の後勝ちで、キーを跨ぐトランザクションは無い。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_item(&self, key: &str, value: String) -> Result<(), AppError>;

    async fn remove_item(&self, key: &str) -> Result<(), AppError>;

    async fn get_all_keys(&self) -> Result<Vec<String>, AppError>;

    /// 存在しないキーは `None` として入力順に返す。
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, AppError>;

    async fn multi_set(&self, entries: Vec<(String, String)>) -> Result<(), AppError>;

    async fn multi_remove(&self, keys: &[String]) -> Result<(), AppError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let keys = self.get_all_keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}
