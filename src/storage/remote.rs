//! 远端权威文档存储
//!
//! 只依赖三种操作：权威读取、仅本地副本读取（不走网络）、合并写入。
//! 文档以 `collection / id` 定位，内容是任意 JSON 对象。

use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// 权威读取（可能发起网络请求）
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// 只读客户端本地副本，绝不发起网络请求
    async fn get_from_local_replica(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// 合并写入：对象字段递归合并，其余值整体替换
    async fn set_merge(&self, collection: &str, id: &str, partial: Value) -> Result<()>;
}

/// 读取来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSource {
    LocalReplica,
    Server,
}

/// 类型化的远端适配器，负责文档形状校验
#[derive(Clone)]
pub struct RemoteDocuments {
    store: Arc<dyn RemoteDocumentStore>,
}

impl RemoteDocuments {
    pub fn new(store: Arc<dyn RemoteDocumentStore>) -> Self {
        Self { store }
    }

    /// 读取并校验文档
    ///
    /// 形状不符按缺失处理（`Ok(None)`）；存储本身不可达时返回错误，
    /// 调用方据此区分"文档不存在"与"暂时读不到"。
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        source: RemoteSource,
    ) -> Result<Option<T>> {
        let result = match source {
            RemoteSource::LocalReplica => self.store.get_from_local_replica(collection, id).await,
            RemoteSource::Server => self.store.get(collection, id).await,
        };
        let Some(doc) = result? else {
            return Ok(None);
        };
        match serde_json::from_value(doc) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    collection,
                    id,
                    "{}: {e}",
                    RemoteError::InvalidDocument {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    }
                );
                Ok(None)
            }
        }
    }

    pub async fn merge<T: Serialize>(&self, collection: &str, id: &str, value: &T) -> Result<()> {
        let partial = serde_json::to_value(value)?;
        self.store.set_merge(collection, id, partial).await
    }
}

/// 递归合并 JSON：双方都是对象时逐字段合并，否则用 `patch` 覆盖
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

// ── InMemoryRemoteStore ───────────────────────────────────────────────────────

type DocKey = (String, String);

/// 进程内存的远端存储，带一个模拟客户端本地副本
///
/// 权威读取命中与合并写入都会同步更新副本，与远端 SDK 的离线持久化行为一致。
pub struct InMemoryRemoteStore {
    server: RwLock<HashMap<DocKey, Value>>,
    replica: Option<RwLock<HashMap<DocKey, Value>>>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            server: RwLock::new(HashMap::new()),
            replica: Some(RwLock::new(HashMap::new())),
        }
    }

    /// 没有本地副本的客户端：副本读取总是返回 `ReplicaUnavailable`
    pub fn without_replica() -> Self {
        Self {
            server: RwLock::new(HashMap::new()),
            replica: None,
        }
    }

    /// 直接写入服务端（模拟其他设备的写入），不影响副本
    pub async fn seed(&self, collection: &str, id: &str, doc: Value) {
        self.server.write().await.insert(key(collection, id), doc);
    }

    /// 直接写入本地副本
    pub async fn seed_replica(&self, collection: &str, id: &str, doc: Value) {
        if let Some(replica) = &self.replica {
            replica.write().await.insert(key(collection, id), doc);
        }
    }

    /// 查看服务端当前文档（测试用）
    pub async fn server_doc(&self, collection: &str, id: &str) -> Option<Value> {
        self.server.read().await.get(&key(collection, id)).cloned()
    }
}

#[async_trait]
impl RemoteDocumentStore for InMemoryRemoteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let doc = self.server.read().await.get(&key(collection, id)).cloned();
        if let (Some(doc), Some(replica)) = (&doc, &self.replica) {
            replica
                .write()
                .await
                .insert(key(collection, id), doc.clone());
        }
        Ok(doc)
    }

    async fn get_from_local_replica(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let Some(replica) = &self.replica else {
            return Err(RemoteError::ReplicaUnavailable.into());
        };
        Ok(replica.read().await.get(&key(collection, id)).cloned())
    }

    async fn set_merge(&self, collection: &str, id: &str, partial: Value) -> Result<()> {
        let merged = {
            let mut server = self.server.write().await;
            let doc = server
                .entry(key(collection, id))
                .or_insert_with(|| Value::Object(Default::default()));
            merge_json(doc, partial);
            doc.clone()
        };
        if let Some(replica) = &self.replica {
            replica.write().await.insert(key(collection, id), merged);
        }
        debug!(collection, id, "☁️ 远端文档已合并写入");
        Ok(())
    }
}

fn key(collection: &str, id: &str) -> DocKey {
    (collection.to_string(), id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::FormSnapshot;
    use serde_json::json;

    #[test]
    fn test_merge_json_is_recursive_for_objects_only() {
        let mut doc = json!({"a": {"x": 1, "y": 2}, "list": [1, 2], "keep": true});
        merge_json(&mut doc, json!({"a": {"y": 3}, "list": [9]}));
        assert_eq!(doc, json!({"a": {"x": 1, "y": 3}, "list": [9], "keep": true}));
    }

    #[tokio::test]
    async fn test_server_read_fills_replica() {
        let store = InMemoryRemoteStore::new();
        store.seed("users", "u1", json!({"id": "u1"})).await;
        assert!(store.get_from_local_replica("users", "u1").await.unwrap().is_none());
        assert!(store.get("users", "u1").await.unwrap().is_some());
        assert!(store.get_from_local_replica("users", "u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_replica_is_an_error() {
        let store = InMemoryRemoteStore::without_replica();
        let err = store.get_from_local_replica("users", "u1").await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::ReplicaUnavailable)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_shape() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.seed("forms", "f1", json!({"selectedRegion": 7})).await;
        let docs = RemoteDocuments::new(store.clone());
        let fetched: Option<FormSnapshot> =
            docs.fetch("forms", "f1", RemoteSource::Server).await.unwrap();
        assert!(fetched.is_none());

        let snap = FormSnapshot::new("Ohio", "A", "II", "Private");
        docs.merge("forms", "f1", &snap).await.unwrap();
        let fetched: Option<FormSnapshot> = docs
            .fetch("forms", "f1", RemoteSource::LocalReplica)
            .await
            .unwrap();
        assert_eq!(fetched, Some(snap));
    }

    #[tokio::test]
    async fn test_fetch_surfaces_unreachable_store() {
        let docs = RemoteDocuments::new(Arc::new(InMemoryRemoteStore::without_replica()));
        let err = docs
            .fetch::<FormSnapshot>("forms", "f1", RemoteSource::LocalReplica)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::ReplicaUnavailable)));
    }
}
