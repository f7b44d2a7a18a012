//! 带 JSON 序列化边界的类型化存储适配器
//!
//! 读路径上的任何失败（后端读错误、JSON 损坏、形状不符）都转为 `None`，
//! 调用方永远拿到干净的 `Option`，不会看到解析异常。

use crate::config::SyncConfig;
use crate::error::{Result, StorageError};
use crate::storage::local::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct DurableStore {
    /// 仅用于日志（`session` / `persistent`）
    name: &'static str,
    backend: Arc<dyn KeyValueStore>,
}

impl DurableStore {
    pub fn new(name: &'static str, backend: Arc<dyn KeyValueStore>) -> Self {
        Self { name, backend }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(store = self.name, key = %key, "本地读取失败，按缺失处理: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(store = self.name, key = %key, "存储值无法解析，按缺失处理: {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.backend.set_item(key, raw)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove_item(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.backend.get_item(key), Ok(Some(_)))
    }
}

/// 两层本地存储：会话级（会话结束即清空）与持久级（跨重启保留）
///
/// 持久级存储在进程内被所有实体类型共享，键必须按实体类型和用户 id 命名空间化，
/// 见 [`keys`]。
#[derive(Clone)]
pub struct LocalTiers {
    pub session: DurableStore,
    pub persistent: DurableStore,
}

impl LocalTiers {
    pub fn new(session: Arc<dyn KeyValueStore>, persistent: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session: DurableStore::new("session", session),
            persistent: DurableStore::new("persistent", persistent),
        }
    }

    /// 两层都在内存中，适合测试
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryKeyValueStore::new()),
        )
    }

    /// 配置了 `persistent_store_path` 时持久层落盘，否则退化为内存
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let persistent: Arc<dyn KeyValueStore> = match &config.persistent_store_path {
            Some(path) => Arc::new(FileKeyValueStore::new(path)?),
            None => Arc::new(MemoryKeyValueStore::new()),
        };
        Ok(Self::new(Arc::new(MemoryKeyValueStore::new()), persistent))
    }
}

/// 本地存储键的命名规则
pub mod keys {
    /// 会话级存储中已登录用户的表单镜像
    pub fn session_form(user_id: &str) -> String {
        format!("user_{user_id}_formSnapshot")
    }

    /// 会话级存储中已登录用户的会话集合镜像
    pub fn session_conversations(user_id: &str) -> String {
        format!("user_{user_id}_chatConversations")
    }
}
