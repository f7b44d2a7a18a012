//! 本地键值存储后端
//!
//! 与浏览器 `localStorage` / `sessionStorage` 同构：字符串键、字符串值、同步读写。
//!
//! ## 内置实现
//!
//! - [`MemoryKeyValueStore`]：进程内存，生命周期即会话，充当会话级存储；也适合测试
//! - [`FileKeyValueStore`]：JSON 文件持久化，重启后仍在，充当持久级存储

use crate::error::{Result, StorageError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// 本地键值存储的统一接口
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// 删除指定 key，不存在时静默成功
    fn remove_item(&self, key: &str) -> Result<()>;
}

// ── MemoryKeyValueStore ───────────────────────────────────────────────────────

/// 进程内存存储，可选字节配额（超出时写入失败，用于模拟浏览器存储已满）
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    data: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota_bytes {
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded(key.to_string()).into());
            }
        }
        data.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ── FileKeyValueStore ─────────────────────────────────────────────────────────

/// 基于 JSON 文件的持久化键值存储
///
/// 写时立即落盘，读时从内存副本返回。存储格式：
/// ```json
/// {
///   "chatConversations": "[{\"id\":\"conv_...\", ...}]",
///   "userData:u1": "{\"value\":{...},\"cachedAt\":1700000000000}"
/// }
/// ```
pub struct FileKeyValueStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// 打开或创建存储文件，自动建父目录；文件损坏时从空状态开始
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::IoError(format!("创建目录失败: {e}")))?;
        }
        let data: BTreeMap<String, String> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::IoError(format!("读取存储文件失败: {e}")))?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("存储文件解析失败，从空状态开始: {e}");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), keys = data.len(), "🗄️ FileKeyValueStore 初始化");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| StorageError::IoError(format!("写入存储文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 本地存储已持久化");
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value);
        self.flush(&data)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.remove(key).is_some() {
            self.flush(&data)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(&s[2..]);
    }
    path.to_path_buf()
}
