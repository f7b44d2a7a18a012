//! 分层缓存
//!
//! 读取按层级依次探测，命中后回填更快的层：
//!
//! | 层级 | 来源 | 说明 |
//! |------|------|------|
//! | [`CacheTier::Memory`] | 进程内 map | 命中即返回，无任何 I/O |
//! | [`CacheTier::Local`] | 持久级本地存储中的 [`CacheEntry`] | 仅在 TTL 内有效 |
//! | [`CacheTier::RemoteReplica`] | 远端 SDK 的本地副本 | 不走网络 |
//! | [`CacheTier::RemoteServer`] | 远端权威读取 | 最后手段 |
//!
//! 写入先同步更新内存，再尽力写本地持久层，最后异步合并写远端。
//! 远端失败不回滚本地层。
//!
//! ```rust,no_run
//! use profile_sync::cache::TieredCache;
//! use profile_sync::clock::SystemClock;
//! use profile_sync::model::UserProfile;
//! use profile_sync::storage::{InMemoryRemoteStore, LocalTiers};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> profile_sync::error::Result<()> {
//! let tiers = LocalTiers::in_memory();
//! let cache: TieredCache<UserProfile> = TieredCache::new(
//!     "users",
//!     Duration::from_secs(6 * 60 * 60),
//!     tiers.persistent.clone(),
//!     Arc::new(InMemoryRemoteStore::new()),
//!     Arc::new(SystemClock),
//! );
//! if let Some(profile) = cache.read("u1").await {
//!     cache.write("u1", profile)?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::model::{CacheEntry, UserProfile};
use crate::storage::{DurableStore, RemoteDocumentStore, RemoteDocuments, RemoteSource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 可进入分层缓存的文档类型
pub trait CachedDocument: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 本地持久层键的实体前缀
    const KIND: &'static str;

    fn local_key(id: &str) -> String {
        format!("{}:{id}", Self::KIND)
    }
}

impl CachedDocument for UserProfile {
    const KIND: &'static str = "userData";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Local,
    RemoteReplica,
    RemoteServer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// 跳过内存、本地与副本，直接做权威读取，并以结果覆盖各层
    pub force_server: bool,
    /// 只查缓存层，不发起权威读取
    pub cache_only: bool,
}

/// 带命中层级的读取结果
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub value: T,
    pub tier: CacheTier,
}

pub struct TieredCache<T: CachedDocument> {
    collection: String,
    ttl: Duration,
    memory: RwLock<HashMap<String, T>>,
    local: DurableStore,
    remote: RemoteDocuments,
    clock: Arc<dyn Clock>,
    /// 每个 id 最近一次远端写入；新写入先等待它完成，保证同一 id 按调用顺序落地
    in_flight: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<T: CachedDocument> TieredCache<T> {
    pub fn new(
        collection: impl Into<String>,
        ttl: Duration,
        local: DurableStore,
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collection: collection.into(),
            ttl,
            memory: RwLock::new(HashMap::new()),
            local,
            remote: RemoteDocuments::new(remote),
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn read(&self, id: &str) -> Option<T> {
        self.read_with(id, ReadOptions::default())
            .await
            .map(|hit| hit.value)
    }

    /// 按层级读取；远端不可达与不存在一样按缺失处理
    pub async fn read_with(&self, id: &str, options: ReadOptions) -> Option<CacheHit<T>> {
        match self.try_read_with(id, options).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(collection = %self.collection, id, "权威读取失败，按缺失处理: {e}");
                None
            }
        }
    }

    /// 按层级读取，区分"不存在"与"读不到"
    ///
    /// `Ok(None)` 表示权威存储确认文档不存在。权威读取失败时，若本地有过期条目则降级返回它
    /// （层级为 [`CacheTier::Local`]），否则返回错误。副本读取失败只视为该层未命中。
    pub async fn try_read_with(&self, id: &str, options: ReadOptions) -> Result<Option<CacheHit<T>>> {
        let mut stale = None;
        if !options.force_server {
            if let Some(value) = self.peek(id) {
                return Ok(Some(CacheHit {
                    value,
                    tier: CacheTier::Memory,
                }));
            }

            let key = T::local_key(id);
            if let Some(entry) = self.local.get::<CacheEntry<T>>(&key) {
                if entry.is_fresh(self.clock.now_millis(), self.ttl) {
                    return Ok(Some(self.adopt(id, entry.value, CacheTier::Local)));
                }
                debug!(key = %key, cached_at = entry.cached_at, "⌛ 本地缓存已过期");
                stale = Some(entry.value);
            }

            match self
                .remote
                .fetch::<T>(&self.collection, id, RemoteSource::LocalReplica)
                .await
            {
                Ok(Some(value)) => return Ok(Some(self.adopt(id, value, CacheTier::RemoteReplica))),
                Ok(None) => {}
                Err(e) => debug!(collection = %self.collection, id, "副本读取失败，跳过: {e}"),
            }

            if options.cache_only {
                debug!(collection = %self.collection, id, "缓存层全部未命中");
                return Ok(None);
            }
        }

        let value = match self
            .remote
            .fetch::<T>(&self.collection, id, RemoteSource::Server)
            .await
        {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(e) => {
                if let Some(value) = stale {
                    warn!(collection = %self.collection, id, "📴 远端不可达，降级使用过期本地缓存: {e}");
                    return Ok(Some(self.adopt(id, value, CacheTier::Local)));
                }
                return Err(e);
            }
        };
        if options.force_server {
            self.store_tiers(id, &value);
            info!(collection = %self.collection, id, "🔄 已按权威数据刷新缓存");
            return Ok(Some(CacheHit {
                value,
                tier: CacheTier::RemoteServer,
            }));
        }
        Ok(Some(self.adopt(id, value, CacheTier::RemoteServer)))
    }

    /// 同步更新内存，尽力写本地持久层，再异步合并写远端
    ///
    /// 需在 tokio 运行时内调用。只有值无法序列化或不在运行时内时返回错误，
    /// 此时各层均未改动。
    pub fn write(&self, id: &str, value: T) -> Result<()> {
        let partial = serde_json::to_value(&value)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Other(format!("缓存写入需要 tokio 运行时: {e}")))?;

        self.store_tiers(id, &value);

        let remote = self.remote.clone();
        let collection = self.collection.clone();
        let key = id.to_string();
        let id = id.to_string();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|_, h| !h.is_finished());
        let previous = in_flight.remove(&key);
        let handle = runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match remote.merge(&collection, &id, &partial).await {
                Ok(()) => debug!(collection = %collection, id = %id, "☁️ 远端写入完成"),
                Err(e) => warn!(collection = %collection, id = %id, "远端写入失败，本地层保留: {e}"),
            }
        });
        in_flight.insert(key, handle);
        Ok(())
    }

    /// 丢弃内存层；本地持久层保留，下次读取仍受 TTL 约束
    pub fn invalidate(&self, id: &str) {
        let removed = self
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            debug!(collection = %self.collection, id, "🧹 内存缓存已失效");
        }
    }

    pub fn invalidate_all(&self) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// 只看内存层
    pub fn peek(&self, id: &str) -> Option<T> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// 等待所有尚在进行的远端写入结束
    pub async fn settle(&self) {
        let handles: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("远端写入任务异常退出: {e}");
            }
        }
    }

    /// 低层命中后回填。若等待期间已有写入落到内存，以内存为准，不降级。
    fn adopt(&self, id: &str, value: T, tier: CacheTier) -> CacheHit<T> {
        {
            let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = memory.get(id) {
                debug!(id, ?tier, "内存层已有更新的值，忽略低层命中");
                return CacheHit {
                    value: current.clone(),
                    tier: CacheTier::Memory,
                };
            }
            memory.insert(id.to_string(), value.clone());
        }
        if tier != CacheTier::Local {
            self.store_local(id, &value);
        }
        debug!(collection = %self.collection, id, ?tier, "✅ 缓存命中");
        CacheHit { value, tier }
    }

    fn store_tiers(&self, id: &str, value: &T) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), value.clone());
        self.store_local(id, value);
    }

    fn store_local(&self, id: &str, value: &T) {
        let key = T::local_key(id);
        let entry = CacheEntry::new(value, self.clock.now_millis());
        if let Err(e) = self.local.set(&key, &entry) {
            warn!(key = %key, "写入本地缓存失败，已忽略: {e}");
        }
    }
}
