//! 可观测、可注入故障的远端存储，用于测试分层缓存与会话上下文。
//!
//! # 示例
//!
//! ```rust
//! use profile_sync::storage::{InMemoryRemoteStore, RemoteDocumentStore};
//! use profile_sync::testing::MockRemoteStore;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let remote = MockRemoteStore::new(InMemoryRemoteStore::new());
//! remote.fail_next_sets(1);
//!
//! assert!(remote.set_merge("users", "u1", json!({"a": 1})).await.is_err());
//! assert!(remote.set_merge("users", "u1", json!({"a": 1})).await.is_ok());
//! assert_eq!(remote.set_calls(), 2);
//! # }
//! ```

use crate::error::{RemoteError, Result};
use crate::storage::{InMemoryRemoteStore, RemoteDocumentStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 包装 [`InMemoryRemoteStore`]，按操作计数并可脚本化写入失败
pub struct MockRemoteStore {
    inner: InMemoryRemoteStore,
    server_reads: AtomicUsize,
    replica_reads: AtomicUsize,
    set_calls: AtomicUsize,
    /// 接下来若干次 `set_merge` 返回网络错误
    failing_sets: AtomicUsize,
    /// 接下来若干次权威读取返回网络错误
    failing_gets: AtomicUsize,
    /// 每次读取前的人为延迟
    read_delay: Mutex<Option<Duration>>,
    /// 按调用顺序逐次消费的写入延迟
    set_delays: Mutex<VecDeque<Duration>>,
}

impl MockRemoteStore {
    pub fn new(inner: InMemoryRemoteStore) -> Self {
        Self {
            inner,
            server_reads: AtomicUsize::new(0),
            replica_reads: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            failing_sets: AtomicUsize::new(0),
            failing_gets: AtomicUsize::new(0),
            read_delay: Mutex::new(None),
            set_delays: Mutex::new(VecDeque::new()),
        }
    }

    /// 底层存储，用于预置或检查文档
    pub fn inner(&self) -> &InMemoryRemoteStore {
        &self.inner
    }

    /// 让接下来 `n` 次合并写入失败（写入不落地）
    pub fn fail_next_sets(&self, n: usize) {
        self.failing_sets.store(n, Ordering::SeqCst);
    }

    /// 让接下来 `n` 次权威读取失败（副本读取不受影响）
    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// 为下一次尚未开始的合并写入追加一段延迟，模拟网络抖动
    pub fn delay_next_set(&self, delay: Duration) {
        self.set_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(delay);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn server_reads(&self) -> usize {
        self.server_reads.load(Ordering::SeqCst)
    }

    pub fn replica_reads(&self) -> usize {
        self.replica_reads.load(Ordering::SeqCst)
    }

    /// 合并写入调用次数（含失败的）
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let delay = *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new(InMemoryRemoteStore::new())
    }
}

#[async_trait]
impl RemoteDocumentStore for MockRemoteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.server_reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if take_one(&self.failing_gets) {
            return Err(RemoteError::NetworkError("mock: 读取超时".to_string()).into());
        }
        self.inner.get(collection, id).await
    }

    async fn get_from_local_replica(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.replica_reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.inner.get_from_local_replica(collection, id).await
    }

    async fn set_merge(&self, collection: &str, id: &str, partial: Value) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .set_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_one(&self.failing_sets) {
            return Err(RemoteError::NetworkError("mock: 连接被拒绝".to_string()).into());
        }
        self.inner.set_merge(collection, id, partial).await
    }
}

/// 计数大于零时减一并返回 true
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
