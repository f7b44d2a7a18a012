//! 防抖持久化引擎
//!
//! 把一连串修改（表单编辑、新聊天消息）合并成静默期之后的一次写入。
//! 引擎对实体类型 `T` 与写入目标泛型，每个实体 id 维护独立的计时器与"上次已持久化的值"。
//!
//! ## 写入路由
//!
//! | 身份 | 主路径 | 失败时 |
//! |------|--------|--------|
//! | 已登录 | `authenticated` 目标（经分层缓存写入资料） | 回退到 `anonymous` 目标 |
//! | 匿名 | `anonymous` 目标（直接写持久级本地存储） | 记录警告，不更新已持久化值 |
//!
//! ```rust,no_run
//! use profile_sync::persist::AutoSaver;
//! use profile_sync::testing::MockTarget;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let target = Arc::new(MockTarget::<String>::new("local"));
//! let saver = AutoSaver::<String>::builder("draft", Duration::from_secs(1), target.clone()).build();
//! saver.schedule("doc-1", "h".to_string());
//! saver.schedule("doc-1", "hello".to_string());
//! tokio::time::sleep(Duration::from_secs(2)).await;
//! assert_eq!(target.write_count(), 1);
//! # }
//! ```

pub mod form;
pub mod targets;
pub mod timer;

pub use form::FormAutoSave;
pub use targets::{
    ConversationLocalTarget, ConversationProfileTarget, FormLocalTarget, FormProfileTarget,
};
pub use timer::DebounceTimer;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 写入目标
#[async_trait]
pub trait PersistTarget<T>: Send + Sync {
    /// 目标名称（仅用于日志）
    fn name(&self) -> &str;

    async fn persist(&self, entity_id: &str, value: &T) -> Result<()>;
}

/// 触发时判断走哪条写入路径
pub trait IdentitySource: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// 永远匿名
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl IdentitySource for Anonymous {
    fn is_authenticated(&self) -> bool {
        false
    }
}

struct EntityState<T> {
    timer: DebounceTimer,
    pending: Option<T>,
    last_persisted: Option<T>,
}

impl<T> Default for EntityState<T> {
    fn default() -> Self {
        Self {
            timer: DebounceTimer::new(),
            pending: None,
            last_persisted: None,
        }
    }
}

struct Inner<T> {
    label: String,
    window: Duration,
    identity: Arc<dyn IdentitySource>,
    authenticated: Option<Arc<dyn PersistTarget<T>>>,
    anonymous: Arc<dyn PersistTarget<T>>,
    entities: Mutex<HashMap<String, EntityState<T>>>,
    shutdown: CancellationToken,
}

/// 尾沿防抖的自动保存器
///
/// 静默窗口内对同一实体的多次 `schedule` 只产生一次写入，内容为最后一次的值。
/// 与上次已持久化值结构相等的 `schedule` 不产生写入。
/// 被 drop 时取消所有未到期的计时器。
pub struct AutoSaver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> AutoSaver<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn builder(
        label: impl Into<String>,
        window: Duration,
        anonymous: Arc<dyn PersistTarget<T>>,
    ) -> AutoSaverBuilder<T> {
        AutoSaverBuilder {
            label: label.into(),
            window,
            anonymous,
            authenticated: None,
            identity: Arc::new(Anonymous),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// 取消该实体已有的计时器；值有变化时布置新的计时器
    ///
    /// 取消与布置在同一把锁内完成，不会出现同一实体两个计时器并存。
    pub fn schedule(&self, entity_id: &str, value: T) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            debug!(saver = %inner.label, entity_id, "自动保存器已关闭，忽略");
            return;
        }

        let mut entities = inner.entities.lock().unwrap_or_else(PoisonError::into_inner);
        let state = entities.entry(entity_id.to_string()).or_default();
        if state.timer.cancel() {
            debug!(saver = %inner.label, entity_id, "⏱️ 重置防抖计时器");
        }
        state.pending = None;

        if state.last_persisted.as_ref() == Some(&value) {
            debug!(saver = %inner.label, entity_id, "内容未变化，跳过保存");
            return;
        }

        state.pending = Some(value);
        let worker = Arc::clone(inner);
        let id = entity_id.to_string();
        state
            .timer
            .arm(inner.window, &inner.shutdown, move |ticket| async move {
                worker.fire(&id, ticket).await;
            });
    }

    /// 立即写出所有待保存的值，返回写出的实体数
    pub async fn flush_pending(&self) -> usize {
        let due: Vec<(String, T)> = {
            let mut entities = self
                .inner
                .entities
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entities
                .iter_mut()
                .filter_map(|(id, state)| {
                    let value = state.pending.take()?;
                    state.timer.cancel();
                    Some((id.clone(), value))
                })
                .collect()
        };
        let count = due.len();
        for (id, value) in due {
            self.inner.persist(&id, value).await;
        }
        if count > 0 {
            info!(saver = %self.inner.label, count, "💾 已立即写出待保存内容");
        }
        count
    }

    /// 取消所有未到期的计时器，之后的 `schedule` 被忽略；进行中的写入不受影响
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut entities = self
            .inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut dropped = 0;
        for state in entities.values_mut() {
            if state.timer.cancel() {
                dropped += 1;
            }
            state.pending = None;
        }
        if dropped > 0 {
            debug!(saver = %self.inner.label, dropped, "🛑 自动保存器关闭，放弃未到期写入");
        }
    }

    /// 放弃某个实体的待保存值与已持久化记录
    pub fn forget(&self, entity_id: &str) {
        let mut entities = self
            .inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut state) = entities.remove(entity_id) {
            state.timer.cancel();
        }
    }

    pub fn is_pending(&self, entity_id: &str) -> bool {
        self.inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .is_some_and(|s| s.pending.is_some())
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.pending.is_some())
            .count()
    }

    pub fn last_persisted(&self, entity_id: &str) -> Option<T> {
        self.inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .and_then(|s| s.last_persisted.clone())
    }
}

impl<T> Drop for AutoSaver<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        let mut entities = self
            .inner
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for state in entities.values_mut() {
            state.timer.cancel();
        }
    }
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn fire(&self, entity_id: &str, ticket: u64) {
        let value = {
            let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(state) = entities.get_mut(entity_id) else {
                return;
            };
            if !state.timer.claim(ticket) {
                return;
            }
            state.pending.take()
        };
        if let Some(value) = value {
            self.persist(entity_id, value).await;
        }
    }

    async fn persist(&self, entity_id: &str, value: T) {
        let primary = self
            .authenticated
            .as_ref()
            .filter(|_| self.identity.is_authenticated());

        let outcome = match primary {
            Some(primary) => match primary.persist(entity_id, &value).await {
                Ok(()) => Ok(primary.name().to_string()),
                Err(e) => {
                    warn!(
                        saver = %self.label,
                        entity_id,
                        dest = primary.name(),
                        "保存失败，回退到本地: {e}"
                    );
                    self.anonymous
                        .persist(entity_id, &value)
                        .await
                        .map(|()| self.anonymous.name().to_string())
                }
            },
            None => self
                .anonymous
                .persist(entity_id, &value)
                .await
                .map(|()| self.anonymous.name().to_string()),
        };

        match outcome {
            Ok(dest) => {
                let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
                entities.entry(entity_id.to_string()).or_default().last_persisted = Some(value);
                info!(saver = %self.label, entity_id, dest = %dest, "💾 自动保存完成");
            }
            Err(e) => warn!(saver = %self.label, entity_id, "自动保存失败: {e}"),
        }
    }
}

/// [`AutoSaver`] 的构建器
pub struct AutoSaverBuilder<T> {
    label: String,
    window: Duration,
    anonymous: Arc<dyn PersistTarget<T>>,
    authenticated: Option<Arc<dyn PersistTarget<T>>>,
    identity: Arc<dyn IdentitySource>,
}

impl<T> AutoSaverBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// 设置已登录路径及其身份来源
    pub fn authenticated(
        mut self,
        identity: Arc<dyn IdentitySource>,
        target: Arc<dyn PersistTarget<T>>,
    ) -> Self {
        self.identity = identity;
        self.authenticated = Some(target);
        self
    }

    pub fn build(self) -> AutoSaver<T> {
        AutoSaver {
            inner: Arc::new(Inner {
                label: self.label,
                window: self.window,
                identity: self.identity,
                authenticated: self.authenticated,
                anonymous: self.anonymous,
                entities: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}
