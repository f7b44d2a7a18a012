//! 记录型写入目标与可切换的身份来源，用于测试防抖引擎的路由与回退。

use crate::error::{Result, StorageError};
use crate::persist::{IdentitySource, PersistTarget};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// 记录每次成功写入的 Mock 目标；`always_failing` 后每次都返回错误
pub struct MockTarget<T> {
    name: String,
    fail: bool,
    calls: AtomicUsize,
    writes: Mutex<Vec<(String, T)>>,
}

impl<T: Clone> MockTarget<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: false,
            calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// 成功写入的 `(entity_id, value)`，按时序排列
    pub fn writes(&self) -> Vec<(String, T)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 调用总次数（含失败的）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> PersistTarget<T> for MockTarget<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, entity_id: &str, value: &T) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StorageError::IoError(format!("mock: {} 不可写", self.name)).into());
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entity_id.to_string(), value.clone()));
        Ok(())
    }
}

/// 可在测试中途切换登录状态的身份来源
#[derive(Debug, Default)]
pub struct MockIdentity {
    authenticated: AtomicBool,
}

impl MockIdentity {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
        }
    }

    pub fn set(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

impl IdentitySource for MockIdentity {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}
