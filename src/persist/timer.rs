//! 可取消的一次性防抖计时器
//!
//! 每次 [`DebounceTimer::arm`] 先取消旧任务再布置新任务，并发放递增的票据。
//! 触发时任务须凭票据 [`claim`](DebounceTimer::claim)：票据过期说明已被新的布置取代，直接放弃。
//! 认领成功后句柄被释放，此后的取消不会打断正在进行的写入。
//!
//! 计时走 tokio 的时间源，测试中用 `#[tokio::test(start_paused = true)]` 即可确定性地推进。
//! 没有运行时可用时不布置任务，待保存的值留给显式的 `flush_pending`。

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Default)]
pub struct DebounceTimer {
    handle: Option<JoinHandle<()>>,
    ticket: u64,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消旧任务并布置新任务，返回本次票据；当前线程没有 tokio 运行时则返回 `None`
    ///
    /// `shutdown` 被取消时，尚未到期的任务直接退出。
    pub fn arm<F, Fut>(
        &mut self,
        delay: Duration,
        shutdown: &CancellationToken,
        on_fire: F,
    ) -> Option<u64>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("没有可用的 tokio 运行时，计时器未布置: {e}");
                return None;
            }
        };
        self.ticket += 1;
        let ticket = self.ticket;
        let task = on_fire(ticket);
        let shutdown = shutdown.clone();
        self.handle = Some(runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        }));
        Some(ticket)
    }

    /// 取消尚未认领的任务，返回是否确有任务被取消
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// 到期任务认领执行权；票据不是最新的则失败
    pub fn claim(&mut self, ticket: u64) -> bool {
        if self.ticket == ticket && self.handle.is_some() {
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}
