//! 测试基础设施
//!
//! 在不依赖真实远端服务、不等待真实时间的情况下测试各组件。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockRemoteStore`] | 包装内存远端存储，统计读写次数，可注入写入失败与读取延迟 |
//! | [`MockTarget`] | 记录每次持久化调用，可设为总是失败，用于测试回退路径 |
//! | [`MockIdentity`] | 可中途切换的登录状态 |
//!
//! 墙钟时间由 [`ManualClock`](crate::clock::ManualClock) 控制，
//! 防抖计时器用 `#[tokio::test(start_paused = true)]` 推进。
//!
//! # 使用示例
//!
//! ```rust
//! use profile_sync::persist::AutoSaver;
//! use profile_sync::testing::{MockIdentity, MockTarget};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let local = Arc::new(MockTarget::<String>::new("local"));
//! let profile = Arc::new(MockTarget::<String>::new("profile").always_failing());
//! let saver = AutoSaver::<String>::builder("draft", Duration::from_millis(10), local.clone())
//!     .authenticated(Arc::new(MockIdentity::new(true)), profile.clone())
//!     .build();
//!
//! saver.schedule("doc-1", "hello".to_string());
//! saver.flush_pending().await;
//! assert_eq!(profile.call_count(), 1);
//! assert_eq!(local.write_count(), 1);
//! # }
//! ```

mod mock_remote;
mod mock_target;

pub use mock_remote::MockRemoteStore;
pub use mock_target::{MockIdentity, MockTarget};
