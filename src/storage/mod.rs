//! 存储适配层
//!
//! | 后端 | 实现 | 生命周期 |
//! |------|------|----------|
//! | 会话级本地存储 | [`MemoryKeyValueStore`] | 会话结束即清空 |
//! | 持久级本地存储 | [`FileKeyValueStore`] | 跨重启保留 |
//! | 远端文档存储 | [`RemoteDocumentStore`] / [`InMemoryRemoteStore`] | 权威数据源 |
//!
//! 上层只通过 [`DurableStore`] 与 [`RemoteDocuments`] 访问，
//! 序列化在边界完成，读失败一律视为缺失。
//!
//! ```rust,no_run
//! use profile_sync::storage::{LocalTiers, FileKeyValueStore, MemoryKeyValueStore};
//! use profile_sync::model::FormSnapshot;
//! use std::sync::Arc;
//!
//! # fn example() -> profile_sync::error::Result<()> {
//! let tiers = LocalTiers::new(
//!     Arc::new(MemoryKeyValueStore::new()),
//!     Arc::new(FileKeyValueStore::new("~/.profile-sync/local.json")?),
//! );
//! tiers.persistent.set("treatmentFormData", &FormSnapshot::new("Ohio", "A", "II", "Private"))?;
//! let snap: Option<FormSnapshot> = tiers.persistent.get("treatmentFormData");
//! # Ok(())
//! # }
//! ```

pub mod durable;
pub mod local;
pub mod remote;

pub use durable::{DurableStore, LocalTiers, keys};
pub use local::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use remote::{InMemoryRemoteStore, RemoteDocumentStore, RemoteDocuments, RemoteSource};
