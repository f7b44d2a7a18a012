pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod model;
pub mod persist;
pub mod session;
pub mod storage;
pub mod testing;

pub mod prelude {
    pub use crate::cache::{CacheTier, ReadOptions, TieredCache};
    pub use crate::client::SyncClient;
    pub use crate::config::SyncConfig;
    pub use crate::conversation::ChatAutoSave;
    pub use crate::error::Result;
    pub use crate::model::{Conversation, FormSnapshot, Message, Role, Scope, UserProfile};
    pub use crate::persist::FormAutoSave;
    pub use crate::session::{AuthUser, SessionContext, SignInOptions};
}
