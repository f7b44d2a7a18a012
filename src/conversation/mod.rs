//! 按上下文归档的聊天会话
//!
//! - [`ConversationIndex`]：上下文到会话 id 的进程内映射
//! - [`ChatAutoSave`]：消息列表的防抖保存、按上下文恢复与清空

pub mod chat;
pub mod index;

pub use chat::ChatAutoSave;
pub use index::ConversationIndex;
