//! 聊天会话自动保存
//!
//! 每个上下文对应一段会话。消息列表变化后经 2 秒静默期写出一次；
//! 首次写入前先在当前作用域的已存会话中按上下文查找，找到则沿用其 id，
//! 保证同一作用域内每个上下文至多一段会话。
//! 防抖引擎中的实体 id 为 `<作用域>/<会话 id>`，登录、登出前后的同名会话互不干扰。

use crate::conversation::ConversationIndex;
use crate::error::Result;
use crate::model::{ContextKey, Conversation, Message, Role, Scope};
use crate::persist::AutoSaver;
use crate::persist::targets::{ConversationLocalTarget, ConversationProfileTarget};
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ChatAutoSave {
    session: Arc<SessionContext>,
    index: ConversationIndex,
    saver: AutoSaver<Conversation>,
}

impl ChatAutoSave {
    pub fn new(session: Arc<SessionContext>) -> Self {
        let window = session.config().chat_quiet_window();
        let saver = AutoSaver::<Conversation>::builder(
            "chat",
            window,
            Arc::new(ConversationLocalTarget::new(Arc::clone(&session))),
        )
        .authenticated(
            session.clone(),
            Arc::new(ConversationProfileTarget::new(Arc::clone(&session))),
        )
        .build();
        Self {
            index: ConversationIndex::new(session.clock()),
            session,
            saver,
        }
    }

    /// 以当前时钟构造一条消息
    pub fn new_message(&self, role: Role, content: impl Into<String>) -> Message {
        Message {
            role,
            content: content.into(),
            timestamp: self.session.now_millis(),
        }
    }

    /// 调度保存该上下文的完整消息列表，返回会话 id；空列表不做任何事
    pub fn schedule(&self, context: &ContextKey, messages: &[Message]) -> Option<String> {
        let last = messages.last()?;
        let scope = self.session.scope();
        if self.index.get(&scope, context).is_none() {
            let stored = self.session.load_conversations();
            self.index.find_by_context(&scope, context, &stored);
        }
        let id = self.index.resolve_id(&scope, context);
        let conversation = Conversation {
            id: id.clone(),
            messages: messages.to_vec(),
            context: context.clone(),
            created_at: self
                .index
                .created_at(&scope, context)
                .unwrap_or_else(|| self.session.now_millis()),
            last_updated: last.timestamp,
        };
        self.saver.schedule(&scope.entity_id(&id), conversation);
        Some(id)
    }

    /// 读取该上下文已保存的消息，并采纳其会话 id；没有时返回空列表
    pub fn load_for_context(&self, context: &ContextKey) -> Vec<Message> {
        let stored = self.session.load_conversations();
        match self.index.find_by_context(&self.session.scope(), context, &stored) {
            Some(conversation) => {
                debug!(
                    conversation_id = %conversation.id,
                    count = conversation.messages.len(),
                    "📖 已恢复会话"
                );
                conversation.messages.clone()
            }
            None => Vec::new(),
        }
    }

    /// 清空该上下文：放弃待保存内容、移除索引项并从当前作用域删除已存会话
    pub fn clear(&self, context: &ContextKey) -> Result<bool> {
        let scope = self.session.scope();
        let id = self.index.forget(&scope, context).or_else(|| {
            self.session
                .load_conversations()
                .into_iter()
                .find(|c| &c.context == context)
                .map(|c| c.id)
        });
        let Some(id) = id else {
            return Ok(false);
        };
        self.saver.forget(&scope.entity_id(&id));
        let removed = self.session.remove_conversation(&id)?;
        info!(conversation_id = %id, removed, "🗑️ 已清空会话");
        Ok(removed)
    }

    /// 当前作用域中该上下文已分配或已采纳的会话 id
    pub fn conversation_id(&self, context: &ContextKey) -> Option<String> {
        self.index.get(&self.session.scope(), context)
    }

    pub async fn flush_pending(&self) -> usize {
        self.saver.flush_pending().await
    }

    pub fn saver(&self) -> &AutoSaver<Conversation> {
        &self.saver
    }
}
