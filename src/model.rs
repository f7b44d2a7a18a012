//! 同步核心的数据模型
//!
//! 所有时间戳均为 Unix 毫秒。字段名按 camelCase 序列化，与前端存储中的形状保持一致。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 带写入时间的缓存条目，整体替换，不原地修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, cached_at: u64) -> Self {
        Self { value, cached_at }
    }

    /// `now - cached_at < ttl` 时视为新鲜
    pub fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        let age = now.saturating_sub(self.cached_at);
        u128::from(age) < ttl.as_millis()
    }
}

/// 四个下拉字段组成的表单快照，同时充当会话的上下文指纹
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub selected_region: String,
    pub category: String,
    pub sub_category: String,
    pub tertiary_attribute: String,
}

/// 会话上下文与表单快照同形
pub type ContextKey = FormSnapshot;

impl FormSnapshot {
    pub fn new(
        selected_region: impl Into<String>,
        category: impl Into<String>,
        sub_category: impl Into<String>,
        tertiary_attribute: impl Into<String>,
    ) -> Self {
        Self {
            selected_region: selected_region.into(),
            category: category.into(),
            sub_category: sub_category.into(),
            tertiary_attribute: tertiary_attribute.into(),
        }
    }

    /// 四个字段全部为空
    pub fn is_empty(&self) -> bool {
        self.selected_region.is_empty()
            && self.category.is_empty()
            && self.sub_category.is_empty()
            && self.tertiary_attribute.is_empty()
    }

    /// `region-category-sub-tertiary` 形式的指纹文本
    pub fn fingerprint(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.selected_region, self.category, self.sub_category, self.tertiary_attribute
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 聊天消息，追加后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp,
        }
    }
}

/// 按上下文归档的一段对话
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub context: ContextKey,
    pub created_at: u64,
    pub last_updated: u64,
}

/// 已登录用户的资料文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_snapshot: Option<FormSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<Conversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<u64>,
}

impl UserProfile {
    /// 按 id 插入或替换会话，保持原有顺序
    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        upsert_by_id(self.conversations.get_or_insert_with(Vec::new), conversation);
    }
}

/// 在集合中按 id 替换，不存在时追加到末尾
pub fn upsert_by_id(collection: &mut Vec<Conversation>, conversation: Conversation) {
    match collection.iter_mut().find(|c| c.id == conversation.id) {
        Some(existing) => *existing = conversation,
        None => collection.push(conversation),
    }
}

/// 存储作用域：匿名共享键，或某个已登录用户的资料
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Anonymous,
    User(String),
}

impl Scope {
    /// 防抖引擎中的实体 id：`<作用域>/<键>`，键本身不含 `/`
    pub fn entity_id(&self, key: &str) -> String {
        format!("{self}/{key}")
    }

    /// 从实体 id 还原作用域
    pub fn from_entity_id(entity_id: &str) -> Option<Self> {
        let (scope, _key) = entity_id.rsplit_once('/')?;
        match scope {
            "anonymous" => Some(Scope::Anonymous),
            _ => scope
                .strip_prefix("user:")
                .filter(|uid| !uid.is_empty())
                .map(|uid| Scope::User(uid.to_string())),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Anonymous => write!(f, "anonymous"),
            Scope::User(uid) => write!(f, "user:{uid}"),
        }
    }
}
