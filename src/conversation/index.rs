//! 上下文到会话 id 的进程内索引
//!
//! 索引按（作用域，上下文）分区：同一作用域内同一四字段上下文在进程生命周期内只分配一次 id，
//! 匿名期间分配的 id 不会带进登录后的用户作用域。
//! 在存储中找到该上下文的既有会话时，沿用其 id 与创建时间，覆盖已生成的 id。

use crate::clock::Clock;
use crate::model::{ContextKey, Conversation, Scope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Clone)]
struct IndexEntry {
    id: String,
    created_at: u64,
}

pub struct ConversationIndex {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<(Scope, ContextKey), IndexEntry>>,
}

impl ConversationIndex {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 返回该上下文的会话 id，首次调用时分配 `conv_<毫秒>_<净化后的指纹>`
    pub fn resolve_id(&self, scope: &Scope, context: &ContextKey) -> String {
        let key = (scope.clone(), context.clone());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&key) {
            return entry.id.clone();
        }
        let now = self.clock.now_millis();
        let id = format!("conv_{now}_{}", sanitize(&context.fingerprint()));
        debug!(conversation_id = %id, scope = %scope, "🆔 分配会话 id");
        entries.insert(
            key,
            IndexEntry {
                id: id.clone(),
                created_at: now,
            },
        );
        id
    }

    /// 按存储顺序查找四字段完全相同的会话；首个匹配胜出，其 id 被索引采纳
    pub fn find_by_context<'a>(
        &self,
        scope: &Scope,
        context: &ContextKey,
        collection: &'a [Conversation],
    ) -> Option<&'a Conversation> {
        let found = collection.iter().find(|c| &c.context == context)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let adopted = IndexEntry {
            id: found.id.clone(),
            created_at: found.created_at,
        };
        if let Some(previous) = entries.insert((scope.clone(), context.clone()), adopted)
            && previous.id != found.id
        {
            debug!(old = %previous.id, new = %found.id, "沿用已存储的会话 id");
        }
        Some(found)
    }

    /// 已分配或已采纳的 id，不分配新 id
    pub fn get(&self, scope: &Scope, context: &ContextKey) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(scope.clone(), context.clone()))
            .map(|e| e.id.clone())
    }

    pub fn created_at(&self, scope: &Scope, context: &ContextKey) -> Option<u64> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(scope.clone(), context.clone()))
            .map(|e| e.created_at)
    }

    /// 移除上下文的索引项，返回原 id
    pub fn forget(&self, scope: &Scope, context: &ContextKey) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(scope.clone(), context.clone()))
            .map(|e| e.id)
    }
}

/// ASCII 字母数字以外的字符一律替换为 `_`
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{FormSnapshot, Message};
    use std::time::Duration;

    const ANON: Scope = Scope::Anonymous;

    fn ohio() -> ContextKey {
        FormSnapshot::new("Ohio", "A", "II", "Private")
    }

    fn stored(id: &str, context: ContextKey, created_at: u64) -> Conversation {
        Conversation {
            id: id.to_string(),
            messages: vec![Message::user("hi", created_at)],
            context,
            created_at,
            last_updated: created_at,
        }
    }

    #[test]
    fn test_resolve_id_is_memoized() {
        let clock = Arc::new(ManualClock::new(1_000));
        let index = ConversationIndex::new(clock.clone());
        let id = index.resolve_id(&ANON, &ohio());
        assert_eq!(id, "conv_1000_Ohio_A_II_Private");

        clock.advance(Duration::from_secs(5));
        assert_eq!(index.resolve_id(&ANON, &ohio()), id);
        assert_eq!(index.created_at(&ANON, &ohio()), Some(1_000));
    }

    #[test]
    fn test_sanitize_replaces_non_alphanumerics() {
        let index = ConversationIndex::new(Arc::new(ManualClock::new(7)));
        let ctx = FormSnapshot::new("New York", "B/2", "Süd", "");
        assert_eq!(index.resolve_id(&ANON, &ctx), "conv_7_New_York_B_2_S_d_");
    }

    #[test]
    fn test_find_by_context_adopts_first_match() {
        let index = ConversationIndex::new(Arc::new(ManualClock::new(9_999)));
        let generated = index.resolve_id(&ANON, &ohio());
        let other = FormSnapshot::new("Texas", "A", "II", "Private");
        let collection = vec![
            stored("conv_other", other, 1),
            stored("conv_first", ohio(), 2),
            stored("conv_dupe", ohio(), 3),
        ];

        let found = index.find_by_context(&ANON, &ohio(), &collection).unwrap();
        assert_eq!(found.id, "conv_first");
        assert_ne!(generated, "conv_first");
        assert_eq!(index.resolve_id(&ANON, &ohio()), "conv_first");
        assert_eq!(index.created_at(&ANON, &ohio()), Some(2));
    }

    #[test]
    fn test_partial_context_does_not_match() {
        let index = ConversationIndex::new(Arc::new(ManualClock::new(1)));
        let collection = vec![stored(
            "conv_x",
            FormSnapshot::new("Ohio", "A", "II", "Public"),
            1,
        )];
        assert!(index.find_by_context(&ANON, &ohio(), &collection).is_none());
        assert!(index.get(&ANON, &ohio()).is_none());
    }

    #[test]
    fn test_forget_allows_fresh_id() {
        let clock = Arc::new(ManualClock::new(1));
        let index = ConversationIndex::new(clock.clone());
        let first = index.resolve_id(&ANON, &ohio());
        assert_eq!(index.forget(&ANON, &ohio()), Some(first.clone()));
        clock.set(2);
        assert_ne!(index.resolve_id(&ANON, &ohio()), first);
    }

    #[test]
    fn test_scopes_are_indexed_separately() {
        let index = ConversationIndex::new(Arc::new(ManualClock::new(1)));
        let user = Scope::User("u1".to_string());
        let anonymous_id = index.resolve_id(&ANON, &ohio());
        assert!(index.get(&user, &ohio()).is_none());

        let collection = vec![stored("conv_existing", ohio(), 1)];
        index.find_by_context(&user, &ohio(), &collection).unwrap();
        assert_eq!(index.resolve_id(&user, &ohio()), "conv_existing");
        assert_eq!(index.resolve_id(&ANON, &ohio()), anonymous_id);
    }
}
