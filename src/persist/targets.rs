//! 表单与会话的具体写入目标
//!
//! `*ProfileTarget` 经 [`SessionContext`] 写入当前用户资料（分层缓存），
//! `*LocalTarget` 直接写持久级本地存储的匿名共享键。
//!
//! 实体 id 形如 `<作用域>/<键>`。到期时作用域与当前会话不一致的值不会写入当前用户，
//! 也不会落到匿名共享键；匿名作用域的值始终只写匿名共享键。

use crate::error::{Result, SessionError, SyncError};
use crate::model::{Conversation, FormSnapshot, Scope};
use crate::persist::PersistTarget;
use crate::session::SessionContext;
use async_trait::async_trait;
use std::sync::Arc;

/// 解析实体 id 中的作用域
fn scope_of(entity_id: &str) -> Result<Scope> {
    Scope::from_entity_id(entity_id)
        .ok_or_else(|| SyncError::Other(format!("实体 id 缺少作用域: {entity_id}")))
}

/// 资料写入只接受当前登录用户自己的作用域
fn require_current_user(session: &SessionContext, entity_id: &str) -> Result<()> {
    let scheduled = scope_of(entity_id)?;
    let current = session.scope();
    match scheduled {
        Scope::User(_) if scheduled == current => Ok(()),
        Scope::Anonymous => Err(SessionError::NotAuthenticated.into()),
        Scope::User(_) => Err(scope_changed(&scheduled, &current)),
    }
}

/// 匿名作用域总是可写；用户作用域仅在该用户仍登录时回退到共享键
fn allow_local(session: &SessionContext, entity_id: &str) -> Result<()> {
    let scheduled = scope_of(entity_id)?;
    let current = session.scope();
    if scheduled == Scope::Anonymous || scheduled == current {
        Ok(())
    } else {
        Err(scope_changed(&scheduled, &current))
    }
}

fn scope_changed(scheduled: &Scope, current: &Scope) -> SyncError {
    SessionError::ScopeChanged {
        scheduled: scheduled.to_string(),
        current: current.to_string(),
    }
    .into()
}

pub struct FormProfileTarget {
    session: Arc<SessionContext>,
}

impl FormProfileTarget {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PersistTarget<FormSnapshot> for FormProfileTarget {
    fn name(&self) -> &str {
        "profile"
    }

    async fn persist(&self, entity_id: &str, value: &FormSnapshot) -> Result<()> {
        require_current_user(&self.session, entity_id)?;
        self.session.update_form_snapshot(value)
    }
}

pub struct FormLocalTarget {
    session: Arc<SessionContext>,
}

impl FormLocalTarget {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PersistTarget<FormSnapshot> for FormLocalTarget {
    fn name(&self) -> &str {
        "local"
    }

    async fn persist(&self, entity_id: &str, value: &FormSnapshot) -> Result<()> {
        allow_local(&self.session, entity_id)?;
        self.session.save_anonymous_form(value)
    }
}

pub struct ConversationProfileTarget {
    session: Arc<SessionContext>,
}

impl ConversationProfileTarget {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PersistTarget<Conversation> for ConversationProfileTarget {
    fn name(&self) -> &str {
        "profile"
    }

    async fn persist(&self, entity_id: &str, value: &Conversation) -> Result<()> {
        require_current_user(&self.session, entity_id)?;
        self.session.update_conversation(value)
    }
}

pub struct ConversationLocalTarget {
    session: Arc<SessionContext>,
}

impl ConversationLocalTarget {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PersistTarget<Conversation> for ConversationLocalTarget {
    fn name(&self) -> &str {
        "local"
    }

    async fn persist(&self, entity_id: &str, value: &Conversation) -> Result<()> {
        allow_local(&self.session, entity_id)?;
        self.session.save_anonymous_conversation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::session::{AuthUser, SignInOptions};

    async fn signed_in(uid: &str) -> Arc<SessionContext> {
        let session = Arc::new(SessionContext::builder(SyncConfig::default()).build());
        session
            .sign_in(AuthUser::new(uid), SignInOptions::default())
            .await
            .unwrap();
        session
    }

    fn ohio() -> FormSnapshot {
        FormSnapshot::new("Ohio", "A", "II", "Private")
    }

    #[tokio::test]
    async fn test_profile_target_rejects_other_user() {
        let session = signed_in("u2").await;
        let target = FormProfileTarget::new(session.clone());

        let err = target.persist("user:u1/form", &ohio()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Session(SessionError::ScopeChanged { .. })
        ));
        assert!(session.profile().unwrap().form_snapshot.is_none());

        target.persist("user:u2/form", &ohio()).await.unwrap();
        assert_eq!(session.profile().unwrap().form_snapshot, Some(ohio()));
    }

    #[tokio::test]
    async fn test_local_target_drops_stale_user_scope() {
        let session = Arc::new(SessionContext::builder(SyncConfig::default()).build());
        let target = FormLocalTarget::new(session.clone());
        let key = session.config().anonymous_form_key.clone();

        assert!(target.persist("user:u1/form", &ohio()).await.is_err());
        assert!(!session.local().persistent.contains(&key));

        target.persist("anonymous/form", &ohio()).await.unwrap();
        assert_eq!(session.local().persistent.get::<FormSnapshot>(&key), Some(ohio()));
    }

    #[tokio::test]
    async fn test_unscoped_entity_id_is_rejected() {
        let session = signed_in("u1").await;
        let target = FormProfileTarget::new(session);
        let err = target.persist("form", &ohio()).await.unwrap_err();
        assert!(matches!(err, SyncError::Other(_)));
    }
}
