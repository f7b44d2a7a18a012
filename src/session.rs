//! 显式构造、依赖注入的会话上下文
//!
//! 持有当前登录用户、用户资料的分层缓存以及两层本地存储，
//! 由表单与聊天的自动保存器共享。登录时加载或创建资料，登出时使上一位用户的内存缓存失效。
//!
//! ```rust,no_run
//! use profile_sync::config::SyncConfig;
//! use profile_sync::session::{AuthUser, SessionContext, SignInOptions};
//! use profile_sync::storage::{InMemoryRemoteStore, LocalTiers};
//! use std::sync::Arc;
//!
//! # async fn example() -> profile_sync::error::Result<()> {
//! let session = SessionContext::builder(SyncConfig::default())
//!     .local(LocalTiers::in_memory())
//!     .remote(Arc::new(InMemoryRemoteStore::new()))
//!     .build();
//! let profile = session
//!     .sign_in(AuthUser::new("u1").email("ann@example.com"), SignInOptions::default())
//!     .await?;
//! session.sign_out();
//! # Ok(())
//! # }
//! ```

use crate::cache::{ReadOptions, TieredCache};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SessionError};
use crate::model::{Conversation, FormSnapshot, Scope, UserProfile, upsert_by_id};
use crate::persist::IdentitySource;
use crate::storage::{InMemoryRemoteStore, LocalTiers, RemoteDocumentStore, keys};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// 认证服务给出的用户信息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignInOptions {
    /// 新注册用户：只查缓存层，不向服务端确认文档是否存在
    pub is_new_user: bool,
    /// 注册时填写的显示名，优先于认证服务给出的名字
    pub display_name: Option<String>,
}

/// 会话级存储中的表单镜像
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FormMirror {
    uid: String,
    form_snapshot: FormSnapshot,
}

/// 会话级存储中的会话集合镜像
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ConversationsMirror {
    uid: String,
    conversations: Vec<Conversation>,
}

pub struct SessionContext {
    config: SyncConfig,
    local: LocalTiers,
    profiles: TieredCache<UserProfile>,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<AuthUser>>,
}

impl SessionContext {
    pub fn builder(config: SyncConfig) -> SessionContextBuilder {
        SessionContextBuilder {
            config,
            local: None,
            remote: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalTiers {
        &self.local
    }

    pub fn profiles(&self) -> &TieredCache<UserProfile> {
        &self.profiles
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|u| u.uid.clone())
    }

    /// 当前存储作用域
    pub fn scope(&self) -> Scope {
        match self.user_id() {
            Some(uid) => Scope::User(uid),
            None => Scope::Anonymous,
        }
    }

    /// 登录：依次探测内存、本地、远端副本、服务端；权威存储确认不存在时创建默认资料
    ///
    /// 服务端读不到且本地没有任何条目时返回错误，不创建资料，避免覆盖远端已有文档。
    /// 此时用户保持登录、资料未加载，资料写入会失败并回退到本地。
    /// 有未写出的自动保存时应先调用 [`SyncClient::sign_in`](crate::client::SyncClient::sign_in)。
    pub async fn sign_in(&self, user: AuthUser, options: SignInOptions) -> Result<UserProfile> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(user.clone());
        if let Some(previous) = previous
            && previous.uid != user.uid
        {
            self.profiles.invalidate(&previous.uid);
        }

        let read = ReadOptions {
            cache_only: options.is_new_user,
            ..Default::default()
        };
        match self.profiles.try_read_with(&user.uid, read).await {
            Ok(Some(hit)) => {
                info!(user_id = %user.uid, tier = ?hit.tier, "🔑 已加载用户资料");
                return Ok(hit.value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user.uid, "资料读取失败，暂不创建资料: {e}");
                return Err(e);
            }
        }

        let profile = UserProfile {
            id: user.uid.clone(),
            email: user.email.clone().unwrap_or_default(),
            display_name: options
                .display_name
                .or_else(|| user.display_name.clone())
                .unwrap_or_else(|| "User".to_string()),
            photo_url: user.photo_url.clone().unwrap_or_default(),
            created_at: self.clock.now_millis(),
            form_snapshot: None,
            conversations: None,
            last_updated: None,
        };
        self.profiles.write(&user.uid, profile.clone())?;
        info!(user_id = %user.uid, "🆕 已创建用户资料");
        Ok(profile)
    }

    /// 登出：清除当前用户并使其内存缓存失效；本地持久层保留以便下次快速登录
    ///
    /// 不会写出自动保存器中尚未到期的值；那些值在到期时因作用域已变而被丢弃。
    /// 需要先写出时使用 [`SyncClient::sign_out`](crate::client::SyncClient::sign_out)。
    pub fn sign_out(&self) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(user) = previous {
            self.profiles.invalidate(&user.uid);
            info!(user_id = %user.uid, "👋 已登出");
        }
    }

    /// 当前用户在内存中的资料
    pub fn profile(&self) -> Option<UserProfile> {
        self.profiles.peek(&self.user_id()?)
    }

    /// 绕过缓存层，从服务端重新读取当前用户资料
    pub async fn refresh_profile(&self) -> Option<UserProfile> {
        let uid = self.user_id()?;
        let options = ReadOptions {
            force_server: true,
            ..Default::default()
        };
        self.profiles.read_with(&uid, options).await.map(|hit| hit.value)
    }

    /// 把表单快照写入当前用户资料，并镜像到会话级存储
    pub fn update_form_snapshot(&self, snapshot: &FormSnapshot) -> Result<()> {
        let (uid, mut profile) = self.loaded_profile()?;
        profile.form_snapshot = Some(snapshot.clone());
        profile.last_updated = Some(self.clock.now_millis());
        self.profiles.write(&uid, profile)?;

        let mirror = FormMirror {
            uid: uid.clone(),
            form_snapshot: snapshot.clone(),
        };
        if let Err(e) = self.local.session.set(&keys::session_form(&uid), &mirror) {
            warn!(user_id = %uid, "表单镜像写入失败: {e}");
        }
        Ok(())
    }

    /// 按 id 插入或替换当前用户资料中的会话，并镜像整个集合
    pub fn update_conversation(&self, conversation: &Conversation) -> Result<()> {
        let (uid, mut profile) = self.loaded_profile()?;
        profile.upsert_conversation(conversation.clone());
        profile.last_updated = Some(self.clock.now_millis());
        let conversations = profile.conversations.clone().unwrap_or_default();
        self.profiles.write(&uid, profile)?;
        self.mirror_conversations(&uid, conversations);
        Ok(())
    }

    /// 匿名作用域：整体覆盖表单快照
    pub fn save_anonymous_form(&self, snapshot: &FormSnapshot) -> Result<()> {
        self.local
            .persistent
            .set(&self.config.anonymous_form_key, snapshot)
    }

    /// 匿名作用域：按 id 插入或替换共享会话集合中的会话；损坏的集合被整体覆盖
    pub fn save_anonymous_conversation(&self, conversation: &Conversation) -> Result<()> {
        let key = &self.config.anonymous_chat_key;
        let mut conversations: Vec<Conversation> =
            self.local.persistent.get(key).unwrap_or_default();
        upsert_by_id(&mut conversations, conversation.clone());
        self.local.persistent.set(key, &conversations)
    }

    /// 读取当前作用域的表单快照：已登录时先会话镜像后资料，匿名时读共享持久键
    pub fn load_form_snapshot(&self) -> Option<FormSnapshot> {
        match self.user_id() {
            Some(uid) => self
                .local
                .session
                .get::<FormMirror>(&keys::session_form(&uid))
                .filter(|m| m.uid == uid)
                .map(|m| m.form_snapshot)
                .or_else(|| self.profiles.peek(&uid).and_then(|p| p.form_snapshot)),
            None => self.local.persistent.get(&self.config.anonymous_form_key),
        }
    }

    /// 读取当前作用域的会话集合（保持存储顺序）
    pub fn load_conversations(&self) -> Vec<Conversation> {
        match self.user_id() {
            Some(uid) => self
                .local
                .session
                .get::<ConversationsMirror>(&keys::session_conversations(&uid))
                .filter(|m| m.uid == uid)
                .map(|m| m.conversations)
                .or_else(|| self.profiles.peek(&uid).and_then(|p| p.conversations))
                .unwrap_or_default(),
            None => self
                .local
                .persistent
                .get(&self.config.anonymous_chat_key)
                .unwrap_or_default(),
        }
    }

    /// 从当前作用域删除会话，返回是否确有删除
    pub fn remove_conversation(&self, conversation_id: &str) -> Result<bool> {
        match self.user_id() {
            Some(_) => {
                let (uid, mut profile) = self.loaded_profile()?;
                let conversations = profile.conversations.get_or_insert_with(Vec::new);
                let before = conversations.len();
                conversations.retain(|c| c.id != conversation_id);
                if conversations.len() == before {
                    return Ok(false);
                }
                let remaining = conversations.clone();
                profile.last_updated = Some(self.clock.now_millis());
                self.profiles.write(&uid, profile)?;
                self.mirror_conversations(&uid, remaining);
                Ok(true)
            }
            None => {
                let key = &self.config.anonymous_chat_key;
                let mut conversations: Vec<Conversation> =
                    self.local.persistent.get(key).unwrap_or_default();
                let before = conversations.len();
                conversations.retain(|c| c.id != conversation_id);
                if conversations.len() == before {
                    return Ok(false);
                }
                self.local.persistent.set(key, &conversations)?;
                Ok(true)
            }
        }
    }

    fn loaded_profile(&self) -> Result<(String, UserProfile)> {
        let uid = self.user_id().ok_or(SessionError::NotAuthenticated)?;
        let profile = self
            .profiles
            .peek(&uid)
            .ok_or_else(|| SessionError::ProfileNotLoaded(uid.clone()))?;
        Ok((uid, profile))
    }

    fn mirror_conversations(&self, uid: &str, conversations: Vec<Conversation>) {
        let mirror = ConversationsMirror {
            uid: uid.to_string(),
            conversations,
        };
        match self
            .local
            .session
            .set(&keys::session_conversations(uid), &mirror)
        {
            Ok(()) => debug!(user_id = %uid, "会话镜像已更新"),
            Err(e) => warn!(user_id = %uid, "会话镜像写入失败: {e}"),
        }
    }
}

impl IdentitySource for SessionContext {
    fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// [`SessionContext`] 的构建器；未指定的部件使用内存实现与系统时钟
pub struct SessionContextBuilder {
    config: SyncConfig,
    local: Option<LocalTiers>,
    remote: Option<Arc<dyn RemoteDocumentStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionContextBuilder {
    pub fn local(mut self, local: LocalTiers) -> Self {
        self.local = Some(local);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteDocumentStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SessionContext {
        let local = self.local.unwrap_or_else(LocalTiers::in_memory);
        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(InMemoryRemoteStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let profiles = TieredCache::new(
            self.config.profile_collection.clone(),
            self.config.profile_ttl(),
            local.persistent.clone(),
            remote,
            Arc::clone(&clock),
        );
        SessionContext {
            config: self.config,
            local,
            profiles,
            clock,
            current: RwLock::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use crate::clock::ManualClock;
    use crate::error::SyncError;
    use crate::model::{CacheEntry, Message};
    use crate::testing::MockRemoteStore;

    const NOW: u64 = 1_700_000_000_000;

    fn session_with(remote: Arc<MockRemoteStore>) -> SessionContext {
        SessionContext::builder(SyncConfig::default())
            .remote(remote)
            .clock(Arc::new(ManualClock::new(NOW)))
            .build()
    }

    fn conversation(id: &str, text: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            messages: vec![Message::user(text, NOW)],
            context: FormSnapshot::new("Ohio", "A", "II", "Private"),
            created_at: NOW,
            last_updated: NOW,
        }
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_default_profile() {
        let remote = Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new()));
        let session = session_with(remote.clone());
        let profile = session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        assert_eq!(profile.display_name, "User");
        assert_eq!(profile.email, "");
        assert_eq!(profile.created_at, NOW);
        assert!(session.is_authenticated());

        session.profiles().settle().await;
        let doc = remote.inner().server_doc("users", "u1").await.unwrap();
        assert_eq!(doc["displayName"], "User");
    }

    #[tokio::test]
    async fn test_new_user_skips_server_existence_check() {
        let remote = Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new()));
        let session = session_with(remote.clone());
        let options = SignInOptions {
            is_new_user: true,
            display_name: Some("Ann".to_string()),
        };
        let profile = session
            .sign_in(AuthUser::new("u1").display_name("ignored"), options)
            .await
            .unwrap();
        assert_eq!(profile.display_name, "Ann");
        assert_eq!(remote.server_reads(), 0);
    }

    #[tokio::test]
    async fn test_existing_remote_profile_is_not_overwritten() {
        let remote = Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new()));
        let stored = serde_json::json!({
            "id": "u1", "email": "ann@example.com", "displayName": "Ann",
            "photoURL": "", "createdAt": 5
        });
        remote.inner().seed("users", "u1", stored).await;
        let session = session_with(remote.clone());
        let profile = session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        assert_eq!(profile.display_name, "Ann");
        assert_eq!(remote.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_sign_out_invalidates_memory_but_keeps_local() {
        let remote = Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new()));
        let session = session_with(remote.clone());
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        session.profiles().settle().await;
        session.sign_out();
        assert!(!session.is_authenticated());
        assert!(session.profiles().peek("u1").is_none());
        assert!(
            session
                .local()
                .persistent
                .get::<CacheEntry<UserProfile>>("userData:u1")
                .is_some()
        );

        let reads_before = remote.server_reads();
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        assert_eq!(remote.server_reads(), reads_before);
    }

    #[tokio::test]
    async fn test_switching_users_invalidates_previous() {
        let session = session_with(Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new())));
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        session
            .sign_in(AuthUser::new("u2"), SignInOptions::default())
            .await
            .unwrap();
        assert!(session.profiles().peek("u1").is_none());
        assert_eq!(session.profile().unwrap().id, "u2");
    }

    #[tokio::test]
    async fn test_updates_require_loaded_profile() {
        let session = session_with(Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new())));
        let err = session
            .update_form_snapshot(&FormSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Session(SessionError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_form_update_reaches_profile_and_mirror() {
        let session = session_with(Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new())));
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        let snap = FormSnapshot::new("Ohio", "A", "II", "Private");
        session.update_form_snapshot(&snap).unwrap();

        assert_eq!(session.profile().unwrap().form_snapshot, Some(snap.clone()));
        assert_eq!(session.profile().unwrap().last_updated, Some(NOW));
        assert_eq!(session.load_form_snapshot(), Some(snap));
        assert!(session.local().session.contains("user_u1_formSnapshot"));
    }

    #[tokio::test]
    async fn test_conversation_upsert_and_remove() {
        let session = session_with(Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new())));
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        session.update_conversation(&conversation("c1", "a")).unwrap();
        session.update_conversation(&conversation("c1", "b")).unwrap();
        session.update_conversation(&conversation("c2", "c")).unwrap();

        let loaded = session.load_conversations();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].messages[0].content, "b");

        assert!(session.remove_conversation("c1").unwrap());
        assert!(!session.remove_conversation("c1").unwrap());
        assert_eq!(session.load_conversations().len(), 1);
        assert_eq!(session.profile().unwrap().conversations.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_scope_uses_shared_keys() {
        let session = session_with(Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new())));
        let snap = FormSnapshot::new("Ohio", "A", "II", "Private");
        session.save_anonymous_form(&snap).unwrap();
        session
            .save_anonymous_conversation(&conversation("c1", "hello"))
            .unwrap();
        session
            .save_anonymous_conversation(&conversation("c1", "hello again"))
            .unwrap();

        assert_eq!(session.load_form_snapshot(), Some(snap));
        let conversations = session.load_conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].messages[0].content, "hello again");
        assert!(session.local().persistent.contains("treatmentFormData"));
        assert!(session.local().persistent.contains("chatConversations"));
    }

    #[tokio::test]
    async fn test_refresh_profile_reads_server() {
        let remote = Arc::new(MockRemoteStore::new(InMemoryRemoteStore::new()));
        let session = session_with(remote.clone());
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        session.profiles().settle().await;
        remote
            .inner()
            .seed(
                "users",
                "u1",
                serde_json::json!({"id": "u1", "email": "", "displayName": "Elsewhere",
                    "photoURL": "", "createdAt": 1}),
            )
            .await;
        assert_eq!(session.profile().unwrap().display_name, "User");
        let refreshed = session.refresh_profile().await.unwrap();
        assert_eq!(refreshed.display_name, "Elsewhere");
        assert_eq!(
            session.profiles().read_with("u1", ReadOptions::default()).await.unwrap().tier,
            CacheTier::Memory
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_never_overwrites_remote_profile() {
        let remote = Arc::new(MockRemoteStore::default());
        let stored = serde_json::json!({
            "id": "u1", "email": "ann@example.com", "displayName": "Ann",
            "photoURL": "", "createdAt": 5,
            "conversations": [serde_json::to_value(conversation("c_old", "earlier")).unwrap()]
        });
        remote.inner().seed("users", "u1", stored.clone()).await;
        let session = session_with(remote.clone());
        remote.fail_next_gets(1);

        let err = session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(session.profile().is_none());

        let err = session
            .update_conversation(&conversation("c_new", "later"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Session(SessionError::ProfileNotLoaded(_))));
        session.profiles().settle().await;
        assert_eq!(remote.set_calls(), 0);
        assert_eq!(remote.inner().server_doc("users", "u1").await, Some(stored));

        // 网络恢复后重新登录拿到原资料
        let profile = session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        assert_eq!(profile.display_name, "Ann");
        assert_eq!(profile.conversations.unwrap()[0].id, "c_old");
    }

    #[tokio::test]
    async fn test_scope_follows_identity() {
        let session = session_with(Arc::new(MockRemoteStore::default()));
        assert_eq!(session.scope(), Scope::Anonymous);
        session
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        assert_eq!(session.scope(), Scope::User("u1".to_string()));
        session.sign_out();
        assert_eq!(session.scope(), Scope::Anonymous);
    }
}
