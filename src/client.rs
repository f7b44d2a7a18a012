//! 面向调用方的同步客户端
//!
//! 把会话上下文与表单、聊天两个自动保存器绑在一起。登录与登出前先写出所有待保存内容，
//! 保证静默期内的修改归属于修改发生时的用户。

use crate::conversation::ChatAutoSave;
use crate::error::Result;
use crate::model::UserProfile;
use crate::persist::FormAutoSave;
use crate::session::{AuthUser, SessionContext, SignInOptions};
use std::sync::Arc;
use tracing::info;

pub struct SyncClient {
    session: Arc<SessionContext>,
    form: FormAutoSave,
    chat: ChatAutoSave,
}

impl SyncClient {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self {
            form: FormAutoSave::new(Arc::clone(&session)),
            chat: ChatAutoSave::new(Arc::clone(&session)),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn form(&self) -> &FormAutoSave {
        &self.form
    }

    pub fn chat(&self) -> &ChatAutoSave {
        &self.chat
    }

    /// 写出表单与聊天的所有待保存内容，返回写出的实体数
    pub async fn flush_pending(&self) -> usize {
        let form = self.form.flush_pending().await;
        let chat = self.chat.flush_pending().await;
        form + chat
    }

    /// 先以当前身份写出待保存内容，再登录
    pub async fn sign_in(&self, user: AuthUser, options: SignInOptions) -> Result<UserProfile> {
        let flushed = self.flush_pending().await;
        if flushed > 0 {
            info!(flushed, "切换身份前已写出待保存内容");
        }
        self.session.sign_in(user, options).await
    }

    /// 先写出待保存内容，再登出
    pub async fn sign_out(&self) {
        let flushed = self.flush_pending().await;
        if flushed > 0 {
            info!(flushed, "登出前已写出待保存内容");
        }
        self.session.sign_out();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::model::{CacheEntry, FormSnapshot, Role};
    use crate::storage::LocalTiers;
    use crate::testing::MockRemoteStore;
    use std::time::Duration;

    fn client(local: LocalTiers, remote: Arc<MockRemoteStore>) -> SyncClient {
        let session = SessionContext::builder(SyncConfig::default())
            .local(local)
            .remote(remote)
            .clock(Arc::new(ManualClock::new(1_700_000_000_000)))
            .build();
        SyncClient::new(Arc::new(session))
    }

    fn ohio() -> FormSnapshot {
        FormSnapshot::new("Ohio", "A", "II", "Private")
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_user_keeps_pending_form_with_its_owner() {
        let remote = Arc::new(MockRemoteStore::default());
        let client = client(LocalTiers::in_memory(), remote.clone());
        client
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        client.form().schedule(&ohio());

        client
            .sign_in(AuthUser::new("u2"), SignInOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        client.session().profiles().settle().await;

        assert!(client.session().profile().unwrap().form_snapshot.is_none());
        let u1 = remote.inner().server_doc("users", "u1").await.unwrap();
        assert_eq!(u1["formSnapshot"]["selectedRegion"], "Ohio");
        let u2 = remote.inner().server_doc("users", "u2").await.unwrap();
        assert!(u2.get("formSnapshot").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_writes_pending_chat_to_signed_in_user() {
        let local = LocalTiers::in_memory();
        let client = client(local.clone(), Arc::new(MockRemoteStore::default()));
        client
            .sign_in(AuthUser::new("u1"), SignInOptions::default())
            .await
            .unwrap();
        let chat = client.chat();
        chat.schedule(&ohio(), &[chat.new_message(Role::User, "private")]);

        client.sign_out().await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;

        assert!(!local.persistent.contains("chatConversations"));
        let entry: CacheEntry<UserProfile> = local.persistent.get("userData:u1").unwrap();
        let conversations = entry.value.conversations.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].messages[0].content, "private");
    }
}
