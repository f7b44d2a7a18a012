//! 表单快照自动保存
//!
//! 四个字段全部为空的快照不会被调度。已登录时写入用户资料，匿名时写入共享持久键。
//! 实体 id 带调度时的作用域，切换用户后到期的旧值不会写进新用户的资料。

use crate::model::{FormSnapshot, Scope};
use crate::persist::AutoSaver;
use crate::persist::targets::{FormLocalTarget, FormProfileTarget};
use crate::session::SessionContext;
use std::sync::Arc;
use tracing::debug;

/// 表单在作用域内的键
const FORM_KEY: &str = "form";

pub struct FormAutoSave {
    session: Arc<SessionContext>,
    saver: AutoSaver<FormSnapshot>,
}

impl FormAutoSave {
    pub fn new(session: Arc<SessionContext>) -> Self {
        let window = session.config().form_quiet_window();
        let saver = AutoSaver::<FormSnapshot>::builder(
            "form",
            window,
            Arc::new(FormLocalTarget::new(Arc::clone(&session))),
        )
        .authenticated(
            session.clone(),
            Arc::new(FormProfileTarget::new(Arc::clone(&session))),
        )
        .build();
        Self { session, saver }
    }

    /// 表单变化时调用
    pub fn schedule(&self, snapshot: &FormSnapshot) {
        if snapshot.is_empty() {
            debug!("表单为空，跳过自动保存");
            return;
        }
        let entity = Self::entity_id(&self.session.scope());
        self.saver.schedule(&entity, snapshot.clone());
    }

    /// 某作用域下表单在防抖引擎中的实体 id
    pub fn entity_id(scope: &Scope) -> String {
        scope.entity_id(FORM_KEY)
    }

    /// 当前作用域中已保存的快照
    pub fn load(&self) -> Option<FormSnapshot> {
        self.session.load_form_snapshot()
    }

    pub async fn flush_pending(&self) -> usize {
        self.saver.flush_pending().await
    }

    pub fn saver(&self) -> &AutoSaver<FormSnapshot> {
        &self.saver
    }
}
