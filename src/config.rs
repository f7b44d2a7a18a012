//! 同步核心配置
//!
//! 加载顺序：默认值 → YAML 文件（可选）→ 环境变量覆盖。
//!
//! ```text
//! PROFILE_SYNC_PROFILE_TTL_SECS=21600
//! PROFILE_SYNC_FORM_QUIET_MS=1000
//! PROFILE_SYNC_CHAT_QUIET_MS=2000
//! PROFILE_SYNC_PERSISTENT_STORE_PATH=~/.profile-sync/local.json
//! ```

use crate::error::{ConfigError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "PROFILE_SYNC_";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// 本地持久层中用户资料的有效期（秒）
    pub profile_ttl_secs: u64,
    /// 表单自动保存的静默窗口（毫秒）
    pub form_quiet_ms: u64,
    /// 聊天记录自动保存的静默窗口（毫秒）
    pub chat_quiet_ms: u64,
    /// 持久化本地存储文件路径；为 None 时仅使用内存
    pub persistent_store_path: Option<PathBuf>,
    /// 匿名用户表单快照的存储键
    pub anonymous_form_key: String,
    /// 匿名用户会话集合的存储键
    pub anonymous_chat_key: String,
    /// 远端用户资料所在集合
    pub profile_collection: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            profile_ttl_secs: 6 * 60 * 60,
            form_quiet_ms: 1000,
            chat_quiet_ms: 2000,
            persistent_store_path: None,
            anonymous_form_key: "treatmentFormData".to_string(),
            anonymous_chat_key: "chatConversations".to_string(),
            profile_collection: "users".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: SyncConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// 从默认值出发，叠加 `PROFILE_SYNC_*` 环境变量
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// 在已有配置上叠加环境变量（会先读取 `.env`）
    pub fn with_env_overrides(self) -> Result<Self> {
        dotenv().ok();
        self.apply_vars(std::env::vars())
    }

    fn apply_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field.to_lowercase().as_str() {
                "profile_ttl_secs" => self.profile_ttl_secs = parse_u64(&key, &value)?,
                "form_quiet_ms" => self.form_quiet_ms = parse_u64(&key, &value)?,
                "chat_quiet_ms" => self.chat_quiet_ms = parse_u64(&key, &value)?,
                "persistent_store_path" => self.persistent_store_path = Some(value.into()),
                "anonymous_form_key" => self.anonymous_form_key = value,
                "anonymous_chat_key" => self.anonymous_chat_key = value,
                "profile_collection" => self.profile_collection = value,
                _ => tracing::debug!(key = %key, "忽略未知配置项"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            ("profile_ttl_secs", self.profile_ttl_secs),
            ("form_quiet_ms", self.form_quiet_ms),
            ("chat_quiet_ms", self.chat_quiet_ms),
        ];
        for (field, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        for (field, value) in [
            ("anonymous_form_key", &self.anonymous_form_key),
            ("anonymous_chat_key", &self.anonymous_chat_key),
            ("profile_collection", &self.profile_collection),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must not be empty".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn form_quiet_window(&self) -> Duration {
        Duration::from_millis(self.form_quiet_ms)
    }

    pub fn chat_quiet_window(&self) -> Duration {
        Duration::from_millis(self.chat_quiet_ms)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        ConfigError::EnvFormatError {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}
