use std::fmt;

/// 同步核心的统一错误类型
#[derive(Debug)]
pub enum SyncError {
    /// 本地存储错误
    Storage(StorageError),
    /// 远端文档存储错误
    Remote(RemoteError),
    /// 解析错误
    Parse(ParseError),
    /// 会话状态错误
    Session(SessionError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 本地键值存储错误
#[derive(Debug)]
pub enum StorageError {
    /// 底层读写失败
    IoError(String),
    /// 序列化失败
    SerializationError(String),
    /// 存储已满或拒绝写入
    QuotaExceeded(String),
}

/// 远端文档存储错误
#[derive(Debug)]
pub enum RemoteError {
    /// 网络请求失败
    NetworkError(String),
    /// 本地副本不可用
    ReplicaUnavailable,
    /// 文档形状不符合预期
    InvalidDocument { collection: String, id: String },
}

/// 解析错误
#[derive(Debug)]
pub enum ParseError {
    /// JSON 解析错误
    JsonError(String),
}

/// 会话状态错误
#[derive(Debug)]
pub enum SessionError {
    /// 当前没有登录用户
    NotAuthenticated,
    /// 已登录但用户资料尚未加载
    ProfileNotLoaded(String),
    /// 值被调度时的作用域已不是当前作用域（登出或切换了用户）
    ScopeChanged { scheduled: String, current: String },
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 环境变量值无法解析
    EnvFormatError { key: String, value: String },
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Storage(e) => write!(f, "Storage Error: {}", e),
            SyncError::Remote(e) => write!(f, "Remote Error: {}", e),
            SyncError::Parse(e) => write!(f, "Parse Error: {}", e),
            SyncError::Session(e) => write!(f, "Session Error: {}", e),
            SyncError::Config(e) => write!(f, "Config Error: {}", e),
            SyncError::Io(e) => write!(f, "IO Error: {}", e),
            SyncError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::IoError(msg) => write!(f, "IO failure: {}", msg),
            StorageError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::QuotaExceeded(key) => write!(f, "Quota exceeded writing '{}'", key),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            RemoteError::ReplicaUnavailable => write!(f, "Local replica unavailable"),
            RemoteError::InvalidDocument { collection, id } => {
                write!(f, "Invalid document {}/{}", collection, id)
            }
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::JsonError(msg) => write!(f, "JSON parse error: {}", msg),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotAuthenticated => write!(f, "No authenticated user"),
            SessionError::ProfileNotLoaded(uid) => {
                write!(f, "Profile for user '{}' is not loaded", uid)
            }
            SessionError::ScopeChanged { scheduled, current } => {
                write!(f, "Scope changed from '{}' to '{}'", scheduled, current)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::EnvFormatError { key, value } => {
                write!(f, "Invalid value '{}' for env var {}", value, key)
            }
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for StorageError {}
impl std::error::Error for RemoteError {}
impl std::error::Error for ParseError {}
impl std::error::Error for SessionError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(ParseError::JsonError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        SyncError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err)
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        SyncError::Remote(err)
    }
}

impl From<ParseError> for SyncError {
    fn from(err: ParseError) -> Self {
        SyncError::Parse(err)
    }
}

impl From<SessionError> for SyncError {
    fn from(err: SessionError) -> Self {
        SyncError::Session(err)
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, SyncError>;
