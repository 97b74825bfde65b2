use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenError>;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("未知服务器: {0}")]
    UnknownServer(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    ControlChannel(#[from] ControlChannelError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("自定义错误: {0}")]
    Custom(String),
}

impl WardenError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// 启动外部进程失败，不重试
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("启动命令为空")]
    EmptyCommand,

    #[error("工作目录不存在: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("找不到可执行文件 {program}: {reason}")]
    ProgramNotFound { program: String, reason: String },

    #[error("启动进程失败 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// 探测无结论：按"尚未确认"处理并在预算内重试
#[derive(Error, Debug)]
pub enum ProbeInconclusive {
    #[error("状态查询超时 ({0}秒)")]
    Timeout(u64),

    #[error("状态查询 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("状态响应无效: {0}")]
    InvalidReply(String),

    #[error("进程表扫描失败: {0}")]
    Scan(String),
}

/// 控制通道错误，触发进程级强制终止
#[derive(Error, Debug)]
pub enum ControlChannelError {
    #[error("连接 {addr} 失败: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} 超时 ({timeout_secs}秒)")]
    Timeout { step: &'static str, timeout_secs: u64 },

    #[error("认证失败: {0}")]
    AuthRejected(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("通道 IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 单个备份处理器的快照失败，不影响其他处理器
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("源目录不存在: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("复制存档失败: {0}")]
    Copy(#[from] walkdir::Error),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("快照 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("快照任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 清理过期备份失败，仅记录日志
#[derive(Error, Debug)]
#[error("清理过期备份 {} 失败: {source}", path.display())]
pub struct EvictionError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
