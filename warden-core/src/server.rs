use crate::config::{MarkerMatch, ServerConfig, ServerKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 受管服务器的不可变描述，由唯一的 ProcessSupervisor 持有
#[derive(Debug, Clone)]
pub struct ManagedServer {
    pub id: String,
    pub kind: ServerKind,
    pub working_dir: PathBuf,
    pub launch: Vec<String>,
    pub marker: String,
    pub match_mode: MarkerMatch,
    pub control: ControlEndpoint,
    pub data_dir: PathBuf,
    pub excludes: Vec<String>,
    pub autostart: bool,
    pub poll: PollPolicy,
}

/// 控制通道地址与凭据
#[derive(Clone)]
pub struct ControlEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub status_port: Option<u16>,
}

impl std::fmt::Debug for ControlEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"***")
            .field("status_port", &self.status_port)
            .finish()
    }
}

/// 启动与停止的轮询预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub start_attempts: u32,
    pub start_interval: Duration,
    pub stop_attempts: u32,
    pub stop_interval: Duration,
    pub terminate_timeout: Duration,
    pub io_timeout: Duration,
}

impl From<&crate::config::PollConfig> for PollPolicy {
    fn from(poll: &crate::config::PollConfig) -> Self {
        Self {
            start_attempts: poll.start_attempts,
            start_interval: Duration::from_secs(poll.start_interval_secs),
            stop_attempts: poll.stop_attempts,
            stop_interval: Duration::from_secs(poll.stop_interval_secs),
            terminate_timeout: Duration::from_secs(poll.terminate_timeout_secs),
            io_timeout: Duration::from_secs(poll.io_timeout_secs),
        }
    }
}

impl From<&ServerConfig> for ManagedServer {
    fn from(config: &ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            kind: config.kind,
            working_dir: config.working_dir.clone(),
            launch: config.launch.clone(),
            marker: config.process_marker.clone(),
            match_mode: config.match_mode(),
            control: ControlEndpoint {
                host: config.control.host.clone(),
                port: config.control_port(),
                password: config.control.password.clone(),
                status_port: config.control.status_port,
            },
            data_dir: config.data_dir.clone(),
            excludes: config.excludes(),
            autostart: config.autostart,
            poll: PollPolicy::from(&config.poll),
        }
    }
}

impl ManagedServer {
    /// 存档目录的上级目录名，用作备份子目录和归档前缀
    pub fn server_folder(&self) -> String {
        folder_name_of(&self.data_dir).unwrap_or_else(|| self.id.clone())
    }

    /// 归档文件名前缀：`<folder>_<label>`
    pub fn archive_prefix(&self) -> String {
        format!("{}_{}", self.server_folder(), self.kind.archive_label())
    }

    /// 该服务器在备份根目录下的子目录
    pub fn backup_dir(&self, backup_root: &Path) -> PathBuf {
        backup_root.join(self.server_folder())
    }
}

fn folder_name_of(data_dir: &Path) -> Option<String> {
    data_dir
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}
