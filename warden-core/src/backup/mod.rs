//! 存档备份
//!
//! 每个受管服务器对应一个 [`BackupHandler`]，负责把存档目录打包成 ZIP。
//! 归档先写入备份根目录下的 `.staging`，完成后再原子地重命名到
//! `<root>/<folder>/<folder>_<label>_<YYYYMMDD_HHMM>.zip`。

mod archive;
mod handler;
mod manager;
mod scheduler;

pub use archive::{archive_name, evict_expired, finalize_archive, latest_archive, list_archives};
pub use handler::DirectoryBackupHandler;
pub use manager::BackupManager;
pub use scheduler::{BackupSchedule, RetentionPolicy, ScheduleConfig};

use crate::error::SnapshotError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 单个服务器的存档快照
#[async_trait]
pub trait BackupHandler: Send + Sync {
    /// 处理器名称，用于日志和结果
    fn name(&self) -> &str;

    /// 绑定的服务器 ID
    fn server_id(&self) -> &str;

    /// 归档最终存放的目录
    fn backup_dir(&self) -> &Path;

    /// 归档文件名前缀
    fn archive_prefix(&self) -> &str;

    /// 在 `staging_dir` 中生成归档，返回归档路径
    async fn snapshot(&self, staging_dir: &Path) -> Result<PathBuf, SnapshotError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BackupStatus {
    Success(PathBuf),
    Failed(String),
    /// 该处理器已有快照在进行
    Skipped,
}

/// 一次备份的结果，用完即弃
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub handler: String,
    pub server_id: String,
    #[serde(flatten)]
    pub status: BackupStatus,
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, BackupStatus::Success(_))
    }

    pub fn archive(&self) -> Option<&Path> {
        match &self.status {
            BackupStatus::Success(path) => Some(path),
            _ => None,
        }
    }
}
