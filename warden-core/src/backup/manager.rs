use super::{BackupHandler, BackupOutcome, BackupStatus, archive};
use crate::constants::backup::{STAGING_DIR_NAME, STALE_STAGING_SECS};
use crate::error::SnapshotError;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

struct Registered {
    handler: Arc<dyn BackupHandler>,
    /// 同一处理器同时只允许一个快照
    busy: Arc<Mutex<()>>,
}

/// 备份处理器注册表
pub struct BackupManager {
    root: PathBuf,
    handlers: Vec<Registered>,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn BackupHandler>) {
        info!(handler = handler.name(), server = handler.server_id(), "注册备份处理器");
        self.handlers.push(Registered {
            handler,
            busy: Arc::new(Mutex::new(())),
        });
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// 清理暂存区中中断遗留的副本和未完成归档，返回删除的条目数
    ///
    /// 只删除长时间未修改的条目，其他进程正在写入的暂存文件不受影响。
    pub fn sweep_staging(&self) -> usize {
        sweep_stale(
            &self.staging_dir(),
            Duration::from_secs(STALE_STAGING_SECS),
            SystemTime::now(),
        )
    }

    /// 某个服务器绑定的处理器
    pub fn handlers_for<'a>(
        &'a self,
        server_id: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn BackupHandler>> + 'a {
        self.handlers
            .iter()
            .filter(move |r| r.handler.server_id() == server_id)
            .map(|r| &r.handler)
    }

    /// 对所有处理器执行备份，单个失败不会中断其他处理器
    #[instrument(skip(self))]
    pub async fn run_all(&self) -> Vec<BackupOutcome> {
        let mut outcomes = Vec::with_capacity(self.handlers.len());
        for registered in &self.handlers {
            outcomes.push(self.run_one(registered).await);
        }
        outcomes
    }

    /// 只对指定服务器的处理器执行备份
    #[instrument(skip(self))]
    pub async fn run_for(&self, server_id: &str) -> Vec<BackupOutcome> {
        let mut outcomes = Vec::new();
        for registered in self
            .handlers
            .iter()
            .filter(|r| r.handler.server_id() == server_id)
        {
            outcomes.push(self.run_one(registered).await);
        }
        outcomes
    }

    /// 指定服务器最新的归档
    pub fn latest_backup(&self, server_id: &str) -> Option<PathBuf> {
        self.handlers_for(server_id)
            .filter_map(|handler| {
                match archive::latest_archive(handler.backup_dir(), handler.archive_prefix()) {
                    Ok(latest) => latest,
                    Err(e) => {
                        warn!(handler = handler.name(), error = %e, "读取备份目录失败");
                        None
                    }
                }
            })
            .max_by(|a, b| a.file_name().cmp(&b.file_name()))
    }

    async fn run_one(&self, registered: &Registered) -> BackupOutcome {
        let handler = &registered.handler;
        let mut outcome = BackupOutcome {
            handler: handler.name().to_string(),
            server_id: handler.server_id().to_string(),
            status: BackupStatus::Skipped,
        };

        let Ok(_busy) = registered.busy.try_lock() else {
            warn!(handler = handler.name(), "上一次快照仍在进行，本次跳过");
            return outcome;
        };

        outcome.status = match self.snapshot_and_store(handler.as_ref()).await {
            Ok(path) => BackupStatus::Success(path),
            Err(e) => {
                error!(handler = handler.name(), error = %e, "备份失败");
                BackupStatus::Failed(e.to_string())
            }
        };
        outcome
    }

    async fn snapshot_and_store(&self, handler: &dyn BackupHandler) -> Result<PathBuf, SnapshotError> {
        let staging = self.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;

        let staged = handler.snapshot(&staging).await?;
        let at = Local::now().naive_local();
        let dir = handler.backup_dir().to_path_buf();
        let prefix = handler.archive_prefix().to_string();

        let result = tokio::task::spawn_blocking({
            let staged = staged.clone();
            move || archive::finalize_archive(&staged, &dir, &prefix, at)
        })
        .await?;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        result
    }
}

fn sweep_stale(staging: &Path, max_age: Duration, now: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(staging) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "已清理遗留的暂存文件");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "清理暂存文件失败"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::DirectoryBackupHandler;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct BrokenHandler {
        backup_dir: PathBuf,
    }

    #[async_trait]
    impl BackupHandler for BrokenHandler {
        fn name(&self) -> &str {
            "broken"
        }
        fn server_id(&self) -> &str {
            "beta"
        }
        fn backup_dir(&self) -> &Path {
            &self.backup_dir
        }
        fn archive_prefix(&self) -> &str {
            "Beta_save"
        }
        async fn snapshot(&self, _staging_dir: &Path) -> Result<PathBuf, SnapshotError> {
            Err(SnapshotError::MissingSource(PathBuf::from("/gone")))
        }
    }

    /// 每次快照耗时固定的处理器
    struct SlowHandler {
        backup_dir: PathBuf,
        delay: Duration,
    }

    #[async_trait]
    impl BackupHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }
        fn server_id(&self) -> &str {
            "alpha"
        }
        fn backup_dir(&self) -> &Path {
            &self.backup_dir
        }
        fn archive_prefix(&self) -> &str {
            "Alpha_world"
        }
        async fn snapshot(&self, staging_dir: &Path) -> Result<PathBuf, SnapshotError> {
            tokio::time::sleep(self.delay).await;
            let staged = tempfile::Builder::new()
                .suffix(".part")
                .tempfile_in(staging_dir)?;
            std::fs::write(staged.path(), b"data")?;
            let (_, path) = staged.keep().map_err(|e| SnapshotError::Io(e.error))?;
            Ok(path)
        }
    }

    fn alpha_handler(root: &Path) -> Arc<dyn BackupHandler> {
        let world = root.join("Alpha").join("world");
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();
        Arc::new(DirectoryBackupHandler::new(
            "alpha",
            world,
            root.join("backups").join("Alpha"),
            "Alpha_world",
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn test_run_all_isolates_failures() {
        let dir = tempdir().unwrap();
        let mut manager = BackupManager::new(dir.path().join("backups"));
        manager.register(Arc::new(BrokenHandler {
            backup_dir: dir.path().join("backups").join("Beta"),
        }));
        manager.register(alpha_handler(dir.path()));

        let outcomes = manager.run_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].status, BackupStatus::Failed(_)));
        assert_eq!(outcomes[0].server_id, "beta");

        let archive = outcomes[1].archive().unwrap();
        assert!(archive.exists());
        assert!(archive.starts_with(dir.path().join("backups").join("Alpha")));
        assert_eq!(manager.latest_backup("alpha").as_deref(), Some(archive));
        assert_eq!(manager.latest_backup("beta"), None);
    }

    #[tokio::test]
    async fn test_run_for_filters_by_server() {
        let dir = tempdir().unwrap();
        let mut manager = BackupManager::new(dir.path().join("backups"));
        manager.register(Arc::new(BrokenHandler {
            backup_dir: dir.path().join("backups").join("Beta"),
        }));
        manager.register(alpha_handler(dir.path()));

        let outcomes = manager.run_for("alpha").await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert!(manager.run_for("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_handler_is_skipped() {
        let dir = tempdir().unwrap();
        let mut manager = BackupManager::new(dir.path().join("backups"));
        manager.register(Arc::new(SlowHandler {
            backup_dir: dir.path().join("backups").join("Alpha"),
            delay: Duration::from_millis(300),
        }));
        let manager = Arc::new(manager);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_all().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = manager.run_all().await;

        assert_eq!(second[0].status, BackupStatus::Skipped);
        assert!(first.await.unwrap()[0].is_success());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_removes_stale_staging_entries() {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        assert_eq!(manager.sweep_staging(), 0);

        let staging = manager.staging_dir();
        let copy = staging.join("Alpha_world-copy-abc");
        std::fs::create_dir_all(copy.join("region")).unwrap();
        std::fs::write(copy.join("region").join("r.0.0.mca"), b"chunk").unwrap();
        let part = staging.join("Alpha_world-xyz.zip.part");
        let fresh = staging.join("Alpha_world-now.zip.part");
        std::fs::write(&part, b"half").unwrap();
        std::fs::write(&fresh, b"half").unwrap();

        let old = SystemTime::now() - Duration::from_secs(STALE_STAGING_SECS + 3600);
        for path in [&copy, &part] {
            std::fs::File::open(path).unwrap().set_modified(old).unwrap();
        }

        assert_eq!(manager.sweep_staging(), 2);
        assert!(!copy.exists());
        assert!(!part.exists());
        assert!(fresh.exists());
    }
}
