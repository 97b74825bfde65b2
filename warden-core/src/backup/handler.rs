use super::BackupHandler;
use crate::error::SnapshotError;
use crate::server::ManagedServer;
use async_trait::async_trait;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// 复制存档目录再打包的备份处理器，两种服务器共用
#[derive(Debug, Clone)]
pub struct DirectoryBackupHandler {
    name: String,
    server_id: String,
    source: PathBuf,
    backup_dir: PathBuf,
    prefix: String,
    excludes: Vec<String>,
}

impl DirectoryBackupHandler {
    pub fn new(
        server_id: impl Into<String>,
        source: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        excludes: Vec<String>,
    ) -> Self {
        let server_id = server_id.into();
        Self {
            name: format!("{server_id}-backup"),
            server_id,
            source: source.into(),
            backup_dir: backup_dir.into(),
            prefix: prefix.into(),
            excludes,
        }
    }

    pub fn for_server(server: &ManagedServer, backup_root: &Path) -> Self {
        let mut handler = Self::new(
            server.id.clone(),
            server.data_dir.clone(),
            server.backup_dir(backup_root),
            server.archive_prefix(),
            server.excludes.clone(),
        );
        handler.name = format!("{}-{}", server.id, server.kind.archive_label());
        handler
    }
}

#[async_trait]
impl BackupHandler for DirectoryBackupHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn archive_prefix(&self) -> &str {
        &self.prefix
    }

    #[instrument(skip(self, staging_dir), fields(handler = %self.name))]
    async fn snapshot(&self, staging_dir: &Path) -> Result<PathBuf, SnapshotError> {
        let source = self.source.clone();
        let staging = staging_dir.to_path_buf();
        let prefix = self.prefix.clone();
        let excludes = self.excludes.clone();

        // 复制和压缩都是阻塞 IO，放到后台线程执行
        let archive = tokio::task::spawn_blocking(move || {
            snapshot_blocking(&source, &staging, &prefix, &excludes)
        })
        .await??;

        info!(archive = %archive.display(), "快照已生成");
        Ok(archive)
    }
}

fn snapshot_blocking(
    source: &Path,
    staging: &Path,
    prefix: &str,
    excludes: &[String],
) -> Result<PathBuf, SnapshotError> {
    if !source.is_dir() {
        return Err(SnapshotError::MissingSource(source.to_path_buf()));
    }
    std::fs::create_dir_all(staging)?;

    // 先复制，避免服务器写入时直接压缩得到不一致的归档；离开作用域时删除副本
    let copy = tempfile::Builder::new()
        .prefix(&format!("{prefix}-copy-"))
        .tempdir_in(staging)?;
    let copied = copy_tree(source, copy.path(), excludes)?;
    debug!(files = copied, "存档已复制到临时目录");

    let staged = tempfile::Builder::new()
        .prefix(&format!("{prefix}-"))
        .suffix(".zip.part")
        .tempfile_in(staging)?;
    zip_tree(copy.path(), staged.as_file())?;

    let (_, path) = staged.keep().map_err(|e| SnapshotError::Io(e.error))?;
    Ok(path)
}

fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            excludes.iter().any(|ex| ex.as_str() == name)
        })
        .unwrap_or(false)
}

fn is_vanished(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// 递归复制目录，跳过排除项和复制过程中消失的文件，返回复制的文件数
fn copy_tree(source: &Path, target: &Path, excludes: &[String]) -> Result<usize, SnapshotError> {
    let mut copied = 0;
    let walker = WalkDir::new(source)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.path(), excludes));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(is_vanished).unwrap_or(false) => continue,
            Err(e) => return Err(e.into()),
        };

        let relative = entry.path().strip_prefix(source)?;
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            match std::fs::copy(entry.path(), &dest) {
                Ok(_) => copied += 1,
                Err(e) if is_vanished(&e) => {
                    debug!(path = %entry.path().display(), "文件在复制期间被删除，跳过");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(copied)
}

/// 把目录内容写入 ZIP（deflate）
fn zip_tree(root: &Path, out: &File) -> Result<(), SnapshotError> {
    let mut zip = ZipWriter::new(out);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(root)?;
        // ZIP 内部统一使用 / 分隔
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}
