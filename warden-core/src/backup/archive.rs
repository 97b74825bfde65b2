use crate::constants::backup::{BACKUP_EXTENSION, MAX_SAME_MINUTE_SEQUENCE, TIMESTAMP_FORMAT};
use crate::error::{EvictionError, SnapshotError};
use chrono::NaiveDateTime;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// 生成归档文件名
///
/// 同一分钟内的后续归档追加 `_01`..`_99`。因为 `.` 排在 `_` 之前，
/// 带序号的名字在字典序上仍然位于同一分钟的首个归档之后。
pub fn archive_name(prefix: &str, at: NaiveDateTime, sequence: u32) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);
    if sequence == 0 {
        format!("{prefix}_{stamp}.{BACKUP_EXTENSION}")
    } else {
        format!("{prefix}_{stamp}_{sequence:02}.{BACKUP_EXTENSION}")
    }
}

/// 在目录中为给定时刻分配一个尚未使用的归档路径
fn allocate_archive_path(dir: &Path, prefix: &str, at: NaiveDateTime) -> io::Result<PathBuf> {
    (0..=MAX_SAME_MINUTE_SEQUENCE)
        .map(|seq| dir.join(archive_name(prefix, at, seq)))
        .find(|path| !path.exists())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{prefix} 在同一分钟内的归档数量已达上限"),
            )
        })
}

/// 把暂存区中的归档移动到最终位置
///
/// 暂存目录与备份目录位于同一备份根目录下，重命名是原子的。
pub fn finalize_archive(
    staged: &Path,
    dir: &Path,
    prefix: &str,
    at: NaiveDateTime,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(dir)?;
    let target = allocate_archive_path(dir, prefix, at)?;
    std::fs::rename(staged, &target)?;
    info!(archive = %target.display(), "归档已保存");
    Ok(target)
}

/// 列出目录中属于该前缀的归档，按文件名排序（即按时间）
pub fn list_archives(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let head = format!("{prefix}_");
    let tail = format!(".{BACKUP_EXTENSION}");
    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&head) && name.ends_with(&tail)
        })
        .map(|entry| entry.path())
        .collect();

    archives.sort();
    Ok(archives)
}

/// 最新的归档
pub fn latest_archive(dir: &Path, prefix: &str) -> io::Result<Option<PathBuf>> {
    Ok(list_archives(dir, prefix)?.pop())
}

/// 删除修改时间早于 `now - retention` 的归档
///
/// 单个文件删除失败只记录在返回值中，不影响其他文件。
pub fn evict_expired(
    dir: &Path,
    prefix: &str,
    retention: Duration,
    now: SystemTime,
) -> (Vec<PathBuf>, Vec<EvictionError>) {
    evict_expired_with(dir, prefix, retention, now, |path| std::fs::remove_file(path))
}

fn evict_expired_with<F>(
    dir: &Path,
    prefix: &str,
    retention: Duration,
    now: SystemTime,
    mut remove: F,
) -> (Vec<PathBuf>, Vec<EvictionError>)
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut removed = Vec::new();
    let mut failures = Vec::new();

    let archives = match list_archives(dir, prefix) {
        Ok(archives) => archives,
        Err(source) => {
            failures.push(EvictionError {
                path: dir.to_path_buf(),
                source,
            });
            return (removed, failures);
        }
    };

    for path in archives {
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // 列出后被其他人删除
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                failures.push(EvictionError { path, source });
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or_default();
        if age <= retention {
            continue;
        }

        match remove(&path) {
            Ok(()) => {
                debug!(archive = %path.display(), age_hours = age.as_secs() / 3600, "已删除过期归档");
                removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => failures.push(EvictionError { path, source }),
        }
    }

    (removed, failures)
}
