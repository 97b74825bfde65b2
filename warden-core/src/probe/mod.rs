//! 进程存活探测
//!
//! 两种探测方式：
//! - [`ProcessTableProbe`]：扫描操作系统进程表，按标识字符串匹配命令行或进程名
//! - [`StatusQueryProbe`]：协议层状态查询（Minecraft 服务器列表查询）
//!
//! 按子串匹配进程命令行是一种近似：其他恰好包含相同子串的无关进程也会被
//! 认为是受管服务器。这是有意接受的行为，标识字符串应选得足够独特。

mod status_query;

pub use status_query::{ServerListStatus, StatusQueryProbe};

use crate::config::MarkerMatch;
use crate::error::ProbeInconclusive;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use sysinfo::System;
use tracing::{debug, warn};

/// 非破坏性的存活检查
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// 是否确认存活；任何无结论的情况都返回 false
    async fn is_running(&self) -> bool;

    /// 与受管服务器匹配的进程 PID，用于强制终止
    async fn matching_pids(&self) -> Vec<u32> {
        Vec::new()
    }
}

/// 基于进程表扫描的探测
#[derive(Debug, Clone)]
pub struct ProcessTableProbe {
    marker: String,
    mode: MarkerMatch,
}

impl ProcessTableProbe {
    pub fn new(marker: impl Into<String>, mode: MarkerMatch) -> Self {
        Self {
            marker: marker.into(),
            mode,
        }
    }

    /// 在后台线程扫描进程表
    pub async fn scan(&self) -> Result<Vec<u32>, ProbeInconclusive> {
        let marker = self.marker.clone();
        let mode = self.mode;

        tokio::task::spawn_blocking(move || scan_process_table(&marker, mode))
            .await
            .map_err(|e| ProbeInconclusive::Scan(e.to_string()))
    }
}

#[async_trait]
impl ProcessProbe for ProcessTableProbe {
    async fn is_running(&self) -> bool {
        match self.scan().await {
            Ok(pids) => {
                debug!(marker = %self.marker, matched = pids.len(), "进程表扫描完成");
                !pids.is_empty()
            }
            Err(e) => {
                warn!(marker = %self.marker, error = %e, "进程表扫描无结论");
                false
            }
        }
    }

    async fn matching_pids(&self) -> Vec<u32> {
        self.scan().await.unwrap_or_default()
    }
}

/// 扫描进程表，返回所有匹配标识的 PID
///
/// 扫描期间退出或无权访问的进程只会表现为空的命令行，直接跳过。
fn scan_process_table(marker: &str, mode: MarkerMatch) -> Vec<u32> {
    let system = System::new_all();
    let own_pid = std::process::id();

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(pid, _)| pid.as_u32() != own_pid)
        .filter(|(_, process)| {
            marker_matches(marker, mode, process.name(), process.exe(), process.cmd())
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();

    pids.sort_unstable();
    pids
}

/// 判断单个进程是否匹配标识
///
/// Linux 内核记录的进程名最多 15 个字符，按进程名匹配时同时检查可执行文件名
/// 和 `argv[0]` 的文件名。
pub fn marker_matches(
    marker: &str,
    mode: MarkerMatch,
    name: &OsStr,
    exe: Option<&Path>,
    cmd: &[OsString],
) -> bool {
    match mode {
        MarkerMatch::CommandLine => cmd
            .iter()
            .any(|arg| arg.to_string_lossy().contains(marker)),
        MarkerMatch::ProcessName => {
            let marker = marker.to_lowercase();
            let contains = |candidate: &OsStr| {
                candidate.to_string_lossy().to_lowercase().contains(&marker)
            };

            contains(name)
                || exe.and_then(Path::file_name).is_some_and(contains)
                || cmd
                    .first()
                    .and_then(|arg0| Path::new(arg0).file_name())
                    .is_some_and(contains)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_command_line_match() {
        let cmd = args(&["java", "-Xmx4G", "-jar", "/srv/mc/server.jar", "nogui"]);
        assert!(marker_matches(
            "server.jar",
            MarkerMatch::CommandLine,
            OsStr::new("java"),
            None,
            &cmd
        ));
        assert!(!marker_matches(
            "paper.jar",
            MarkerMatch::CommandLine,
            OsStr::new("java"),
            None,
            &cmd
        ));
    }

    #[test]
    fn test_inaccessible_process_has_no_match() {
        // 无权读取命令行的进程只有空参数列表
        assert!(!marker_matches(
            "server.jar",
            MarkerMatch::CommandLine,
            OsStr::new("java"),
            None,
            &[]
        ));
    }

    #[test]
    fn test_process_name_match_is_case_insensitive() {
        assert!(marker_matches(
            "7daystodieserver",
            MarkerMatch::ProcessName,
            OsStr::new("7DaysToDieServer.x86_64"),
            None,
            &[]
        ));
        // 参数里出现标识不算匹配
        assert!(!marker_matches(
            "7daystodieserver",
            MarkerMatch::ProcessName,
            OsStr::new("bash"),
            Some(Path::new("/usr/bin/bash")),
            &args(&["bash", "-c", "7DaysToDieServer"])
        ));
    }

    #[test]
    fn test_truncated_kernel_name_falls_back_to_exe() {
        // 内核进程名被截断为 15 个字符
        let name = OsStr::new("7DaysToDieServe");
        assert!(!marker_matches("7DaysToDieServer", MarkerMatch::ProcessName, name, None, &[]));
        assert!(marker_matches(
            "7DaysToDieServer",
            MarkerMatch::ProcessName,
            name,
            Some(Path::new("/srv/7days/7DaysToDieServer.x86_64")),
            &[]
        ));
        assert!(marker_matches(
            "7DaysToDieServer",
            MarkerMatch::ProcessName,
            name,
            None,
            &args(&["./7DaysToDieServer.x86_64", "-logfile", "out.log"])
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_scan_finds_process_with_long_name() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("7DaysToDieServer.x86_64");
        std::fs::copy("/bin/sleep", &binary).unwrap();

        // 刚写完的可执行文件可能短暂处于 ETXTBSY
        let mut child = None;
        for _ in 0..20 {
            match std::process::Command::new(&binary).arg("30").spawn() {
                Ok(spawned) => {
                    child = Some(spawned);
                    break;
                }
                Err(e) if e.raw_os_error() == Some(26) => {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => panic!("spawn failed: {e}"),
            }
        }
        let mut child = child.unwrap();

        let probe = ProcessTableProbe::new("7DaysToDieServer", MarkerMatch::ProcessName);
        let pids = probe.matching_pids().await;
        let found = pids.contains(&child.id());

        child.kill().unwrap();
        child.wait().unwrap();
        assert!(found, "pid {} not in {pids:?}", child.id());
    }

    #[tokio::test]
    async fn test_scan_with_unique_marker_finds_nothing() {
        let probe = ProcessTableProbe::new(
            "warden-marker-that-no-process-has-3f9a",
            MarkerMatch::CommandLine,
        );
        assert!(!probe.is_running().await);
        assert!(probe.matching_pids().await.is_empty());
    }
}
