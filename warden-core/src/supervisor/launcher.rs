use crate::error::LaunchError;
use crate::server::ManagedServer;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// 发给受管进程的终止信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// 请求退出（SIGTERM）
    Terminate,
    /// 强制结束（SIGKILL）
    Kill,
}

/// 启动与结束外部进程
pub trait ProcessLauncher: Send + Sync {
    /// 启动服务器进程，返回 PID（平台无法提供时为 None）
    fn launch(&self, server: &ManagedServer) -> Result<Option<u32>, LaunchError>;

    /// 向进程发送信号，返回信号是否送达
    fn signal(&self, pid: u32, signal: StopSignal) -> bool;
}

/// 使用操作系统进程接口的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, server: &ManagedServer) -> Result<Option<u32>, LaunchError> {
        let working_dir = absolute_working_dir(&server.working_dir)?;
        let program = resolve_program(&server.launch, &working_dir)?;

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&server.launch[1..])
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // 脱离当前进程组，Ctrl-C 不会传递给游戏服务器
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        let server_id = server.id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(server = %server_id, %status, "服务器进程已退出"),
                Err(e) => warn!(server = %server_id, error = %e, "等待服务器进程失败"),
            }
        });

        Ok(pid)
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> bool {
        send_signal(pid, signal)
    }
}

/// 把工作目录转换为绝对路径
///
/// 子进程先切换目录再 exec，相对路径的程序必须基于绝对目录拼接。
pub fn absolute_working_dir(working_dir: &Path) -> Result<PathBuf, LaunchError> {
    let absolute = std::path::absolute(working_dir)
        .map_err(|_| LaunchError::MissingWorkingDir(working_dir.to_path_buf()))?;
    if !absolute.is_dir() {
        return Err(LaunchError::MissingWorkingDir(working_dir.to_path_buf()));
    }
    Ok(absolute)
}

/// 校验启动命令并解析出可执行文件路径
///
/// 含路径分隔符的程序相对于工作目录解析（结果为绝对路径），否则在 PATH 中查找。
pub fn resolve_program(launch: &[String], working_dir: &Path) -> Result<PathBuf, LaunchError> {
    let program = launch
        .first()
        .filter(|p| !p.trim().is_empty())
        .ok_or(LaunchError::EmptyCommand)?;

    let working_dir = absolute_working_dir(working_dir)?;

    if program.contains('/') || program.contains('\\') {
        let path = working_dir.join(program);
        if path.is_file() {
            return Ok(path);
        }
        return Err(LaunchError::ProgramNotFound {
            program: program.clone(),
            reason: format!("{} 不是文件", path.display()),
        });
    }

    which::which(program).map_err(|e| LaunchError::ProgramNotFound {
        program: program.clone(),
        reason: e.to_string(),
    })
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, ?signal, error = %e, "发送信号失败");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: StopSignal) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    // Windows 没有 SIGTERM，两种信号都按强制结束处理
    let _ = signal;
    system
        .process(target)
        .map(|process| process.kill())
        .unwrap_or(false)
}
