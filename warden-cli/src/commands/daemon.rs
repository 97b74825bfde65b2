use super::backup::report_backup;
use super::server::{report_start, report_stop};
use crate::app::WardenApp;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use warden_core::ServerRegistry;
use warden_core::error::Result;

/// 守护模式下从标准输入读取的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    Start(String),
    Stop(String),
    Status,
    Backup(Option<String>),
    Help,
    Quit,
}

/// 解析一行输入；空行返回 None
pub fn parse_line(line: &str) -> Option<std::result::Result<DaemonCommand, String>> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let arg = words.next().map(str::to_string);
    if words.next().is_some() {
        return Some(Err(format!("参数过多: {line}")));
    }

    let command = match (verb.to_lowercase().as_str(), arg) {
        ("start", Some(id)) => DaemonCommand::Start(id),
        ("stop", Some(id)) => DaemonCommand::Stop(id),
        ("start" | "stop", None) => return Some(Err(format!("{verb} 需要服务器 ID"))),
        ("status", None) => DaemonCommand::Status,
        ("backup", id) => DaemonCommand::Backup(id),
        ("help" | "?", None) => DaemonCommand::Help,
        ("quit" | "exit", None) => DaemonCommand::Quit,
        _ => return Some(Err(format!("未知命令: {line}"))),
    };
    Some(Ok(command))
}

/// 常驻运行，直到 quit 或 Ctrl-C
pub async fn run_daemon(app: &WardenApp) -> Result<()> {
    let registry = app.registry.clone();
    info!("🛡️  Warden 守护模式，管理 {} 个服务器", registry.ids().len());
    show_help();

    let mut tasks = JoinSet::new();
    tasks.spawn({
        let registry = registry.clone();
        async move {
            for (id, result) in registry.autostart().await {
                match result {
                    Ok(outcome) => report_start(&id, &outcome),
                    Err(e) => error!("   ❌ {}: 自动启动失败: {}", id, e),
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到 Ctrl-C，退出守护模式");
                break;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!("后台任务异常: {}", e);
                }
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // 没有交互终端时继续运行，只能用 Ctrl-C 退出
                        info!("标准输入已关闭，继续运行定时备份，按 Ctrl-C 退出");
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!("读取标准输入失败: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };

                match parse_line(&line) {
                    None => {}
                    Some(Ok(DaemonCommand::Quit)) => break,
                    Some(Ok(command)) => dispatch(&registry, command, &mut tasks).await,
                    Some(Err(e)) => warn!("⚠️  {}，输入 help 查看可用命令", e),
                }
            }
        }
    }

    registry.disarm_all();
    tasks.abort_all();
    info!("👋 守护模式已退出，服务器进程保持运行");
    Ok(())
}

async fn dispatch(registry: &Arc<ServerRegistry>, command: DaemonCommand, tasks: &mut JoinSet<()>) {
    // start/stop/backup 可能耗时数分钟，放到后台执行
    let registry = registry.clone();
    match command {
        DaemonCommand::Start(id) => {
            tasks.spawn(async move {
                match registry.start(&id).await {
                    Ok(outcome) => report_start(&id, &outcome),
                    Err(e) => error!("   ❌ {}: 启动失败: {}", id, e),
                }
            });
        }
        DaemonCommand::Stop(id) => {
            tasks.spawn(async move {
                match registry.stop(&id).await {
                    Ok(outcome) => report_stop(&id, &outcome),
                    Err(e) => error!("   ❌ {}: 停止失败: {}", id, e),
                }
            });
        }
        DaemonCommand::Backup(id) => {
            tasks.spawn(async move {
                match registry.backup_now(id.as_deref()).await {
                    Ok(outcomes) => report_backup(&outcomes),
                    Err(e) => error!("   ❌ 备份失败: {}", e),
                }
            });
        }
        DaemonCommand::Status => {
            for report in registry.status_all().await {
                let status = &report.status;
                info!(
                    "   {} {}: {}{}，最新备份: {}",
                    if report.alive { "🟢" } else { "⚪" },
                    status.id,
                    status.state.display_name(),
                    if status.backups_armed { "，定时备份中" } else { "" },
                    report
                        .last_backup_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "无".to_string())
                );
            }
        }
        DaemonCommand::Help => show_help(),
        DaemonCommand::Quit => {}
    }
}

fn show_help() {
    info!("可用命令: start <id> | stop <id> | status | backup [id] | help | quit");
}
