use crate::app::WardenApp;
use tracing::{info, warn};
use warden_core::error::Result;
use warden_core::supervisor::{StartOutcome, StopOutcome};

pub async fn run_start(app: &WardenApp, id: &str) -> Result<()> {
    info!("▶️  启动服务器 {}...", id);
    let outcome = app.registry.start(id).await?;
    report_start(id, &outcome);

    if outcome.is_confirmed() {
        info!("💡 定时备份只在 daemon 模式下持续运行");
    }
    Ok(())
}

pub async fn run_stop(app: &WardenApp, id: &str) -> Result<()> {
    info!("⏹️  停止服务器 {}...", id);
    // 单次命令没有启动记录，先按进程表同步实际状态
    app.registry.supervisor(id)?.adopt_running().await;

    let outcome = app.registry.stop(id).await?;
    report_stop(id, &outcome);
    Ok(())
}

pub async fn run_exec(app: &WardenApp, id: &str, command: &str) -> Result<()> {
    info!("⌨️  {} > {}", id, command);
    let reply = app.registry.send_command(id, command).await?;
    if reply.trim().is_empty() {
        info!("   ✅ 命令已执行");
    } else {
        for line in reply.lines() {
            info!("   {}", line);
        }
    }
    Ok(())
}

pub fn report_start(id: &str, outcome: &StartOutcome) {
    match outcome {
        StartOutcome::Started { .. } | StartOutcome::Adopted => info!("   ✅ {}: {}", id, outcome),
        StartOutcome::AlreadyRunning => info!("   ℹ️  {}: {}", id, outcome),
        StartOutcome::Unconfirmed { .. } => warn!("   ⚠️  {}: {}", id, outcome),
    }
}

pub fn report_stop(id: &str, outcome: &StopOutcome) {
    match outcome {
        StopOutcome::Stopped => info!("   ✅ {}: {}", id, outcome),
        StopOutcome::NotRunning | StopOutcome::InTransition => info!("   ℹ️  {}: {}", id, outcome),
        StopOutcome::Terminated { .. } | StopOutcome::Unconfirmed { .. } => {
            warn!("   ⚠️  {}: {}", id, outcome)
        }
    }
}
