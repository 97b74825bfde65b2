use crate::app::WardenApp;
use crate::project_info::version_info;
use tracing::info;
use warden_core::ServerReport;
use warden_core::error::Result;

/// 显示服务器状态
pub async fn run_status(app: &WardenApp, id: Option<&str>, json: bool) -> Result<()> {
    let reports = match id {
        Some(id) => vec![app.registry.status(id).await?],
        None => app.registry.status_all().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    info!("🛡️  Warden 状态");
    info!("==================");
    info!(
        "   版本: CLI v{} / core v{}",
        version_info::CLI_VERSION,
        version_info::CORE_VERSION
    );
    info!("   备份目录: {}", app.config.backup.root.display());

    for report in &reports {
        show_report(report);
    }
    Ok(())
}

fn show_report(report: &ServerReport) {
    let status = &report.status;
    let icon = if report.alive { "🟢" } else { "⚪" };

    info!("{} {} ({})", icon, status.id, status.kind);
    info!(
        "   守护状态: {}{}",
        status.state.display_name(),
        if status.confirmed || !report.alive { "" } else { "（未确认）" }
    );
    info!(
        "   进程: {}",
        if report.alive { "运行中" } else { "未检测到" }
    );
    if let Some(started) = status.last_started {
        info!("   上次启动: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(players) = &report.players {
        info!(
            "   玩家: {}/{}  版本: {}",
            players.players_online.unwrap_or(0),
            players.players_max.unwrap_or(0),
            players.version.as_deref().unwrap_or("未知")
        );
    }
    info!(
        "   定时备份: {}",
        if status.backups_armed { "运行中" } else { "未启动" }
    );
    match &report.last_backup_path {
        Some(path) => info!("   最新备份: {}", path.display()),
        None => info!("   最新备份: 无"),
    }
}
