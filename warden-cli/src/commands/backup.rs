use crate::app::WardenApp;
use tracing::{error, info, warn};
use warden_core::backup::{BackupOutcome, BackupStatus};
use warden_core::error::{Result, WardenError};

/// 立即备份
pub async fn run_backup(app: &WardenApp, id: Option<&str>) -> Result<()> {
    info!("💾 开始备份...");
    let outcomes = app.registry.backup_now(id).await?;
    report_backup(&outcomes);

    let failed = outcomes
        .iter()
        .filter(|o| matches!(o.status, BackupStatus::Failed(_)))
        .count();
    if failed > 0 {
        return Err(WardenError::custom(format!("{failed} 个备份失败")));
    }
    Ok(())
}

/// 显示最新的备份文件
pub fn run_latest(app: &WardenApp, id: &str) -> Result<()> {
    match app.registry.last_backup_path(id)? {
        Some(path) => info!("📦 {} 最新备份: {}", id, path.display()),
        None => info!("📦 {} 还没有备份", id),
    }
    Ok(())
}

pub fn report_backup(outcomes: &[BackupOutcome]) {
    if outcomes.is_empty() {
        warn!("   ⚠️  没有可备份的服务器");
    }
    for outcome in outcomes {
        match &outcome.status {
            BackupStatus::Success(path) => {
                info!("   ✅ {}: {}", outcome.handler, path.display())
            }
            BackupStatus::Failed(e) => error!("   ❌ {}: {}", outcome.handler, e),
            BackupStatus::Skipped => {
                warn!("   ⏭️  {}: 上一次备份仍在进行，已跳过", outcome.handler)
            }
        }
    }
}
