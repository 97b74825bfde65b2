use std::path::Path;
use tracing::{info, warn};
use warden_core::config::AppConfig;
use warden_core::constants::config::DEFAULT_CONFIG_FILE;
use warden_core::error::Result;

/// 写出默认配置文件
pub fn run_init(force: bool, config_path: Option<&Path>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    info!("🛡️  Warden 初始化");
    info!("==================");

    if path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: warden-cli init --force");
        return Ok(());
    }

    AppConfig::write_template(path)?;
    info!("   ✅ 创建配置文件: {}", path.display());
    info!("👉 请编辑配置中的 working_dir、launch、data_dir 和控制台密码");
    Ok(())
}
