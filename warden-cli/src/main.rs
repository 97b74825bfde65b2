use clap::Parser;
use tracing::error;
use warden_cli::{Cli, Commands, WardenApp, run_init, setup_logging};
use warden_core::WardenError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    // `init` 不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(force, cli.config.as_deref()) {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = match WardenApp::new(cli.config.as_deref()) {
        Ok(app) => app,
        Err(WardenError::ConfigNotFound) => {
            error!("❌ 未找到配置文件 (warden.toml / config.toml / .warden.toml)");
            error!("👉 请先运行 'warden-cli init' 命令来创建配置文件。");
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run_command(cli.command).await {
        error!("❌ 操作失败: {}", e);
        std::process::exit(1);
    }
}
