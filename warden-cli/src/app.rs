use crate::cli::Commands;
use crate::commands;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use warden_core::config::AppConfig;
use warden_core::error::Result;
use warden_core::registry::ServerRegistry;

pub struct WardenApp {
    pub config: AppConfig,
    pub registry: Arc<ServerRegistry>,
}

impl WardenApp {
    /// 从指定路径或自动查找的配置初始化
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                info!("使用配置文件: {}", path.display());
                AppConfig::load_from_file(path)?
            }
            None => AppConfig::find_and_load_config()?,
        };
        Self::from_config(config)
    }

    pub fn from_config(config: AppConfig) -> Result<Self> {
        let registry = Arc::new(ServerRegistry::from_config(&config)?);
        Ok(Self { config, registry })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Start { id } => commands::run_start(self, &id).await,
            Commands::Stop { id } => commands::run_stop(self, &id).await,
            Commands::Exec { id, command } => {
                commands::run_exec(self, &id, &command.join(" ")).await
            }
            Commands::Status { id, json } => commands::run_status(self, id.as_deref(), json).await,
            Commands::Backup { id } => commands::run_backup(self, id.as_deref()).await,
            Commands::Latest { id } => commands::run_latest(self, &id),
            Commands::Daemon => commands::run_daemon(self).await,
        }
    }
}
