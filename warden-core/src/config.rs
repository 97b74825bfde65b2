use crate::constants::{backup, config, network, poll};
use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub backup: BackupConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    pub root: PathBuf,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// 启动未确认时是否仍然开启定时备份
    #[serde(default)]
    pub arm_on_unconfirmed_start: bool,
}

/// 受管服务器的种类，决定控制协议和归档标签
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// Java 版 Minecraft，RCON 控制
    Minecraft,
    /// 7 Days to Die，telnet 控制台
    SevenDays,
}

impl ServerKind {
    /// 归档文件名中的数据标签
    pub fn archive_label(&self) -> &'static str {
        match self {
            ServerKind::Minecraft => "world",
            ServerKind::SevenDays => "save",
        }
    }

    /// 进程标识的默认匹配方式
    pub fn default_match_mode(&self) -> MarkerMatch {
        match self {
            ServerKind::Minecraft => MarkerMatch::CommandLine,
            ServerKind::SevenDays => MarkerMatch::ProcessName,
        }
    }

    /// 控制通道的默认端口
    pub fn default_control_port(&self) -> u16 {
        match self {
            ServerKind::Minecraft => network::DEFAULT_RCON_PORT,
            ServerKind::SevenDays => network::DEFAULT_TELNET_PORT,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServerKind::Minecraft => "Minecraft",
            ServerKind::SevenDays => "7 Days to Die",
        }
    }
}

/// 进程标识字符串的匹配方式
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMatch {
    /// 任一命令行参数包含标识
    CommandLine,
    /// 可执行文件名包含标识（不区分大小写）
    ProcessName,
}

/// 单个服务器配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub kind: ServerKind,
    pub working_dir: PathBuf,
    /// 启动命令：程序及其参数
    pub launch: Vec<String>,
    pub process_marker: String,
    #[serde(default)]
    pub match_mode: Option<MarkerMatch>,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    #[serde(default)]
    pub autostart: bool,
    pub control: ControlConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

/// 控制通道配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub password: String,
    /// 协议层状态查询端口（仅 Minecraft）
    #[serde(default)]
    pub status_port: Option<u16>,
}

/// 轮询预算配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub start_attempts: u32,
    pub start_interval_secs: u64,
    pub stop_attempts: u32,
    pub stop_interval_secs: u64,
    pub terminate_timeout_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            start_attempts: poll::START_ATTEMPTS,
            start_interval_secs: poll::START_INTERVAL_SECS,
            stop_attempts: poll::STOP_ATTEMPTS,
            stop_interval_secs: poll::STOP_INTERVAL_SECS,
            terminate_timeout_secs: poll::TERMINATE_TIMEOUT_SECS,
            io_timeout_secs: poll::IO_TIMEOUT_SECS,
        }
    }
}

fn default_retention_hours() -> u64 {
    backup::DEFAULT_RETENTION_HOURS
}

fn default_interval_minutes() -> u64 {
    backup::DEFAULT_INTERVAL_MINUTES
}

fn default_initial_delay_secs() -> u64 {
    backup::DEFAULT_INITIAL_DELAY_SECS
}

fn default_host() -> String {
    network::LOCALHOST_IPV4.to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: backup::get_default_root(),
            retention_hours: backup::DEFAULT_RETENTION_HOURS,
            interval_minutes: backup::DEFAULT_INTERVAL_MINUTES,
            initial_delay_secs: backup::DEFAULT_INITIAL_DELAY_SECS,
            arm_on_unconfirmed_start: false,
        }
    }
}

impl ServerConfig {
    pub fn match_mode(&self) -> MarkerMatch {
        self.match_mode
            .unwrap_or_else(|| self.kind.default_match_mode())
    }

    pub fn control_port(&self) -> u16 {
        self.control
            .port
            .unwrap_or_else(|| self.kind.default_control_port())
    }

    pub fn excludes(&self) -> Vec<String> {
        match &self.exclude {
            Some(list) => list.clone(),
            None => backup::DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：warden.toml -> config.toml -> .warden.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(WardenError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存默认模板到文件
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::write(&path, Self::template())?;
        Ok(())
    }

    /// 带注释的默认 TOML 配置
    pub fn template() -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        TEMPLATE
            .replace(
                "{backup_root}",
                &backup::get_default_root().to_string_lossy(),
            )
            .replace("{retention_hours}", &backup::DEFAULT_RETENTION_HOURS.to_string())
            .replace("{interval_minutes}", &backup::DEFAULT_INTERVAL_MINUTES.to_string())
            .replace(
                "{initial_delay_secs}",
                &backup::DEFAULT_INITIAL_DELAY_SECS.to_string(),
            )
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.backup.interval_minutes == 0 {
            return Err(WardenError::invalid_config("backup.interval_minutes 必须大于 0"));
        }
        if self.backup.interval_minutes > backup::MAX_INTERVAL_MINUTES {
            return Err(WardenError::invalid_config(format!(
                "backup.interval_minutes 不能超过 {}",
                backup::MAX_INTERVAL_MINUTES
            )));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(WardenError::invalid_config("服务器 id 不能为空"));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(WardenError::invalid_config(format!(
                    "服务器 id 重复: {}",
                    server.id
                )));
            }
            if server.launch.is_empty() {
                return Err(WardenError::invalid_config(format!(
                    "{}: launch 不能为空",
                    server.id
                )));
            }
            if server.process_marker.trim().is_empty() {
                return Err(WardenError::invalid_config(format!(
                    "{}: process_marker 不能为空",
                    server.id
                )));
            }
            if server.poll.start_attempts == 0 || server.poll.stop_attempts == 0 {
                return Err(WardenError::invalid_config(format!(
                    "{}: 轮询次数必须大于 0",
                    server.id
                )));
            }
        }

        Ok(())
    }

    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }
}
