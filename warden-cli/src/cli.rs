use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warden CLI - 游戏服务器启停守护与自动备份
#[derive(Parser)]
#[command(name = "warden-cli")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（默认依次查找 warden.toml、config.toml、.warden.toml）
    #[arg(short, long, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 创建带注释的默认配置文件
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 启动服务器并等待确认
    Start {
        /// 服务器 ID
        id: String,
    },
    /// 正常关闭服务器，超时后强制终止
    Stop {
        /// 服务器 ID
        id: String,
    },
    /// 通过 RCON / telnet 控制台执行一条命令
    Exec {
        /// 服务器 ID
        id: String,
        /// 命令及参数，例如 `say 十分钟后重启`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// 显示服务器状态
    Status {
        /// 服务器 ID（不指定则显示全部）
        id: Option<String>,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 立即备份存档
    Backup {
        /// 服务器 ID（不指定则备份全部）
        id: Option<String>,
    },
    /// 显示最新的备份文件
    Latest {
        /// 服务器 ID
        id: String,
    },
    /// 常驻运行：自动启动服务器、定时备份，并从标准输入读取命令
    Daemon,
}
