/// 启动/停止轮询相关常量
pub mod poll {
    /// 启动确认最大探测次数
    pub const START_ATTEMPTS: u32 = 18;

    /// 启动确认探测间隔（秒）
    pub const START_INTERVAL_SECS: u64 = 5;

    /// 关闭确认最大探测次数
    pub const STOP_ATTEMPTS: u32 = 12;

    /// 关闭确认探测间隔（秒）
    pub const STOP_INTERVAL_SECS: u64 = 5;

    /// 发送终止信号后等待进程退出的时间（秒）
    pub const TERMINATE_TIMEOUT_SECS: u64 = 10;

    /// 终止等待期间的探测间隔（毫秒）
    pub const TERMINATE_CHECK_INTERVAL_MS: u64 = 500;

    /// 控制通道单步 IO 超时（秒）
    pub const IO_TIMEOUT_SECS: u64 = 10;
}

/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 进行中的归档所在目录名（位于备份根目录下）
    pub const STAGING_DIR_NAME: &str = ".staging";

    /// 暂存区中超过该时长未修改的条目视为中断遗留（秒）
    pub const STALE_STAGING_SECS: u64 = 12 * 3600;

    /// 备份文件扩展名
    pub const BACKUP_EXTENSION: &str = "zip";

    /// 归档文件名中的时间戳格式（分钟精度）
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M";

    /// 同一分钟内允许的最大序号
    pub const MAX_SAME_MINUTE_SEQUENCE: u32 = 99;

    /// 默认保留时长（小时）
    pub const DEFAULT_RETENTION_HOURS: u64 = 36;

    /// 默认备份间隔（分钟）
    pub const DEFAULT_INTERVAL_MINUTES: u64 = 60;

    /// 备份间隔上限（分钟），一年
    pub const MAX_INTERVAL_MINUTES: u64 = 525_600;

    /// 首次备份前的延迟（秒），避免与服务器启动争抢 IO
    pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 10;

    /// 默认排除的易变文件
    pub const DEFAULT_EXCLUDES: [&str; 1] = ["session.lock"];

    /// 获取默认备份根目录（跨平台）
    pub fn get_default_root() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 网络相关常量
pub mod network {
    /// 本地回环地址
    pub const LOCALHOST_IPV4: &str = "127.0.0.1";

    /// Minecraft RCON 默认端口
    pub const DEFAULT_RCON_PORT: u16 = 25575;

    /// 7 Days to Die telnet 默认端口
    pub const DEFAULT_TELNET_PORT: u16 = 8081;
}

/// 控制协议相关常量
pub mod control {
    /// 关闭前的广播消息
    pub const SHUTDOWN_ANNOUNCEMENT: &str = "[Warden] 即将关闭伺服器";

    /// telnet 密码提示
    pub const TELNET_PASSWORD_PROMPT: &str = "Please enter password:";

    /// telnet 登录成功标识
    pub const TELNET_LOGIN_ACK: &str = "Logon successful.";

    /// telnet 认证失败标识
    pub const TELNET_LOGIN_REJECTED: &str = "Password incorrect";

    /// RCON 单个响应包的最大长度
    pub const RCON_MAX_PACKET_LEN: i32 = 4096 + 10;
}

/// 应用配置相关常量
pub mod config {
    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["warden.toml", "config.toml", ".warden.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";
}

/// 技术版本信息常量
pub mod version {
    /// 核心库版本（自动同步）
    pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
