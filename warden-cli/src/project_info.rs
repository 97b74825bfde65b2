/// 项目元数据（自动从 warden-cli 的 Cargo.toml 同步）
pub mod metadata {
    /// 项目描述
    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    /// 项目作者
    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 用户友好的显示名称（手动维护）
    pub mod display {
        /// 项目详细描述
        pub const DESCRIPTION_LONG: &str = "管理 Minecraft 与 7 Days to Die 服务器进程：带健康确认的启动、先正常关闭再强制终止的停止，以及服务器运行期间按间隔执行、按时长清理的存档备份";
    }
}

/// 版本信息
pub mod version_info {
    /// CLI 版本
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// 核心库版本
    pub const CORE_VERSION: &str = warden_core::constants::version::CORE_VERSION;
}
