use std::fs::File;
use std::io;
use tracing_subscriber::{EnvFilter, fmt};

/// 日志输出文件的环境变量
pub const LOG_FILE_ENV: &str = "WARDEN_LOG_FILE";

/// 初始化日志
///
/// - `-v` 使用 DEBUG 级别，`RUST_LOG` 优先于命令行参数
/// - 设置 `WARDEN_LOG_FILE` 后追加写入该文件，包含模块路径、线程名和行号
///
/// ```bash
/// WARDEN_LOG_FILE=warden.log warden-cli daemon
/// RUST_LOG=warden_core::supervisor=debug warden-cli start minecraft
/// ```
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        match open_log_file(&log_file) {
            Ok(file) => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .init();
                return;
            }
            Err(e) => eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端"),
        }
    }

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .without_time()
        .compact()
        .init();
}

fn open_log_file(path: &str) -> io::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
