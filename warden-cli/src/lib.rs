mod app;
mod cli;
mod commands;
mod init;
pub mod project_info;
mod utils;

pub use app::WardenApp;
pub use cli::{Cli, Commands};
pub use commands::daemon::{DaemonCommand, parse_line};
pub use init::run_init;
pub use utils::setup_logging;
