pub mod backup;
pub mod daemon;
pub mod server;
pub mod status;

pub use backup::{run_backup, run_latest};
pub use daemon::run_daemon;
pub use server::{run_exec, run_start, run_stop};
pub use status::run_status;
