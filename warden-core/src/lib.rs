pub mod backup;
pub mod config;
pub mod constants;
pub mod control;
pub mod error;
pub mod probe;
pub mod registry;
pub mod server;
pub mod supervisor;

pub use error::{Result, WardenError};
pub use registry::{ServerRegistry, ServerReport};
