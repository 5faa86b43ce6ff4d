pub mod config;
pub mod error;
pub mod handler;
pub mod io_struct;
pub mod logging;
pub mod oracle;
pub mod prediction;
pub mod server;
pub mod upload;
pub mod vision;

pub use config::ServerConfig;
pub use oracle::{Classifier, OracleState};
