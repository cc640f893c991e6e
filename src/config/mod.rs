pub mod bridge;
pub mod cli;
pub mod types;

pub use bridge::{BridgeConfig, ConfigError, IntakeConfig};
pub use cli::{CliConfig, RouteQuery};
pub use types::LogLevel;
