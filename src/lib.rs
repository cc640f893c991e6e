pub mod config;
pub mod errors;
pub mod intake;
pub mod pool;
pub mod remote;
pub mod routing;
pub mod session;

pub use config::BridgeConfig;
pub use errors::{BridgeError, Result};
pub use intake::IntakePipeline;
pub use pool::ConnectionPool;
pub use session::SessionOrchestrator;
