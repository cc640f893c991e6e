pub mod connection_pool;
pub mod lease;

pub use connection_pool::{ConnectionPool, PoolSettings, PoolStats};
pub use lease::PooledSession;
