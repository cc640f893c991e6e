//! Seam to the remote transactional backend.
//!
//! The wire protocol stays behind [`SessionConnector`] and [`RemoteSession`]:
//! an operation name and a structured payload go in, a structured payload or
//! a failure comes out.

pub mod credentials;
pub mod payload;
pub mod session;

pub use credentials::Credentials;
pub use payload::{Payload, application_error};
pub use session::{CallError, ConnectError, RemoteSession, SessionConnector};
