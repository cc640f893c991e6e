//! Maps inbound-document attributes to a dispatch target.

pub mod rule;
pub mod table;

pub use rule::{RecipientPattern, RoutingKey, RoutingRule, Target};
pub use table::{RoutingError, RoutingTable, RoutingTableHandle};
