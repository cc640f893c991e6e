use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use super::rule::{RoutingRule, Target};

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("duplicate route for category '{category}' subtype '{subtype}' recipient '{recipient}'")]
    DuplicateRule {
        category: String,
        subtype: String,
        recipient: String,
    },
}

// -----------------------------------------------------------------------------
// ----- RoutingTable ----------------------------------------------------------

/// Immutable, compiled set of routing rules.
///
/// Rules sharing a (category, subtype) pair are kept most specific recipient
/// first, so the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    by_category: HashMap<String, HashMap<String, Vec<RoutingRule>>>,
    len: usize,
}

impl RoutingTable {
    pub fn new(rules: impl IntoIterator<Item = RoutingRule>) -> Result<Self, RoutingError> {
        let mut by_category: HashMap<String, HashMap<String, Vec<RoutingRule>>> = HashMap::new();
        let mut len = 0;

        for rule in rules {
            let bucket = by_category
                .entry(rule.key.category.clone())
                .or_default()
                .entry(rule.key.subtype.clone())
                .or_default();

            if bucket.iter().any(|r| r.recipient == rule.recipient) {
                return Err(RoutingError::DuplicateRule {
                    category: rule.key.category,
                    subtype: rule.key.subtype,
                    recipient: rule.recipient.to_string(),
                });
            }

            bucket.push(rule);
            len += 1;
        }

        for bucket in by_category.values_mut().flat_map(|subtypes| subtypes.values_mut()) {
            // Stable, so equally specific prefixes keep file order.
            bucket.sort_by_key(|r| std::cmp::Reverse(r.recipient.specificity()));
        }

        Ok(Self { by_category, len })
    }

    pub fn resolve(&self, category: &str, subtype: &str, recipient: &str) -> Option<&Target> {
        self.by_category
            .get(category)?
            .get(subtype)?
            .iter()
            .find(|rule| rule.recipient.matches(recipient))
            .map(|rule| &rule.target)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// -----------------------------------------------------------------------------
// ----- RoutingTableHandle ----------------------------------------------------

/// Shared, swappable view of the current [`RoutingTable`].
///
/// Readers take a snapshot and keep using it for as long as they like; a
/// refresh installs a whole new table, so nobody sees a partial update.
#[derive(Debug, Clone, Default)]
pub struct RoutingTableHandle {
    current: Arc<RwLock<Arc<RoutingTable>>>,
}

impl RoutingTableHandle {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.current.read().clone()
    }

    pub fn replace(&self, table: RoutingTable) {
        let next = Arc::new(table);
        info!(rules = next.len(), "installing routing table");
        *self.current.write() = next;
    }

    pub fn resolve(&self, category: &str, subtype: &str, recipient: &str) -> Option<Target> {
        self.snapshot()
            .resolve(category, subtype, recipient)
            .cloned()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
