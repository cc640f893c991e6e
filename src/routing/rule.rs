use std::fmt;

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const BACKEND_SCHEME: &str = "backend:";
const WILDCARD: &str = "*";

// -----------------------------------------------------------------------------
// ----- RoutingKey ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub category: String,
    pub subtype: String,
}

impl RoutingKey {
    pub fn new(category: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subtype: subtype.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Target ----------------------------------------------------------------

/// Resolved destination of an inbound document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    pub operation: String,
    pub namespace: String,
}

impl Target {
    pub fn new(
        address: impl Into<String>,
        operation: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            operation: operation.into(),
            namespace: namespace.into(),
        }
    }

    /// The backend destination when the address uses the `backend:` scheme.
    pub fn backend_destination(&self) -> Option<&str> {
        self.address.strip_prefix(BACKEND_SCHEME)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.address, self.operation, self.namespace)
    }
}

// -----------------------------------------------------------------------------
// ----- RecipientPattern ------------------------------------------------------

/// Recipient half of a rule. Empty or `*` matches anyone, a trailing `*`
/// matches by prefix, anything else must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientPattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl RecipientPattern {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == WILDCARD {
            return RecipientPattern::Any;
        }

        match raw.strip_suffix(WILDCARD) {
            Some(prefix) => RecipientPattern::Prefix(prefix.to_string()),
            None => RecipientPattern::Exact(raw.to_string()),
        }
    }

    pub fn matches(&self, recipient: &str) -> bool {
        match self {
            RecipientPattern::Any => true,
            RecipientPattern::Prefix(prefix) => recipient.starts_with(prefix.as_str()),
            RecipientPattern::Exact(exact) => recipient == exact,
        }
    }

    /// Higher is more specific. Exact beats every prefix, longer prefixes
    /// beat shorter ones and the wildcard comes last.
    pub(crate) fn specificity(&self) -> usize {
        match self {
            RecipientPattern::Any => 0,
            RecipientPattern::Prefix(prefix) => 1 + prefix.len(),
            RecipientPattern::Exact(_) => usize::MAX,
        }
    }
}

impl fmt::Display for RecipientPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientPattern::Any => f.write_str(WILDCARD),
            RecipientPattern::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
            RecipientPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RoutingRule -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub key: RoutingKey,
    pub recipient: RecipientPattern,
    pub target: Target,
}

impl RoutingRule {
    pub fn new(
        category: impl Into<String>,
        subtype: impl Into<String>,
        recipient: &str,
        target: Target,
    ) -> Self {
        Self {
            key: RoutingKey::new(category, subtype),
            recipient: RecipientPattern::parse(recipient),
            target,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
