use std::collections::HashMap;

use secrecy::SecretString;

use crate::errors::{BridgeError, Result};
use crate::remote::Credentials;

// -----------------------------------------------------------------------------
// ----- PrincipalResolver -----------------------------------------------------

/// Maps the external user named in a request to the backend principal and
/// credentials its session runs under.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, external_user: &str) -> Result<(String, Credentials)>;
}

// -----------------------------------------------------------------------------
// ----- StaticPrincipals ------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PrincipalRecord {
    pub external_user: String,
    pub principal: String,
    pub password: SecretString,
}

/// Resolver over a fixed table, usually loaded from the bridge config.
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipals {
    by_user: HashMap<String, PrincipalRecord>,
}

impl StaticPrincipals {
    pub fn new(records: impl IntoIterator<Item = PrincipalRecord>) -> Self {
        let by_user = records
            .into_iter()
            .map(|r| (r.external_user.clone(), r))
            .collect();
        Self { by_user }
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

impl PrincipalResolver for StaticPrincipals {
    fn resolve(&self, external_user: &str) -> Result<(String, Credentials)> {
        let record = self
            .by_user
            .get(external_user)
            .ok_or_else(|| BridgeError::AuthenticationFailure {
                principal: external_user.to_string(),
                reason: "no principal is mapped to this user".to_string(),
            })?;

        Ok((
            record.principal.clone(),
            Credentials::from_secret(record.password.clone()),
        ))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_users_only() {
        let principals = StaticPrincipals::new([PrincipalRecord {
            external_user: "jdoe@corp".into(),
            principal: "RFC_JDOE".into(),
            password: SecretString::new("s3cret".into()),
        }]);

        let (principal, creds) = principals.resolve("jdoe@corp").unwrap();
        assert_eq!(principal, "RFC_JDOE");
        assert_eq!(creds.password_exposed(), "s3cret");

        let err = principals.resolve("mallory").unwrap_err();
        assert!(matches!(err, BridgeError::AuthenticationFailure { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
