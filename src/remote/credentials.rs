use secrecy::{ExposeSecret, SecretString};

// -----------------------------------------------------------------------------
// ----- Credentials -----------------------------------------------------------

/// Secret half of a (principal, credentials) pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    password: SecretString,
}

impl Credentials {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: SecretString::new(password.into().into_boxed_str()),
        }
    }

    pub fn from_secret(password: SecretString) -> Self {
        Self { password }
    }

    pub fn password_exposed(&self) -> &str {
        self.password.expose_secret()
    }

    /// Digest of principal and password, so a rejected pair can be
    /// recognised later without keeping the password around.
    pub fn fingerprint(&self, principal: &str) -> [u8; 16] {
        let mut ctx = md5::Context::new();
        ctx.consume(principal.as_bytes());
        ctx.consume([0u8]);
        ctx.consume(self.password.expose_secret().as_bytes());
        ctx.compute().0
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
