use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::{collections::HashSet, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;
use tokio::fs;

use crate::intake::{IntakeSettings, RetryPolicy};
use crate::pool::PoolSettings;
use crate::remote::Credentials;
use crate::routing::{RoutingError, RoutingRule, RoutingTable, Target};
use crate::session::{OrchestratorSettings, PrincipalRecord, PrincipalResolver, StaticPrincipals};

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {source}")]
    Toml {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("duplicate principal mapping for external user '{external_user}'")]
    DuplicatePrincipal { external_user: String },

    #[error(transparent)]
    DuplicateRoute(#[from] RoutingError),
}

// -----------------------------------------------------------------------------
// ----- BridgeConfig ----------------------------------------------------------

/// Everything needed to assemble a bridge, loaded once at startup and passed
/// to whoever builds the pool, pipeline and orchestrator.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub pool: PoolSettings,
    pub orchestrator: OrchestratorSettings,
    pub intake: IntakeConfig,
    pub principals: StaticPrincipals,
    pub routes: RoutingTable,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub settings: IntakeSettings,
    pub retry: RetryPolicy,
    pub outcome_journal: Option<PathBuf>,
    pub service_principal: Option<String>,
}

// -----------------------------------------------------------------------------
// ----- BridgeConfig: Static --------------------------------------------------

impl BridgeConfig {
    /// Loads the bridge file. When `routes_path` is given, its `[[routes]]`
    /// replace any routes declared in the bridge file.
    pub async fn load(path: &Path, routes_path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = read(path).await?;
        let mut doc = parse_doc(&raw)?;

        if let Some(routes_path) = routes_path {
            let raw = read(routes_path).await?;
            let routes: RoutesFile =
                toml::from_str(&raw).map_err(|e| ConfigError::Toml { source: e })?;
            doc.routes = routes.routes;
        }

        Self::from_doc(doc)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Self::from_doc(parse_doc(raw)?)
    }
}

// -----------------------------------------------------------------------------
// ----- BridgeConfig: Public --------------------------------------------------

impl BridgeConfig {
    /// Principal and credentials used for backend-bound dispatch, if one is
    /// configured.
    pub fn service_credentials(&self) -> Option<(String, Credentials)> {
        let principal = self.intake.service_principal.as_deref()?;
        self.principals.resolve(principal).ok()
    }
}

// -----------------------------------------------------------------------------
// ----- BridgeConfig: Private -------------------------------------------------

impl BridgeConfig {
    fn from_doc(doc: BridgeFile) -> Result<Self, ConfigError> {
        if doc.pool.capacity == 0 {
            return Err(ConfigError::InvalidField(
                "pool.capacity must be at least 1".to_string(),
            ));
        }
        if doc.intake.dispatch_concurrency == 0 {
            return Err(ConfigError::InvalidField(
                "intake.dispatch_concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(doc.principals.len());
        let mut records = Vec::with_capacity(doc.principals.len());
        for entry in doc.principals {
            validate_principal(&entry)?;
            if !seen.insert(entry.external_user.clone()) {
                return Err(ConfigError::DuplicatePrincipal {
                    external_user: entry.external_user,
                });
            }
            records.push(PrincipalRecord {
                external_user: entry.external_user,
                principal: entry.principal,
                password: SecretString::new(entry.password.into_boxed_str()),
            });
        }

        if let Some(service) = &doc.intake.service_principal
            && !seen.contains(service)
        {
            return Err(ConfigError::InvalidField(format!(
                "intake.service_principal '{service}' has no [[principals]] entry"
            )));
        }

        let mut rules = Vec::with_capacity(doc.routes.len());
        for route in doc.routes {
            validate_route(&route)?;
            rules.push(RoutingRule::new(
                route.category,
                route.subtype,
                &route.recipient,
                Target::new(route.address, route.operation, route.namespace),
            ));
        }

        Ok(Self {
            pool: PoolSettings {
                capacity: doc.pool.capacity,
                acquire_timeout: doc.pool.acquire_timeout,
            },
            orchestrator: OrchestratorSettings {
                logoff_grace: doc.orchestrator.logoff_grace,
                operation_timeout: doc.orchestrator.operation_timeout,
            },
            intake: IntakeConfig {
                settings: IntakeSettings {
                    dispatch_concurrency: doc.intake.dispatch_concurrency,
                },
                retry: RetryPolicy {
                    retries: doc.intake.dispatch_retries,
                    backoff: doc.intake.retry_backoff,
                },
                outcome_journal: doc.intake.outcome_journal,
                service_principal: doc.intake.service_principal,
            },
            principals: StaticPrincipals::new(records),
            routes: RoutingTable::new(rules)?,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BridgeFile {
    #[serde(default)]
    pool: PoolSection,
    #[serde(default)]
    orchestrator: OrchestratorSection,
    #[serde(default)]
    intake: IntakeSection,
    #[serde(default)]
    principals: Vec<PrincipalEntry>,
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
struct RoutesFile {
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PoolSection {
    capacity: usize,
    #[serde(deserialize_with = "duration")]
    acquire_timeout: Duration,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolSettings::default();
        Self {
            capacity: defaults.capacity,
            acquire_timeout: defaults.acquire_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OrchestratorSection {
    #[serde(deserialize_with = "duration")]
    logoff_grace: Duration,
    #[serde(deserialize_with = "optional_duration")]
    operation_timeout: Option<Duration>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            logoff_grace: defaults.logoff_grace,
            operation_timeout: defaults.operation_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct IntakeSection {
    dispatch_concurrency: usize,
    outcome_journal: Option<PathBuf>,
    dispatch_retries: u32,
    #[serde(deserialize_with = "duration")]
    retry_backoff: Duration,
    service_principal: Option<String>,
}

impl Default for IntakeSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            dispatch_concurrency: IntakeSettings::default().dispatch_concurrency,
            outcome_journal: None,
            dispatch_retries: retry.retries,
            retry_backoff: retry.backoff,
            service_principal: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrincipalEntry {
    external_user: String,
    principal: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    category: String,
    subtype: String,
    #[serde(default)]
    recipient: String,
    address: String,
    operation: String,
    #[serde(default)]
    namespace: String,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_doc(raw: &str) -> Result<BridgeFile, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })
}

fn validate_principal(entry: &PrincipalEntry) -> Result<(), ConfigError> {
    if entry.external_user.trim().is_empty() {
        return Err(ConfigError::InvalidField(
            "principals.external_user must be non-empty".to_string(),
        ));
    }
    if entry.principal.trim().is_empty() {
        return Err(ConfigError::InvalidField(format!(
            "principals.principal must be non-empty (user '{}')",
            entry.external_user
        )));
    }
    Ok(())
}

fn validate_route(route: &RouteEntry) -> Result<(), ConfigError> {
    for (name, value) in [
        ("category", &route.category),
        ("subtype", &route.subtype),
        ("address", &route.address),
        ("operation", &route.operation),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidField(format!(
                "routes.{name} must be non-empty ({}/{})",
                route.category, route.subtype
            )));
        }
    }
    Ok(())
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    duration(deserializer).map(Some)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
