use clap::Parser;
use std::{fs, path::Path, path::PathBuf};

use super::{bridge::ConfigError, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: PathBuf,
    pub routes_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
    pub resolve: Vec<RouteQuery>,
}

/// A `CATEGORY/SUBTYPE/RECIPIENT` lookup requested on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteQuery {
    pub category: String,
    pub subtype: String,
    pub recipient: String,
}

impl CliConfig {
    pub fn from_args() -> Result<Self, ConfigError> {
        Self::from_parsed(Args::parse())
    }

    fn from_parsed(args: Args) -> Result<Self, ConfigError> {
        let cfg = Self {
            config_file_location: args.config_file,
            routes_file_location: args.routes_file,
            log_level: args.log_level,
            resolve: args.resolve,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        must_exist_file(&self.config_file_location, "--config / busbridge.toml")?;
        if let Some(routes) = &self.routes_file_location {
            must_exist_file(routes, "--routes")?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "busbridge", version, about = "Enterprise bus to backend bridge")]
struct Args {
    // Must exist; no defaults.
    #[arg(long = "config", env = "BUSBRIDGE_CONFIG")]
    config_file: PathBuf,

    // Optional; when given, its [[routes]] replace the ones in --config.
    #[arg(long = "routes", env = "BUSBRIDGE_ROUTES")]
    routes_file: Option<PathBuf>,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    #[arg(long = "resolve", value_parser = parse_route_query)]
    resolve: Vec<RouteQuery>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn parse_route_query(raw: &str) -> Result<RouteQuery, String> {
    let mut parts = raw.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(category), Some(subtype), recipient) if !category.is_empty() && !subtype.is_empty() => {
            Ok(RouteQuery {
                category: category.to_string(),
                subtype: subtype.to_string(),
                recipient: recipient.unwrap_or_default().to_string(),
            })
        }
        _ => Err(format!("expected CATEGORY/SUBTYPE[/RECIPIENT], got '{raw}'")),
    }
}

fn must_exist_file(path: &Path, hint: &str) -> Result<(), ConfigError> {
    let md = fs::metadata(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if !md.is_file() {
        return Err(ConfigError::InvalidField(format!(
            "{hint}: {} is not a file",
            path.display()
        )));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_route_queries() {
        assert_eq!(
            parse_route_query("ORDERS/ORDERS05/ACME").unwrap(),
            RouteQuery {
                category: "ORDERS".into(),
                subtype: "ORDERS05".into(),
                recipient: "ACME".into(),
            }
        );
        assert_eq!(parse_route_query("ORDERS/ORDERS05").unwrap().recipient, "");
        assert!(parse_route_query("ORDERS").is_err());
        assert!(parse_route_query("/ORDERS05/ACME").is_err());
    }

    #[test]
    fn requires_existing_config_file() {
        let tmp = NamedTempFile::new().unwrap();
        let args = Args::try_parse_from([
            "busbridge",
            "--config",
            tmp.path().to_str().unwrap(),
            "--resolve",
            "ORDERS/ORDERS05/ACME",
            "--log",
            "debug",
        ])
        .unwrap();

        let cfg = CliConfig::from_parsed(args).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.resolve.len(), 1);

        let args =
            Args::try_parse_from(["busbridge", "--config", "/definitely/not/here.toml"]).unwrap();
        assert!(matches!(
            CliConfig::from_parsed(args),
            Err(ConfigError::Io { .. })
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
