//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{BackendSeed, RouterConfig, StrategyKind};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid environment value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file first, then environment overrides,
/// then semantic validation.
pub fn load_config(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => RouterConfig::default(),
    };

    apply_env(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply the environment interface: `SERVERS`, `LB_STRATEGY`,
/// `ML_MODEL_ENDPOINT`, `PORT`, `DATABASE_URL`.
fn apply_env(config: &mut RouterConfig) -> Result<(), ConfigError> {
    if let Ok(servers) = std::env::var("SERVERS") {
        config.backends = parse_server_list(&servers);
    }

    if let Ok(strategy) = std::env::var("LB_STRATEGY") {
        config.strategy.kind = StrategyKind::parse(strategy.trim().to_lowercase().as_str())
            .ok_or(ConfigError::Env {
                name: "LB_STRATEGY",
                value: strategy.clone(),
            })?;
    }

    if let Ok(endpoint) = std::env::var("ML_MODEL_ENDPOINT") {
        config.strategy.predictive.scorer_endpoint = endpoint.trim_end_matches('/').to_string();
    }

    if let Ok(port) = std::env::var("PORT") {
        config.listener.port = port.parse().map_err(|_| ConfigError::Env {
            name: "PORT",
            value: port.clone(),
        })?;
    }

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.store.database_url = url;
    }

    Ok(())
}

/// Parse the comma-separated `SERVERS` list. Entries get weight and capacity
/// 1; the persistent store supplies real values when reachable.
fn parse_server_list(raw: &str) -> Vec<BackendSeed> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|endpoint| BackendSeed {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            weight: 1,
            capacity: 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_list_parsing() {
        let seeds = parse_server_list("http://a:5000, http://b:5001/ ,,http://c:5002");
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0].endpoint, "http://a:5000");
        assert_eq!(seeds[1].endpoint, "http://b:5001");
        assert!(seeds.iter().all(|s| s.weight == 1 && s.capacity == 1));
    }

    #[test]
    fn file_then_defaults() {
        let toml = r#"
            [listener]
            port = 9999

            [[backends]]
            endpoint = "http://127.0.0.1:5000"
            weight = 3
        "#;
        let config: RouterConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listener.port, 9999);
        assert_eq!(config.backends[0].weight, 3);
        assert_eq!(config.backends[0].capacity, 1);
        // untouched sections keep defaults
        assert_eq!(config.health.interval_secs, 5);
        assert_eq!(config.telemetry.window_secs, 300);
    }
}
