//! Configuration validation logic.

use crate::config::schema::{RouterConfig, StrategyKind};

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// Validate a RouterConfig for semantic correctness.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for seed in &config.backends {
        if !seed.endpoint.starts_with("http://") && !seed.endpoint.starts_with("https://") {
            errors.push(ValidationError(format!(
                "backend endpoint '{}' must include a scheme",
                seed.endpoint
            )));
        }
        if seed.weight == 0 {
            errors.push(ValidationError(format!(
                "backend '{}' weight must be >= 1",
                seed.endpoint
            )));
        }
        if seed.capacity == 0 {
            errors.push(ValidationError(format!(
                "backend '{}' capacity must be >= 1",
                seed.endpoint
            )));
        }
    }

    if config.strategy.kind == StrategyKind::Ml
        && config.strategy.predictive.scorer_endpoint.is_empty()
    {
        errors.push(ValidationError(
            "strategy 'ml' requires ML_MODEL_ENDPOINT (or strategy.predictive.scorer_endpoint)"
                .to_string(),
        ));
    }

    if config.health.unhealthy_threshold == 0 {
        errors.push(ValidationError(
            "health.unhealthy_threshold must be > 0".to_string(),
        ));
    }

    if config.telemetry.window_secs == 0 {
        errors.push(ValidationError(
            "telemetry.window_secs must be > 0".to_string(),
        ));
    }

    if config.strategy.predictive.max_attempts == 0 {
        errors.push(ValidationError(
            "strategy.predictive.max_attempts must be > 0".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
