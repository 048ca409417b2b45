use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_models(config)?;
    validate_gate(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let base_url = config.upstream.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if url::Url::parse(base_url).is_err() {
        return Err(validation_err("upstream.base_url is not a valid URL"));
    }
    if config.upstream.api_key_env.trim().is_empty() {
        return Err(validation_err("upstream.api_key_env cannot be empty"));
    }
    if let Some(temperature) = config.upstream.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(validation_err(
                "upstream.temperature must be between 0.0 and 2.0",
            ));
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let models = &config.models;
    if models.aliases.is_empty() {
        return Err(validation_err("models.aliases cannot be empty"));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for entry in &models.aliases {
        let alias = entry.alias.trim();
        if alias.is_empty() {
            return Err(validation_err("models.aliases contains an empty alias"));
        }
        if entry.upstream_model.trim().is_empty() {
            return Err(validation_err(format!(
                "Alias '{alias}': upstream_model cannot be empty"
            )));
        }
        if !seen.insert(alias) {
            return Err(validation_err(format!(
                "Alias '{alias}' is defined more than once"
            )));
        }
    }

    if !seen.contains(models.default_alias.trim()) {
        return Err(validation_err(format!(
            "models.default_alias '{}' is not one of the configured aliases",
            models.default_alias
        )));
    }
    Ok(())
}

fn validate_gate(config: &AppConfig) -> Result<(), ConfigError> {
    let gate = &config.gate;
    if http::HeaderName::from_bytes(gate.secret_header.trim().as_bytes()).is_err() {
        return Err(validation_err(format!(
            "gate.secret_header '{}' is not a valid header name",
            gate.secret_header
        )));
    }
    if gate.limit_per_window == 0 {
        return Err(validation_err("gate.limit_per_window must be greater than 0"));
    }
    if gate.window_secs == 0 {
        return Err(validation_err("gate.window_secs must be greater than 0"));
    }
    if let Some(limited) = gate.limited_alias.as_deref() {
        let known = config
            .models
            .aliases
            .iter()
            .any(|entry| entry.alias.trim() == limited.trim());
        if !known {
            return Err(validation_err(format!(
                "gate.limited_alias '{limited}' is not one of the configured aliases"
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "Invalid log_level '{}'. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
