use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::config::{AppConfig, ConfigError};
use crate::gate::{Gate, RateLimitStore};
use crate::relay::AliasTable;
use crate::transport::{chat_completions_url, HttpTransport};
use crate::util::IdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub aliases: AliasTable,
    pub gate: Gate,
    upstream_url: url::Url,
    models_body: Bytes,
    request_ids: IdGenerator,
}

impl AppState {
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the alias table, the gate, or the
    /// upstream URL cannot be built from `config`.
    pub fn new(config: AppConfig, transport: HttpTransport) -> Result<Self, ConfigError> {
        let aliases = AliasTable::from_config(&config.models)?;
        let gate = Gate::from_config(&config.gate)?;
        let upstream_url = chat_completions_url(&config.upstream.base_url)?;
        let models_body = build_models_body(&aliases);
        Ok(Self {
            config,
            transport,
            aliases,
            gate,
            upstream_url,
            models_body,
            request_ids: IdGenerator::new(),
        })
    }

    /// Replace the gate's rate-limit store.
    #[must_use]
    pub fn with_rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.gate = self.gate.with_store(store);
        self
    }

    #[must_use]
    pub fn upstream_url(&self) -> &url::Url {
        &self.upstream_url
    }

    /// Serialized `GET /api/models` body, built once at startup.
    #[must_use]
    pub fn models_body(&self) -> Bytes {
        self.models_body.clone()
    }

    #[must_use]
    pub fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next_uuid()
    }
}

fn build_models_body(aliases: &AliasTable) -> Bytes {
    let default_alias = aliases.default_entry().alias.as_str();
    let data: Vec<serde_json::Value> = aliases
        .entries()
        .iter()
        .map(|entry| {
            json!({
                "alias": entry.alias,
                "inline_reasoning_tags": entry.inline_reasoning_tags,
                "default": entry.alias == default_alias,
            })
        })
        .collect();
    Bytes::from(json!({ "object": "list", "data": data }).to_string())
}
