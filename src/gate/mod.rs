pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName};

use crate::config::{ConfigError, GateConfig};
use crate::error::RelayError;
use crate::util::unix_now_millis;

pub use rate_limit::{InMemoryRateLimitStore, RateLimitStore, WindowCount};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const UNKNOWN_CLIENT: &str = "unknown";

/// Peer address of the accepted connection, attached as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Shared-secret check plus a per-client fixed-window limit on one alias.
pub struct Gate {
    secret_header: HeaderName,
    shared_secret: Option<Box<str>>,
    limited_alias: Option<String>,
    limit: u32,
    window: Duration,
    store: Arc<dyn RateLimitStore>,
}

impl Gate {
    /// Build a gate backed by an in-memory counter store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the secret header name is invalid.
    pub fn from_config(config: &GateConfig) -> Result<Self, ConfigError> {
        let secret_header = HeaderName::from_bytes(config.secret_header.trim().as_bytes())
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "gate.secret_header '{}' is not a valid header name",
                    config.secret_header
                ))
            })?;
        let shared_secret = config
            .shared_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(Box::from);
        Ok(Self {
            secret_header,
            shared_secret,
            limited_alias: config
                .limited_alias
                .as_deref()
                .map(|alias| alias.trim().to_string()),
            limit: config.limit_per_window.max(1),
            window: Duration::from_secs(config.window_secs.max(1)),
            store: Arc::new(InMemoryRateLimitStore::new()),
        })
    }

    /// Swap the counter store, e.g. for one shared across instances.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn secret_configured(&self) -> bool {
        self.shared_secret.is_some()
    }

    #[must_use]
    pub fn limited_alias(&self) -> Option<&str> {
        self.limited_alias.as_deref()
    }

    /// Require the shared-secret header to match the server-held value.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when no secret is configured server-side
    /// and [`RelayError::Forbidden`] when the header is missing or wrong.
    pub fn check_secret(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let Some(expected) = self.shared_secret.as_deref() else {
            return Err(RelayError::Config(
                "relay shared secret is not configured".to_string(),
            ));
        };
        match headers.get(&self.secret_header) {
            Some(value) if secrets_match(expected.as_bytes(), value.as_bytes()) => Ok(()),
            Some(_) => Err(RelayError::Forbidden("Invalid relay secret".to_string())),
            None => Err(RelayError::Forbidden("Missing relay secret".to_string())),
        }
    }

    /// Count a request for `alias` from `client_key` against the current window.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RateLimited`] once the window's limit is exceeded.
    pub fn check_rate_limit(&self, alias: &str, client_key: &str) -> Result<(), RelayError> {
        self.check_rate_limit_at(alias, client_key, unix_now_millis())
    }

    /// [`Gate::check_rate_limit`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RateLimited`] once the window's limit is exceeded.
    pub fn check_rate_limit_at(
        &self,
        alias: &str,
        client_key: &str,
        now_ms: u64,
    ) -> Result<(), RelayError> {
        if self.limited_alias.as_deref() != Some(alias) {
            return Ok(());
        }
        let hit = self.store.increment(client_key, self.window, now_ms);
        if hit.count <= self.limit {
            return Ok(());
        }
        let retry_after_secs = hit.retry_after_secs(now_ms).min(self.window.as_secs());
        tracing::info!(
            client = client_key,
            alias,
            count = hit.count,
            retry_after_secs,
            "rate limit exceeded"
        );
        Err(RelayError::RateLimited { retry_after_secs })
    }
}

/// Key used for rate limiting: the first `x-forwarded-for` hop when trusted,
/// else the peer address.
#[must_use]
pub fn client_key(
    headers: &HeaderMap,
    peer: Option<ClientAddr>,
    trust_forwarded_headers: bool,
) -> String {
    if trust_forwarded_headers {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }
    peer.map_or_else(
        || UNKNOWN_CLIENT.to_string(),
        |ClientAddr(addr)| addr.ip().to_string(),
    )
}

fn secrets_match(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .iter()
        .zip(provided)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
