use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::HeaderValue;

use crate::config::{ConfigError, ServerConfig};
use crate::error::RelayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
) -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the upstream completion call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with pooling and timeouts from the server config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS backend cannot be initialised.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
        )?;
        Ok(Self { client })
    }

    /// POST a streaming completion request; the caller reads the body as a stream.
    ///
    /// Non-success statuses are returned as-is so the caller can surface them.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        api_key: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            RelayError::Config("upstream credential contains invalid header characters".into())
        })?;
        self.client
            .post(url.clone())
            .header(AUTHORIZATION, bearer)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .body(body)
            .send()
            .await
            .map_err(|err| RelayError::Transport(format!("Upstream request failed: {err}")))
    }
}

/// `<base_url>/chat/completions`, tolerating a trailing slash on the base.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when the result is not a valid URL.
pub fn chat_completions_url(base_url: &str) -> Result<url::Url, ConfigError> {
    let base = base_url.trim().trim_end_matches('/');
    url::Url::parse(&format!("{base}/{CHAT_COMPLETIONS_PATH}"))
        .map_err(|err| ConfigError::Validation(format!("Invalid upstream.base_url: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_completions_url_joins_path() {
        let url = chat_completions_url("https://api.example.com/v1/").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat/completions");
        let url = chat_completions_url("http://127.0.0.1:9000").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/chat/completions");
    }

    #[test]
    fn test_chat_completions_url_invalid() {
        assert!(matches!(
            chat_completions_url("not a url"),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_transport_builds_from_default_config() {
        assert!(HttpTransport::new(&ServerConfig::default()).is_ok());
        let no_idle = ServerConfig {
            http_pool_idle_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(HttpTransport::new(&no_idle).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_credential_is_config_error() {
        let transport = HttpTransport::new(&ServerConfig::default()).unwrap();
        let url = chat_completions_url("http://127.0.0.1:9").unwrap();
        let err = transport
            .send_stream(&url, "bad\nkey", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(!err.to_string().contains("bad\nkey"));
    }
}
