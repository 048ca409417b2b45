use std::pin::Pin;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderName, HeaderValue};

use crate::relay::ChatRequest;

const CHAT_PATH: &str = "api/chat";
const DEFAULT_SECRET_HEADER: &str = "x-relay-secret";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The relay answered with a non-success status before streaming.
    #[error("relay responded with status {status}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

/// Raw relay response body, chunked as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Opens one streaming chat request against the relay.
pub trait ChatTransport: Send + Sync {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>>;
}

impl<T: ChatTransport + ?Sized> ChatTransport for std::sync::Arc<T> {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>> {
        (**self).open(request)
    }
}

/// [`ChatTransport`] over HTTP to a running relay.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    secret_header: HeaderName,
    secret: Option<HeaderValue>,
}

impl HttpChatTransport {
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] for an invalid base URL or secret,
    /// or when the HTTP client cannot be built.
    pub fn new(relay_base_url: &str, secret: Option<&str>) -> Result<Self, TransportError> {
        let base = relay_base_url.trim().trim_end_matches('/');
        let endpoint = url::Url::parse(&format!("{base}/{CHAT_PATH}"))
            .map_err(|err| TransportError::Network(format!("Invalid relay URL: {err}")))?;
        let secret = secret
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|_| TransportError::Network("Invalid relay secret".to_string()))?;
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .build()
            .map_err(|err| TransportError::Network(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint,
            secret_header: HeaderName::from_static(DEFAULT_SECRET_HEADER),
            secret,
        })
    }

    #[must_use]
    pub fn with_secret_header(mut self, header: HeaderName) -> Self {
        self.secret_header = header;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

impl ChatTransport for HttpChatTransport {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            let body = serde_json::to_vec(request)
                .map_err(|err| TransportError::Network(format!("Failed to encode request: {err}")))?;
            let mut builder = self
                .client
                .post(self.endpoint.clone())
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
                .body(body);
            if let Some(secret) = &self.secret {
                builder = builder.header(self.secret_header.clone(), secret.clone());
            }
            let response = builder
                .send()
                .await
                .map_err(|err| TransportError::Network(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| TransportError::Network(err.to_string())));
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}
