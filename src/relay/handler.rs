use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderMap;

use crate::error::RelayError;
use crate::gate::{client_key, ClientAddr};
use crate::state::AppState;

use super::request::{build_upstream_body, ChatRequest};
use super::transcode::{relay_frames, sse_response};

/// `POST /api/chat`.
pub async fn chat_handler(
    state: Arc<AppState>,
    headers: HeaderMap,
    peer: Option<ClientAddr>,
    body: Bytes,
) -> Response {
    match relay_chat(&state, &headers, peer, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(status = err.status().as_u16(), "chat request rejected: {err}");
            err.into_response()
        }
    }
}

async fn relay_chat(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<ClientAddr>,
    body: &[u8],
) -> Result<Response, RelayError> {
    state.gate.check_secret(headers)?;
    let request = ChatRequest::from_slice(body)?;
    let resolved = state.aliases.resolve(request.model_alias.as_deref());
    let entry = resolved.entry;

    let client = client_key(
        headers,
        peer,
        state.config.server.trust_forwarded_headers,
    );
    state.gate.check_rate_limit(&entry.alias, &client)?;

    let prompt = request.prompt()?;
    let api_key = state.config.upstream.resolve_api_key().ok_or_else(|| {
        RelayError::Config("upstream API credential is not configured".to_string())
    })?;

    let mut upstream_body = build_upstream_body(
        &entry.upstream_model,
        &state.config.features.system_prompt,
        &request.history,
        prompt,
    );
    upstream_body.temperature = state.config.upstream.temperature;
    upstream_body.max_tokens = state.config.upstream.max_tokens;
    let payload = serde_json::to_vec(&upstream_body)
        .map_err(|err| RelayError::Internal(format!("Failed to encode upstream body: {err}")))?;

    let request_id = state.next_request_id();
    if resolved.fell_back {
        tracing::debug!(
            %request_id,
            requested = request.model_alias.as_deref().unwrap_or_default(),
            "unknown model alias, using default"
        );
    }
    tracing::info!(
        %request_id,
        alias = %entry.alias,
        model = %entry.upstream_model,
        history_len = request.history.len(),
        "relaying chat request"
    );

    let response = state
        .transport
        .send_stream(state.upstream_url(), &api_key, Bytes::from(payload))
        .await?;
    let status = response.status();
    if !status.is_success() {
        let error_body = response.bytes().await.unwrap_or_default();
        tracing::warn!(
            %request_id,
            status = status.as_u16(),
            "upstream rejected chat request"
        );
        return Err(RelayError::upstream(status.as_u16(), &error_body));
    }

    Ok(sse_response(Body::from_stream(relay_frames(
        response.bytes_stream(),
    ))))
}
