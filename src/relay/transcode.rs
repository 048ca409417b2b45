use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::RelayError;
use crate::stream::delta::data_payload;
use crate::stream::line_stream;
use crate::stream::sse::{data_frame_bytes, done_frame_bytes, is_done_payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    Streaming,
    Finished,
}

/// Re-frame an upstream SSE body for the browser.
///
/// Every non-empty `data:` line is forwarded as `data: <payload>\n\n`; other
/// lines are dropped. Exactly one `data: [DONE]\n\n` closes the output whether
/// or not the upstream sent one. A read error ends the output with `Err` so
/// the response body is aborted rather than closed cleanly.
pub fn relay_frames<S, E>(byte_stream: S) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(line_stream(byte_stream)), RelayPhase::Streaming, 0u64),
        |(mut lines, phase, mut forwarded)| async move {
            if phase == RelayPhase::Finished {
                return None;
            }
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        let Some(payload) = data_payload(&line) else {
                            continue;
                        };
                        if payload.is_empty() {
                            continue;
                        }
                        if is_done_payload(payload) {
                            tracing::debug!(forwarded, "relay stream finished");
                            return Some((
                                Ok(done_frame_bytes()),
                                (lines, RelayPhase::Finished, forwarded),
                            ));
                        }
                        forwarded += 1;
                        return Some((
                            Ok(data_frame_bytes(payload)),
                            (lines, RelayPhase::Streaming, forwarded),
                        ));
                    }
                    Some(Err(err)) => {
                        tracing::warn!(forwarded, "upstream stream read failed: {err}");
                        return Some((
                            Err(RelayError::Transport(format!(
                                "Upstream stream interrupted: {err}"
                            ))),
                            (lines, RelayPhase::Finished, forwarded),
                        ));
                    }
                    None => {
                        tracing::debug!(
                            forwarded,
                            "upstream closed without a terminal marker; appending one"
                        );
                        return Some((
                            Ok(done_frame_bytes()),
                            (lines, RelayPhase::Finished, forwarded),
                        ));
                    }
                }
            }
        },
    )
}

/// Wrap a body as an unbuffered `text/event-stream` response.
#[must_use]
pub fn sse_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        http::header::CONTENT_ENCODING,
        http::HeaderValue::from_static("identity"),
    );
    headers.insert(
        http::HeaderName::from_static("x-accel-buffering"),
        http::HeaderValue::from_static("no"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    async fn collect_ok(chunks: Vec<&'static [u8]>) -> Vec<Bytes> {
        let source =
            futures_util::stream::iter(chunks.into_iter().map(|c| Ok::<_, Infallible>(Bytes::from_static(c))));
        relay_frames(source)
            .map(|frame| frame.expect("relay frame"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_forwards_data_lines_and_appends_done() {
        let frames = collect_ok(vec![
            b"data: {\"a\":1}\n\n: ping\n\nevent: x\n",
            b"data: {\"b\":2}\n\n",
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"data: {\"a\":1}\n\n"),
                Bytes::from_static(b"data: {\"b\":2}\n\n"),
                Bytes::from_static(b"data: [DONE]\n\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_done_is_not_duplicated() {
        let frames = collect_ok(vec![b"data: {\"a\":1}\n\ndata: [DONE]\n\n"]).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Bytes::from_static(b"data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_forwarded() {
        let frames = collect_ok(vec![b"data: {\"a\"", b":1}"]).await;
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"data: {\"a\":1}\n\n"),
                Bytes::from_static(b"data: [DONE]\n\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_error_terminates_with_error() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Err("reset by peer"),
        ]);
        let frames: Vec<Result<Bytes, RelayError>> = relay_frames(source).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(RelayError::Transport(_))));
    }

    #[test]
    fn test_sse_response_headers() {
        let response = sse_response(axum::body::Body::empty());
        let headers = response.headers();
        assert_eq!(
            headers[http::header::CACHE_CONTROL],
            "no-cache, no-transform"
        );
        assert_eq!(headers["x-accel-buffering"], "no");
        assert!(headers[http::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
    }
}
