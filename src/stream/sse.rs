/// SSE frame encoding helpers for the relay's outbound stream.
use bytes::Bytes;

use super::delta::DONE_TOKEN;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Format a data-only SSE frame: `data: {payload}\n\n`.
#[must_use]
pub fn data_frame(payload: &str) -> String {
    let mut out = String::with_capacity(8 + payload.len());
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
    out
}

#[must_use]
pub fn data_frame_bytes(payload: &str) -> Bytes {
    Bytes::from(data_frame(payload))
}

#[must_use]
pub fn done_frame_bytes() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

/// Check whether an already-stripped payload is the terminal marker.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    payload.trim() == DONE_TOKEN
}
