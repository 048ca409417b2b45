//! Incremental decoding of a chat-completion SSE byte stream.
//!
//! The pipeline is `bytes -> lines -> deltas [-> segments]`: [`LineBuffer`]
//! reassembles logical lines across arbitrary chunk boundaries,
//! [`decode_line`] turns one `data:` line into zero or more [`Delta`]s, and
//! [`ThinkSplitter`] separates inline `<think>` spans from answer text for
//! models that do not use a dedicated reasoning field.

pub mod delta;
pub mod lines;
pub mod sse;
pub mod think;

pub use delta::{data_payload, decode_line, Delta, DeltaKind, Deltas, DONE_TOKEN};
pub use lines::{line_stream, LineBuffer};
pub use think::{Segment, ThinkSplitter, THINK_CLOSE, THINK_OPEN};
