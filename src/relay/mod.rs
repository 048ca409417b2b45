pub mod alias;
pub mod handler;
pub mod request;
pub mod transcode;

pub use alias::{AliasEntry, AliasTable, ResolvedModel};
pub use handler::chat_handler;
pub use request::{
    build_upstream_body, ChatRequest, HistoryEntry, HistoryRole, UpstreamChatBody,
    UpstreamMessage, UpstreamRole,
};
pub use transcode::{relay_frames, sse_response};
