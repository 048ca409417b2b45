//! Client side of the relay: consumes `POST /api/chat` and keeps a
//! versioned, reasoning-aware view of the conversation.
//!
//! [`Conversation`] is a synchronous state machine that owns the message
//! list. [`ChatClient`] drives it from a [`ChatTransport`] through a
//! [`GenerationReader`], one generation at a time.

pub mod cancel;
pub mod conversation;
pub mod driver;
pub mod friendly;
pub mod message;
pub mod reader;
pub mod session;
pub mod share;
pub mod transport;

pub use cancel::CancelToken;
pub use conversation::{
    derive_title, ClientError, Conversation, GenerationId, GenerationOutcome, GenerationPlan,
    StreamEvent,
};
pub use driver::{ChatClient, ModelProfile, StopHandle};
pub use friendly::{friendly_error, friendly_transport_error};
pub use message::{
    Feedback, Message, MessageError, MessageId, MessageVersion, ReasoningSource, Speaker,
    ThinkingStep, VersionDirection, EMPTY_RESPONSE_ERROR,
};
pub use reader::{GenerationReader, ReaderEvent};
pub use session::{InMemorySessionStore, Session, SessionId, SessionStore, StoreError};
pub use share::{InMemoryShareStore, ShareStore};
pub use transport::{ByteStream, ChatTransport, HttpChatTransport, TransportError};
