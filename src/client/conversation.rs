use crate::relay::{ChatRequest, HistoryEntry, HistoryRole};
use crate::util::{unix_now_millis, IdGenerator};

use super::cancel::CancelToken;
use super::message::{
    Feedback, Message, MessageError, MessageId, MessageVersion, ReasoningSource, Speaker,
    ThinkingStep, VersionDirection, EMPTY_RESPONSE_ERROR,
};
use super::session::{Session, SessionId};

const TITLE_MAX_CHARS: usize = 40;
const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),
    #[error("message {0} is not an assistant message")]
    NotAssistant(MessageId),
    #[error("message {0} is not a user message")]
    NotUser(MessageId),
    #[error("message {0} has no preceding user prompt")]
    NoPrecedingPrompt(MessageId),
    #[error("prompt cannot be empty")]
    EmptyPrompt,
}

/// Identifies one generation attempt; events for any other id are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(u64);

/// Content decoded from the relay for the in-flight generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Answer(String),
    Reasoning {
        text: String,
        source: ReasoningSource,
    },
}

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    /// Finished without content; the turn carries the empty-response error.
    Empty,
    Aborted,
    Failed,
}

/// Everything the caller needs to run a generation the conversation just opened.
#[derive(Debug)]
pub struct GenerationPlan {
    pub id: GenerationId,
    pub request: ChatRequest,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    NewMessage,
    NewVersion(MessageId),
}

#[derive(Debug)]
struct ActiveGeneration {
    id: GenerationId,
    target: Target,
    /// Assistant message receiving content, set on the first answer delta.
    message: Option<MessageId>,
    model: String,
    cancel: CancelToken,
}

/// Client-side conversation state: the message list plus at most one
/// in-flight generation (`idle` when `active` is `None`).
#[derive(Debug)]
pub struct Conversation {
    id: SessionId,
    title: String,
    timestamp: u64,
    model: String,
    archived: bool,
    messages: Vec<Message>,
    thinking: Vec<ThinkingStep>,
    active: Option<ActiveGeneration>,
    banner: Option<String>,
    next_generation: u64,
    ids: IdGenerator,
}

impl Conversation {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let ids = IdGenerator::new();
        Self {
            id: ids.next_uuid(),
            title: String::new(),
            timestamp: unix_now_millis(),
            model: model.into(),
            archived: false,
            messages: Vec::new(),
            thinking: Vec::new(),
            active: None,
            banner: None,
            next_generation: 1,
            ids,
        }
    }

    /// Rebuild from a stored snapshot, repairing version invariants.
    #[must_use]
    pub fn from_session(session: Session) -> Self {
        let mut conversation = Self::new(session.model_identifier);
        conversation.id = session.id;
        conversation.title = session.title;
        conversation.timestamp = session.timestamp;
        conversation.archived = session.archived;
        conversation.messages = session.messages;
        for message in &mut conversation.messages {
            message.normalize();
        }
        conversation
    }

    #[must_use]
    pub fn to_session(&self) -> Session {
        Session {
            id: self.id,
            title: self.title.clone(),
            timestamp: self.timestamp,
            model_identifier: self.model.clone(),
            archived: self.archived,
            messages: self.messages.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model alias used for generations started from now on.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    #[must_use]
    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn set_archived(&mut self, archived: bool) {
        self.archived = archived;
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id() == id)
    }

    /// Reasoning trail of the current (or last) generation.
    #[must_use]
    pub fn thinking_steps(&self) -> &[ThinkingStep] {
        &self.thinking
    }

    /// Transient conversation-level error for a banner.
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn clear_banner(&mut self) {
        self.banner = None;
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_generation(&self) -> Option<GenerationId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Append a user turn without starting a generation.
    pub fn push_user_message(&mut self, text: &str) -> MessageId {
        let id = self.ids.next_uuid();
        self.messages
            .push(Message::user(id, text.trim(), unix_now_millis()));
        id
    }

    /// Start answering `prompt`, appending it as a user turn unless the last
    /// message already is one (`already_appended`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyPrompt`] for a blank prompt.
    pub fn begin_send(
        &mut self,
        prompt: &str,
        already_appended: bool,
    ) -> Result<GenerationPlan, ClientError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClientError::EmptyPrompt);
        }
        self.stop();

        let appended = already_appended
            && self
                .messages
                .last()
                .is_some_and(|message| message.speaker() == Speaker::User);
        if !appended {
            self.push_user_message(prompt);
        }
        if self.title.is_empty() {
            self.title = derive_title(prompt);
        }
        let history = history_from(&self.messages[..self.messages.len() - 1]);
        Ok(self.start(Target::NewMessage, history, prompt.to_string()))
    }

    /// Start a new version of assistant turn `id`, re-asking its preceding prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownMessage`], [`ClientError::NotAssistant`] or
    /// [`ClientError::NoPrecedingPrompt`]; nothing is cancelled on error.
    pub fn begin_regenerate(&mut self, id: MessageId) -> Result<GenerationPlan, ClientError> {
        let index = self.index_of(id)?;
        if !self.messages[index].is_assistant() {
            return Err(ClientError::NotAssistant(id));
        }
        let prompt_index = self.messages[..index]
            .iter()
            .rposition(|message| message.speaker() == Speaker::User)
            .ok_or(ClientError::NoPrecedingPrompt(id))?;
        let prompt = self.messages[prompt_index].text().trim().to_string();
        if prompt.is_empty() {
            return Err(ClientError::NoPrecedingPrompt(id));
        }
        let history = history_from(&self.messages[..prompt_index]);
        self.stop();
        Ok(self.start(Target::NewVersion(id), history, prompt))
    }

    /// Replace user turn `id`, drop everything after it, and answer it afresh.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyPrompt`], [`ClientError::UnknownMessage`] or
    /// [`ClientError::NotUser`]; nothing is cancelled on error.
    pub fn begin_edit(
        &mut self,
        id: MessageId,
        new_text: &str,
    ) -> Result<GenerationPlan, ClientError> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(ClientError::EmptyPrompt);
        }
        let index = self.index_of(id)?;
        if self.messages[index].speaker() != Speaker::User {
            return Err(ClientError::NotUser(id));
        }
        self.stop();
        self.messages.truncate(index + 1);
        self.messages[index].set_user_text(new_text, unix_now_millis());
        let history = history_from(&self.messages[..index]);
        Ok(self.start(Target::NewMessage, history, new_text.to_string()))
    }

    /// Apply one decoded event. Returns whether it changed state.
    pub fn apply(&mut self, generation: GenerationId, event: StreamEvent) -> bool {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.id == generation)
        else {
            return false;
        };
        let now = unix_now_millis();
        match event {
            StreamEvent::Reasoning { text, source } => {
                if text.is_empty() {
                    return false;
                }
                self.thinking.push(ThinkingStep {
                    text,
                    timestamp: now,
                    source,
                });
                true
            }
            StreamEvent::Answer(text) => {
                if text.is_empty() {
                    return false;
                }
                if let Some(message_id) = active.message {
                    let Some(message) = self.messages.iter_mut().find(|m| m.id() == message_id)
                    else {
                        return false;
                    };
                    message.append_to_current(&text, now);
                    return true;
                }
                let version = MessageVersion {
                    text,
                    model_identifier: Some(active.model.clone()),
                    timestamp: now,
                };
                match active.target {
                    Target::NewMessage => {
                        let id = self.ids.next_uuid();
                        self.messages.push(Message::assistant(id, version));
                        active.message = Some(id);
                    }
                    Target::NewVersion(id) => {
                        let Some(message) = self.messages.iter_mut().find(|m| m.id() == id)
                        else {
                            return false;
                        };
                        message.push_version(version);
                        active.message = Some(id);
                    }
                }
                true
            }
        }
    }

    /// The stream reached its end. An empty stream still yields a visible turn.
    pub fn complete(&mut self, generation: GenerationId) -> Option<GenerationOutcome> {
        let active = self.take_active(generation)?;
        self.timestamp = unix_now_millis();
        if active.message.is_some() {
            tracing::debug!(generation = active.id.0, "generation completed");
            return Some(GenerationOutcome::Completed);
        }
        tracing::debug!(generation = active.id.0, "generation produced no content");
        self.attach_error(
            &active,
            MessageError::Failed(EMPTY_RESPONSE_ERROR.to_string()),
        );
        Some(GenerationOutcome::Empty)
    }

    /// The generation failed; `reason` is already user-facing text.
    pub fn fail(&mut self, generation: GenerationId, reason: String) -> Option<GenerationOutcome> {
        let active = self.take_active(generation)?;
        self.timestamp = unix_now_millis();
        tracing::debug!(generation = active.id.0, %reason, "generation failed");
        self.attach_error(&active, MessageError::Failed(reason.clone()));
        self.banner = Some(reason);
        Some(GenerationOutcome::Failed)
    }

    /// The reader observed cancellation for `generation`.
    pub fn abort(&mut self, generation: GenerationId) -> Option<GenerationOutcome> {
        let active = self.take_active(generation)?;
        self.mark_aborted(&active);
        Some(GenerationOutcome::Aborted)
    }

    /// Cancel the in-flight generation, keeping partial text flagged `aborted`.
    ///
    /// Returns `false` (and does nothing) when already idle.
    pub fn stop(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.cancel.cancel();
        self.mark_aborted(&active);
        tracing::debug!(generation = active.id.0, "generation stopped");
        true
    }

    /// # Errors
    ///
    /// Returns [`ClientError::UnknownMessage`] or [`ClientError::NotAssistant`].
    pub fn navigate_version(
        &mut self,
        id: MessageId,
        direction: VersionDirection,
    ) -> Result<usize, ClientError> {
        let message = self.assistant_mut(id)?;
        Ok(message.navigate(direction))
    }

    /// Toggle like/dislike on an assistant turn, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownMessage`] or [`ClientError::NotAssistant`].
    pub fn set_feedback(
        &mut self,
        id: MessageId,
        feedback: Feedback,
    ) -> Result<Option<Feedback>, ClientError> {
        let message = self.assistant_mut(id)?;
        Ok(message.toggle_feedback(feedback))
    }

    fn start(&mut self, target: Target, history: Vec<HistoryEntry>, prompt: String) -> GenerationPlan {
        let id = GenerationId(self.next_generation);
        self.next_generation += 1;
        let cancel = CancelToken::new();
        self.thinking.clear();
        self.banner = None;
        self.active = Some(ActiveGeneration {
            id,
            target,
            message: None,
            model: self.model.clone(),
            cancel: cancel.clone(),
        });
        tracing::debug!(generation = id.0, ?target, history_len = history.len(), "generation started");
        GenerationPlan {
            id,
            request: ChatRequest {
                prompt: Some(prompt),
                history,
                model_alias: Some(self.model.clone()),
            },
            cancel,
        }
    }

    fn take_active(&mut self, generation: GenerationId) -> Option<ActiveGeneration> {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.id == generation)
        {
            self.active.take()
        } else {
            None
        }
    }

    fn mark_aborted(&mut self, active: &ActiveGeneration) {
        let Some(message_id) = active.message else {
            return;
        };
        if let Some(message) = self.messages.iter_mut().find(|m| m.id() == message_id) {
            message.set_error(Some(MessageError::Aborted));
        }
    }

    fn attach_error(&mut self, active: &ActiveGeneration, error: MessageError) {
        let existing = active.message.or(match active.target {
            Target::NewMessage => None,
            Target::NewVersion(id) => Some(id),
        });
        if let Some(message_id) = existing {
            if let Some(message) = self.messages.iter_mut().find(|m| m.id() == message_id) {
                message.set_error(Some(error));
            }
            return;
        }
        let mut message = Message::assistant(
            self.ids.next_uuid(),
            MessageVersion {
                text: String::new(),
                model_identifier: Some(active.model.clone()),
                timestamp: unix_now_millis(),
            },
        );
        message.set_error(Some(error));
        self.messages.push(message);
    }

    fn index_of(&self, id: MessageId) -> Result<usize, ClientError> {
        self.messages
            .iter()
            .position(|message| message.id() == id)
            .ok_or(ClientError::UnknownMessage(id))
    }

    fn assistant_mut(&mut self, id: MessageId) -> Result<&mut Message, ClientError> {
        let index = self.index_of(id)?;
        let message = &mut self.messages[index];
        if !message.is_assistant() {
            return Err(ClientError::NotAssistant(id));
        }
        Ok(message)
    }
}

/// Prior turns as relay history; blank turns (e.g. failed placeholders) are skipped.
fn history_from(messages: &[Message]) -> Vec<HistoryEntry> {
    messages
        .iter()
        .filter(|message| !message.text().trim().is_empty())
        .map(|message| HistoryEntry {
            role: match message.speaker() {
                Speaker::User => HistoryRole::User,
                Speaker::Assistant => HistoryRole::Assistant,
            },
            content: message.text().to_string(),
        })
        .collect()
}

/// Session title from the first prompt: whitespace collapsed, at most 40 chars.
#[must_use]
pub fn derive_title(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let mut title: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    title.truncate(title.trim_end().len());
    title.push_str(TITLE_ELLIPSIS);
    title
}
