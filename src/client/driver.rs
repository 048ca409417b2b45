use std::sync::Arc;

use parking_lot::Mutex;

use super::cancel::CancelToken;
use super::conversation::{ClientError, Conversation, GenerationOutcome, GenerationPlan};
use super::friendly::friendly_transport_error;
use super::message::{Feedback, MessageId, VersionDirection};
use super::reader::{GenerationReader, ReaderEvent};
use super::session::{Session, SessionStore};
use super::transport::ChatTransport;

/// The model alias a client talks to and whether it inlines `<think>` spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProfile {
    pub alias: String,
    pub inline_reasoning_tags: bool,
}

impl ModelProfile {
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            inline_reasoning_tags: false,
        }
    }

    #[must_use]
    pub fn with_inline_reasoning_tags(mut self, enabled: bool) -> Self {
        self.inline_reasoning_tags = enabled;
        self
    }
}

/// Cloneable handle that stops whichever generation is in flight.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<CancelToken>>>,
}

impl StopHandle {
    /// Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        match self.slot.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn arm(&self, token: CancelToken) {
        *self.slot.lock() = Some(token);
    }

    fn disarm(&self, token: &CancelToken) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|armed| armed.same_as(token)) {
            *slot = None;
        }
    }
}

/// Runs generations for one conversation against a relay transport.
pub struct ChatClient<T> {
    transport: T,
    conversation: Conversation,
    profile: ModelProfile,
    stop: StopHandle,
    store: Option<Arc<dyn SessionStore>>,
}

impl<T: ChatTransport> ChatClient<T> {
    #[must_use]
    pub fn new(transport: T, profile: ModelProfile) -> Self {
        let conversation = Conversation::new(profile.alias.clone());
        Self::with_conversation(transport, profile, conversation)
    }

    /// Continue a stored conversation.
    #[must_use]
    pub fn resume(transport: T, profile: ModelProfile, session: Session) -> Self {
        let mut conversation = Conversation::from_session(session);
        conversation.set_model(profile.alias.clone());
        Self::with_conversation(transport, profile, conversation)
    }

    fn with_conversation(transport: T, profile: ModelProfile, conversation: Conversation) -> Self {
        Self {
            transport,
            conversation,
            profile,
            stop: StopHandle::default(),
            store: None,
        }
    }

    /// Write the conversation back to `store` after every finished exchange.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[must_use]
    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: ModelProfile) {
        self.conversation.set_model(profile.alias.clone());
        self.profile = profile;
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the in-flight generation. A no-op when idle.
    pub fn stop(&mut self) -> bool {
        let signalled = self.stop.stop();
        self.conversation.stop() || signalled
    }

    /// # Errors
    ///
    /// Returns [`ClientError::EmptyPrompt`] for a blank prompt.
    pub async fn send(&mut self, prompt: &str) -> Result<GenerationOutcome, ClientError> {
        let plan = self.conversation.begin_send(prompt, false)?;
        Ok(self.run(plan).await)
    }

    /// # Errors
    ///
    /// Propagates the precondition errors of [`Conversation::begin_regenerate`].
    pub async fn regenerate(&mut self, id: MessageId) -> Result<GenerationOutcome, ClientError> {
        let plan = self.conversation.begin_regenerate(id)?;
        Ok(self.run(plan).await)
    }

    /// # Errors
    ///
    /// Propagates the precondition errors of [`Conversation::begin_edit`].
    pub async fn edit_and_resubmit(
        &mut self,
        id: MessageId,
        new_text: &str,
    ) -> Result<GenerationOutcome, ClientError> {
        let plan = self.conversation.begin_edit(id, new_text)?;
        Ok(self.run(plan).await)
    }

    /// # Errors
    ///
    /// Returns [`ClientError::UnknownMessage`] or [`ClientError::NotAssistant`].
    pub fn navigate_version(
        &mut self,
        id: MessageId,
        direction: VersionDirection,
    ) -> Result<usize, ClientError> {
        let index = self.conversation.navigate_version(id, direction)?;
        self.persist();
        Ok(index)
    }

    /// # Errors
    ///
    /// Returns [`ClientError::UnknownMessage`] or [`ClientError::NotAssistant`].
    pub fn set_feedback(
        &mut self,
        id: MessageId,
        feedback: Feedback,
    ) -> Result<Option<Feedback>, ClientError> {
        let state = self.conversation.set_feedback(id, feedback)?;
        self.persist();
        Ok(state)
    }

    async fn run(&mut self, plan: GenerationPlan) -> GenerationOutcome {
        let GenerationPlan {
            id,
            request,
            cancel,
        } = plan;
        self.stop.arm(cancel.clone());

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.transport.open(&request) => Some(result),
        };
        let outcome = match opened {
            None => self.conversation.abort(id),
            Some(Err(err)) => {
                tracing::warn!(generation = ?id, "relay request failed: {err}");
                self.conversation.fail(id, friendly_transport_error(&err))
            }
            Some(Ok(stream)) => {
                let mut reader =
                    GenerationReader::new(stream, cancel.clone(), self.profile.inline_reasoning_tags);
                loop {
                    match reader.next_event().await {
                        Some(ReaderEvent::Content(event)) => {
                            self.conversation.apply(id, event);
                        }
                        Some(ReaderEvent::Finished) | None => break self.conversation.complete(id),
                        Some(ReaderEvent::Failed(reason)) => {
                            break self.conversation.fail(id, reason)
                        }
                        Some(ReaderEvent::Cancelled) => break self.conversation.abort(id),
                    }
                }
            }
        };

        self.stop.disarm(&cancel);
        self.persist();
        // `None` means the generation was superseded or stopped elsewhere.
        outcome.unwrap_or(GenerationOutcome::Aborted)
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if self.conversation.messages().is_empty() {
            return;
        }
        if let Err(err) = store.save(self.conversation.to_session()) {
            tracing::warn!(session = %self.conversation.id(), "failed to save session: {err}");
        }
    }
}
