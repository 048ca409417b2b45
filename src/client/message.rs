use serde::{Deserialize, Serialize};

pub type MessageId = uuid::Uuid;

/// Shown on an assistant turn whose stream finished without any content.
pub const EMPTY_RESPONSE_ERROR: &str = "AI response was empty";
const ABORTED_TAG: &str = "aborted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Liked,
    Disliked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDirection {
    Prev,
    Next,
}

/// Terminal error tag on a turn. Serialized as `"aborted"` or the failure text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageError {
    /// Stopped by the user; not a failure.
    Aborted,
    Failed(String),
}

impl MessageError {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, MessageError::Aborted)
    }
}

impl From<String> for MessageError {
    fn from(value: String) -> Self {
        if value == ABORTED_TAG {
            MessageError::Aborted
        } else {
            MessageError::Failed(value)
        }
    }
}

impl From<MessageError> for String {
    fn from(value: MessageError) -> Self {
        match value {
            MessageError::Aborted => ABORTED_TAG.to_string(),
            MessageError::Failed(reason) => reason,
        }
    }
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::Aborted => f.write_str(ABORTED_TAG),
            MessageError::Failed(reason) => f.write_str(reason),
        }
    }
}

/// One generated answer for an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageVersion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningSource {
    /// A dedicated reasoning field in the delta.
    Field,
    /// A `<think>` span inlined in the answer text.
    Tagged,
}

/// Display-only record of one reasoning fragment; reset for every generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingStep {
    pub text: String,
    pub timestamp: u64,
    pub source: ReasoningSource,
}

/// A turn in a conversation.
///
/// For assistant turns `versions` is never empty and `text`,
/// `model_identifier` and `timestamp` mirror `versions[active_version_index]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    speaker: Speaker,
    text: String,
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<MessageError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    versions: Vec<MessageVersion>,
    #[serde(default)]
    active_version_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback: Option<Feedback>,
}

impl Message {
    pub(crate) fn user(id: MessageId, text: impl Into<String>, now: u64) -> Self {
        Self {
            id,
            speaker: Speaker::User,
            text: text.into(),
            timestamp: now,
            error: None,
            model_identifier: None,
            versions: Vec::new(),
            active_version_index: 0,
            feedback: None,
        }
    }

    pub(crate) fn assistant(id: MessageId, first: MessageVersion) -> Self {
        let mut message = Self {
            id,
            speaker: Speaker::Assistant,
            text: String::new(),
            timestamp: first.timestamp,
            error: None,
            model_identifier: None,
            versions: vec![first],
            active_version_index: 0,
            feedback: None,
        };
        message.sync_active();
        message
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.speaker == Speaker::Assistant
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn error(&self) -> Option<&MessageError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn model_identifier(&self) -> Option<&str> {
        self.model_identifier.as_deref()
    }

    #[must_use]
    pub fn versions(&self) -> &[MessageVersion] {
        &self.versions
    }

    #[must_use]
    pub fn active_version_index(&self) -> usize {
        self.active_version_index
    }

    #[must_use]
    pub fn feedback(&self) -> Option<Feedback> {
        self.feedback
    }

    pub(crate) fn set_user_text(&mut self, text: impl Into<String>, now: u64) {
        self.text = text.into();
        self.timestamp = now;
    }

    /// Append a new version and make it active.
    pub(crate) fn push_version(&mut self, version: MessageVersion) {
        self.versions.push(version);
        self.active_version_index = self.versions.len() - 1;
        self.error = None;
        self.sync_active();
    }

    /// Append streamed text to the last version.
    pub(crate) fn append_to_current(&mut self, fragment: &str, now: u64) {
        let last = self.versions.len().saturating_sub(1);
        let Some(current) = self.versions.last_mut() else {
            return;
        };
        current.text.push_str(fragment);
        current.timestamp = now;
        if self.active_version_index == last {
            self.sync_active();
        }
    }

    pub(crate) fn set_error(&mut self, error: Option<MessageError>) {
        self.error = error;
    }

    /// Move the active version one step, clamped to the valid range.
    ///
    /// Returns the new index. An actual switch clears any error flag.
    pub(crate) fn navigate(&mut self, direction: VersionDirection) -> usize {
        let max = self.versions.len().saturating_sub(1);
        let target = match direction {
            VersionDirection::Prev => self.active_version_index.saturating_sub(1),
            VersionDirection::Next => (self.active_version_index + 1).min(max),
        };
        if target != self.active_version_index {
            self.active_version_index = target;
            self.error = None;
            self.sync_active();
        }
        self.active_version_index
    }

    /// Tri-state toggle: setting the current value clears it.
    pub(crate) fn toggle_feedback(&mut self, feedback: Feedback) -> Option<Feedback> {
        self.feedback = if self.feedback == Some(feedback) {
            None
        } else {
            Some(feedback)
        };
        self.feedback
    }

    /// Restore the version invariants on a message loaded from storage.
    pub(crate) fn normalize(&mut self) {
        if self.speaker == Speaker::User {
            self.versions.clear();
            self.active_version_index = 0;
            return;
        }
        if self.versions.is_empty() {
            self.versions.push(MessageVersion {
                text: std::mem::take(&mut self.text),
                model_identifier: self.model_identifier.take(),
                timestamp: self.timestamp,
            });
        }
        self.active_version_index = self.active_version_index.min(self.versions.len() - 1);
        self.sync_active();
    }

    fn sync_active(&mut self) {
        if let Some(active) = self.versions.get(self.active_version_index) {
            self.text.clone_from(&active.text);
            self.model_identifier.clone_from(&active.model_identifier);
            self.timestamp = active.timestamp;
        }
    }
}
