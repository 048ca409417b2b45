use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RelayError;

/// Role of a prior turn as sent by the browser.
///
/// `ai` is accepted as a legacy spelling of `assistant`; any other role is
/// rejected at the boundary instead of being forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

impl<'de> Deserialize<'de> for HistoryRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let role = String::deserialize(deserializer)?;
        match role.as_str() {
            "user" => Ok(HistoryRole::User),
            "assistant" | "ai" => Ok(HistoryRole::Assistant),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["user", "assistant", "ai"],
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,
}

impl ChatRequest {
    /// Parse a request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for malformed JSON or unknown roles.
    pub fn from_slice(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body)
            .map_err(|err| RelayError::InvalidRequest(format!("Invalid request body: {err}")))
    }

    /// The prompt, required to be present and non-blank.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the prompt is missing or blank.
    pub fn prompt(&self) -> Result<&str, RelayError> {
        self.prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("Prompt is required".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamRole {
    System,
    User,
    Assistant,
}

impl From<HistoryRole> for UpstreamRole {
    fn from(role: HistoryRole) -> Self {
        match role {
            HistoryRole::User => UpstreamRole::User,
            HistoryRole::Assistant => UpstreamRole::Assistant,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpstreamMessage<'a> {
    pub role: UpstreamRole,
    pub content: &'a str,
}

/// Streaming chat-completions request sent to the provider.
#[derive(Debug, Serialize)]
pub struct UpstreamChatBody<'a> {
    pub model: &'a str,
    pub messages: Vec<UpstreamMessage<'a>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// System instruction, then history in order, then the new prompt.
#[must_use]
pub fn build_upstream_body<'a>(
    model: &'a str,
    system_prompt: &'a str,
    history: &'a [HistoryEntry],
    prompt: &'a str,
) -> UpstreamChatBody<'a> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(UpstreamMessage {
        role: UpstreamRole::System,
        content: system_prompt,
    });
    messages.extend(history.iter().map(|entry| UpstreamMessage {
        role: entry.role.into(),
        content: entry.content.as_str(),
    }));
    messages.push(UpstreamMessage {
        role: UpstreamRole::User,
        content: prompt,
    });
    UpstreamChatBody {
        model,
        messages,
        stream: true,
        temperature: None,
        max_tokens: None,
    }
}
