use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title given to every chat at creation; replaced by the first-message
/// heuristic. Kept as the literal the original base rows use.
pub const PLACEHOLDER_TITLE: &str = "Nouvelle conversation";

/// A persisted conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// One turn (user or assistant) within a chat. Append-only.
///
/// For assistant turns that used tools, `content` is a serialized
/// `{text, toolCalls, toolResults}` envelope; otherwise plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: String, // "user" or "assistant"
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(chat_id: &str, role: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Wire shape of one message in a turn request, as the browser sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<UiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl UiMessage {
    /// Concatenated text parts, ignoring non-text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.kind == "text")
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Incremental output chunk pushed to the browser over SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta { delta: String },
    #[serde(rename_all = "camelCase")]
    ToolStatus {
        tool_call_id: String,
        tool_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
    Finish,
}

/// Newest user utterance: scan from the end for the last user-role entry
/// and join its text segments.
pub fn extract_last_user_text(messages: &[UiMessage]) -> String {
    for m in messages.iter().rev() {
        if m.role != "user" {
            continue;
        }
        return m.text().trim().to_string();
    }
    String::new()
}

/// Heuristic chat title: first five whitespace-separated words of the
/// utterance, or the placeholder when empty.
pub fn title_from_text(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(5).collect();
    if words.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        words.join(" ")
    }
}
