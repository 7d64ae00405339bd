use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Chat, ChatMessage};

/// A model-invocable operation with validated input.
///
/// Executors must return `Ok` for every recoverable failure (bad input,
/// empty results, remote errors) with a guidance value the model can read
/// and adapt to. An `Err` escapes the tool layer and aborts the whole
/// stream, so implementations reserve it for genuinely unexpected states.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// OpenAI-format function schema as a JSON Value.
    fn schema(&self) -> Value;
    /// Execute with a JSON arguments string; returns the tool result value.
    async fn call(&self, arguments: &str) -> anyhow::Result<Value>;
}

/// A single tool call as returned by the LLM.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String, // JSON string
}

/// Token usage statistics from an LLM API response.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The LLM's response for one step: content text, tool calls, or both.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

/// Model provider — sends messages + tool defs to an LLM and streams the
/// response back. `on_delta` receives content tokens as they arrive; the
/// returned value is the fully accumulated step.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        tools: &[Value],
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> anyhow::Result<ProviderResponse>;
}

/// Persisted chat/message store contract: chats keyed by caller-supplied
/// id with an owner column, messages insertion-ordered per chat.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create-if-absent. Never overwrites an existing row's title.
    async fn upsert_chat(&self, id: &str, user_id: &str) -> anyhow::Result<()>;

    async fn get_chat(&self, id: &str) -> anyhow::Result<Option<Chat>>;

    /// Chats owned by `user_id`, newest first.
    async fn list_chats(&self, user_id: &str) -> anyhow::Result<Vec<Chat>>;

    /// Owner-checked rename; the title is trimmed. Returns rows affected
    /// (0 when the caller does not own the chat).
    async fn rename_chat(&self, id: &str, user_id: &str, title: &str) -> anyhow::Result<u64>;

    /// One-shot automatic rename: only applies while the title is still
    /// the creation placeholder.
    async fn rename_if_placeholder(&self, id: &str, title: &str) -> anyhow::Result<bool>;

    /// Owner-checked delete, cascading to the chat's messages.
    async fn delete_chat(&self, id: &str, user_id: &str) -> anyhow::Result<u64>;

    async fn append_message(&self, msg: &ChatMessage) -> anyhow::Result<()>;

    /// Messages of one chat ordered by creation time.
    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<ChatMessage>>;
}
