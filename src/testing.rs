//! Test doubles shared across unit and integration tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ModelProvider, ProviderResponse, ToolCall};

pub struct RecordedCall {
    pub messages: Vec<Value>,
    pub tool_names: Vec<String>,
}

/// Scripted provider: each `chat_stream` call pops the next queued
/// response, streaming its text through `on_delta` in one piece.
pub struct MockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> ProviderResponse {
        ProviderResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            usage: None,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn chat_stream(
        &self,
        _model: &str,
        messages: &[Value],
        tools: &[Value],
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> anyhow::Result<ProviderResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            tool_names: tools
                .iter()
                .filter_map(|t| t["function"]["name"].as_str().map(|s| s.to_string()))
                .collect(),
        });

        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("MockProvider: no scripted response left");
            }
            responses.remove(0)
        };

        if let Some(ref text) = response.content {
            on_delta(text);
        }
        Ok(response)
    }
}
