use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::providers::ProviderError;
use crate::traits::{ModelProvider, ProviderResponse, TokenUsage, ToolCall};

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Validate the base URL for security.
/// - HTTPS is required for remote URLs to protect API keys in transit
/// - HTTP is allowed only for localhost (local LLM servers and test stubs)
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";

            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local LLM server at '{}'. \
                     API key will be transmitted in cleartext.",
                    base_url
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). \
                     Use HTTPS to protect your API key in transit.",
                    base_url
                ))
            }
        }
        _ => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'. Only http and https are allowed.",
            scheme, base_url
        )),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        if let Err(e) = validate_base_url(base_url) {
            anyhow::bail!(e);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// A tool call being assembled from stream fragments. The id and name
/// arrive once; the arguments string arrives in pieces.
#[derive(Default)]
struct ToolCallDraft {
    id: String,
    name: String,
    arguments: String,
}

/// Fold one parsed stream chunk into the accumulators. Returns the content
/// delta of the chunk, if any.
fn apply_stream_chunk(
    chunk: &Value,
    drafts: &mut Vec<ToolCallDraft>,
    usage: &mut Option<TokenUsage>,
) -> Option<String> {
    if let Some(u) = chunk.get("usage").filter(|u| u.is_object()) {
        *usage = Some(TokenUsage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });
    }

    let delta = &chunk["choices"][0]["delta"];

    if let Some(tcs) = delta["tool_calls"].as_array() {
        for tc in tcs {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            while drafts.len() <= index {
                drafts.push(ToolCallDraft::default());
            }
            let draft = &mut drafts[index];
            if let Some(id) = tc["id"].as_str() {
                if !id.is_empty() {
                    draft.id = id.to_string();
                }
            }
            if let Some(name) = tc["function"]["name"].as_str() {
                draft.name.push_str(name);
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                draft.arguments.push_str(args);
            }
        }
    }

    delta["content"].as_str().map(|s| s.to_string())
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        tools: &[Value],
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> anyhow::Result<ProviderResponse> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        let url = format!("{}/chat/completions", self.base_url);
        info!(model, url = %url, tools = tools.len(), "Calling LLM API");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "Provider API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let mut full_content = String::new();
        let mut drafts: Vec<ToolCallDraft> = Vec::new();
        let mut usage: Option<TokenUsage> = None;

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::network(&e))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'outer;
                }

                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("Skipping unparseable stream chunk: {}", e);
                        continue;
                    }
                };

                if let Some(delta) = apply_stream_chunk(&parsed, &mut drafts, &mut usage) {
                    full_content.push_str(&delta);
                    on_delta(&delta);
                }
            }
        }

        let tool_calls: Vec<ToolCall> = drafts
            .into_iter()
            .filter(|d| !d.name.is_empty())
            .map(|d| ToolCall {
                id: d.id,
                name: d.name,
                arguments: if d.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    d.arguments
                },
            })
            .collect();

        debug!(
            content_len = full_content.len(),
            tool_calls = tool_calls.len(),
            "Provider stream complete"
        );

        Ok(ProviderResponse {
            content: if full_content.is_empty() {
                None
            } else {
                Some(full_content)
            },
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_accepted() {
        assert!(validate_base_url("https://api.openai.com").is_ok());
    }

    #[test]
    fn http_localhost_accepted() {
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1:1234").is_ok());
    }

    #[test]
    fn http_remote_rejected() {
        let err = validate_base_url("http://api.example.com").unwrap_err();
        assert!(err.contains("HTTP is not allowed"), "got: {}", err);
    }

    #[test]
    fn ftp_rejected() {
        let err = validate_base_url("ftp://example.com").unwrap_err();
        assert!(err.contains("Unsupported URL scheme"), "got: {}", err);
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatibleProvider::new("https://api.openai.com/v1/", "k").unwrap();
        assert!(!provider.base_url.ends_with('/'));
    }

    #[test]
    fn tool_call_fragments_accumulate() {
        let mut drafts = Vec::new();
        let mut usage = None;

        let first = json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "searchRecords", "arguments": "{\"ta"}}
            ]}}]
        });
        let second = json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "ble\":\"Clients\"}"}}
            ]}}]
        });

        assert!(apply_stream_chunk(&first, &mut drafts, &mut usage).is_none());
        assert!(apply_stream_chunk(&second, &mut drafts, &mut usage).is_none());

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, "call_1");
        assert_eq!(drafts[0].name, "searchRecords");
        assert_eq!(drafts[0].arguments, "{\"table\":\"Clients\"}");
    }

    #[test]
    fn content_delta_and_usage_extracted() {
        let mut drafts = Vec::new();
        let mut usage = None;

        let chunk = json!({
            "choices": [{"delta": {"content": "Bonjour"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });

        let delta = apply_stream_chunk(&chunk, &mut drafts, &mut usage);
        assert_eq!(delta.as_deref(), Some("Bonjour"));
        let usage = usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 3);
    }
}
