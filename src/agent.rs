//! Turn orchestration: persistence bookkeeping, prompt assembly, and the
//! model/tool step loop that feeds the event stream.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::prompt;
use crate::providers::ProviderError;
use crate::server::AppState;
use crate::tools::{find_tool, tool_descriptors};
use crate::types::{extract_last_user_text, title_from_text, ChatMessage, StreamEvent, UiMessage};

/// Everything accumulated across the step loop, flattened into one
/// persisted assistant message at the end.
#[derive(Default)]
struct TurnTranscript {
    texts: Vec<String>,
    tool_calls: Vec<Value>,
    tool_results: Vec<Value>,
}

impl TurnTranscript {
    fn had_tool_activity(&self) -> bool {
        !self.tool_calls.is_empty() || !self.tool_results.is_empty()
    }

    /// Plain text when the model never called a tool; otherwise a JSON
    /// envelope so history replays can re-render tool output.
    fn into_content(self) -> String {
        let text = self.texts.join("\n");
        if self.had_tool_activity() {
            json!({
                "text": text,
                "toolCalls": self.tool_calls,
                "toolResults": self.tool_results,
            })
            .to_string()
        } else {
            text
        }
    }
}

/// Run one chat turn, emitting stream events on `tx` until `Finish`.
///
/// Persistence around the turn is best effort: a failed chat upsert or
/// history write is logged and the answer still streams. Only the final
/// assistant-message write reports its failure to the client, as a
/// trailing `Error` event after the streamed text.
pub async fn run_turn(
    state: Arc<AppState>,
    user_id: String,
    chat_id: String,
    messages: Vec<UiMessage>,
    tx: UnboundedSender<StreamEvent>,
) {
    if let Err(e) = state.store.upsert_chat(&chat_id, &user_id).await {
        warn!(chat_id, error = %e, "Chat upsert failed; continuing");
    }

    let user_text = extract_last_user_text(&messages);
    if !user_text.is_empty() {
        let msg = ChatMessage::new(&chat_id, "user", &user_text);
        if let Err(e) = state.store.append_message(&msg).await {
            warn!(chat_id, error = %e, "User message persist failed; continuing");
        }
        match state
            .store
            .rename_if_placeholder(&chat_id, &title_from_text(&user_text))
            .await
        {
            Ok(true) => info!(chat_id, "Chat auto-titled"),
            Ok(false) => {}
            Err(e) => warn!(chat_id, error = %e, "Auto-title failed; continuing"),
        }
    }

    let schema = state.schema_cache.get().await;
    let system_prompt = prompt::compose(&schema);

    let history_limit = state.config.chat.history_limit;
    let tail = if messages.len() > history_limit {
        &messages[messages.len() - history_limit..]
    } else {
        &messages[..]
    };

    let mut oai_messages: Vec<Value> = Vec::with_capacity(tail.len() + 1);
    oai_messages.push(json!({ "role": "system", "content": system_prompt }));
    for m in tail {
        oai_messages.push(json!({ "role": m.role, "content": m.text() }));
    }

    let descriptors = tool_descriptors(&state.tools);
    let max_steps = state.config.chat.max_steps.max(1);
    let mut transcript = TurnTranscript::default();

    for step in 1..=max_steps {
        // The last permitted step gets no tools, forcing a text answer.
        let tools_for_step: &[Value] = if step == max_steps {
            &[]
        } else {
            &descriptors
        };

        let delta_tx = tx.clone();
        let on_delta = move |fragment: &str| {
            let _ = delta_tx.send(StreamEvent::TextDelta {
                delta: fragment.to_string(),
            });
        };

        let response = match state
            .provider
            .chat_stream(
                &state.config.provider.model,
                &oai_messages,
                tools_for_step,
                &on_delta,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(chat_id, step, error = %e, "Model call failed");
                let message = match e.downcast_ref::<ProviderError>() {
                    Some(pe) => pe.user_message(),
                    None => e.to_string(),
                };
                let _ = tx.send(StreamEvent::Error { message });
                let _ = tx.send(StreamEvent::Finish);
                return;
            }
        };

        if let Some(usage) = &response.usage {
            info!(
                chat_id,
                step,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Model step complete"
            );
        }

        if let Some(text) = response.content.as_deref().filter(|t| !t.is_empty()) {
            transcript.texts.push(text.to_string());
        }

        if response.tool_calls.is_empty() {
            break;
        }

        oai_messages.push(json!({
            "role": "assistant",
            "content": response.content,
            "tool_calls": response.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.name, "arguments": c.arguments },
            })).collect::<Vec<_>>(),
        }));

        for call in &response.tool_calls {
            let _ = tx.send(StreamEvent::ToolStatus {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
            });

            let result = match find_tool(&state.tools, &call.name) {
                Some(tool) => match tool.call(&call.arguments).await {
                    Ok(v) => v,
                    Err(e) => json!(format!("Erreur de l'outil {}: {}", call.name, e)),
                },
                None => json!(format!(
                    "Erreur: outil \"{}\" inconnu. Outils disponibles: searchRecords, \
                     getRecordDetails, generateVisualChart.",
                    call.name
                )),
            };

            let args: Value =
                serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!(call.arguments));
            transcript.tool_calls.push(json!({
                "toolCallId": call.id,
                "toolName": call.name,
                "args": args,
            }));
            transcript.tool_results.push(json!({
                "toolCallId": call.id,
                "toolName": call.name,
                "result": result,
            }));

            let _ = tx.send(StreamEvent::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: result.clone(),
            });

            oai_messages.push(json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": result.to_string(),
            }));
        }
    }

    let had_activity = transcript.had_tool_activity() || !transcript.texts.is_empty();
    if had_activity {
        let content = transcript.into_content();
        let msg = ChatMessage::new(&chat_id, "assistant", &content);
        if let Err(e) = state.store.append_message(&msg).await {
            // The answer already streamed; tell the client the transcript
            // will be missing it instead of pretending it was saved.
            warn!(chat_id, error = %e, "Assistant message persist failed");
            let _ = tx.send(StreamEvent::Error {
                message: "La réponse n'a pas pu être sauvegardée dans l'historique.".to_string(),
            });
        }
    }

    let _ = tx.send(StreamEvent::Finish);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_without_tools_is_plain_text() {
        let transcript = TurnTranscript {
            texts: vec!["Bonjour".into(), "Voici la liste.".into()],
            ..Default::default()
        };
        assert_eq!(transcript.into_content(), "Bonjour\nVoici la liste.");
    }

    #[test]
    fn transcript_with_tools_is_enveloped() {
        let transcript = TurnTranscript {
            texts: vec!["Voici vos clients.".into()],
            tool_calls: vec![json!({"toolCallId": "c1", "toolName": "searchRecords", "args": {}})],
            tool_results: vec![json!({"toolCallId": "c1", "toolName": "searchRecords", "result": []})],
        };
        let parsed: Value = serde_json::from_str(&transcript.into_content()).unwrap();
        assert_eq!(parsed["text"], "Voici vos clients.");
        assert_eq!(parsed["toolCalls"][0]["toolName"], "searchRecords");
        assert_eq!(parsed["toolResults"].as_array().unwrap().len(), 1);
    }
}
