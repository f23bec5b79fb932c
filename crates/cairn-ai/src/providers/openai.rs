//! OpenAI-compatible Chat Completions provider (OpenAI, Groq, OpenRouter, Ollama)

use super::{StreamProvider, map_sse_error, open_event_source};
use crate::{
    error::{Error, Result},
    stream::{ProviderEvent, ProviderEventStream},
    types::{Content, Message, ModelConfig, Tool, Usage},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// OpenAI-compatible API client
#[derive(Default)]
pub struct OpenAIProvider {
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamProvider for OpenAIProvider {
    async fn stream(
        &self,
        history: &[Message],
        tools: &[Tool],
        config: &ModelConfig,
    ) -> Result<ProviderEventStream> {
        if config.model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no base URL configured for model {}",
                config.model.id
            )));
        }

        let request = build_request(history, tools, config);
        let url = format!("{}/chat/completions", config.model.base_url.trim_end_matches('/'));

        tracing::debug!(url = %url, messages = request.messages.len(), "opening chat completions stream");

        let mut request_builder = self.client.post(&url).json(&request);
        // local servers run without credentials
        let env_key = config
            .model
            .provider
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok());
        if let Some(key) = config.api_key.clone().or(env_key) {
            request_builder = request_builder.bearer_auth(key);
        }

        let event_source = open_event_source(request_builder).await?;
        Ok(Box::pin(create_stream(event_source)))
    }
}

fn build_request(history: &[Message], tools: &[Tool], config: &ModelConfig) -> OpenAIRequest {
    let messages = history.iter().flat_map(convert_message).collect();

    let tools: Option<Vec<OpenAITool>> = if tools.is_empty() {
        None
    } else {
        Some(
            tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    let reasoning = config.model.reasoning;
    OpenAIRequest {
        model: config.model.id.clone(),
        messages,
        stream: true,
        stream_options: Some(StreamOptions {
            include_usage: true,
        }),
        // reasoning models reject max_tokens
        max_tokens: (!reasoning).then_some(config.max_tokens),
        max_completion_tokens: reasoning.then_some(config.max_tokens),
        reasoning_effort: if config.thinking_enabled() {
            config.thinking.effort().map(str::to_string)
        } else {
            None
        },
        tool_choice: tools.as_ref().map(|_| serde_json::json!("auto")),
        tools,
    }
}

fn join_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| c.as_text())
        .collect::<Vec<_>>()
        .join("")
}

fn convert_message(msg: &Message) -> Vec<OpenAIMessage> {
    match msg {
        Message::System { content } => vec![OpenAIMessage {
            role: "system".to_string(),
            content: Some(MessageContent::Text(join_text(content))),
            tool_calls: None,
            tool_call_id: None,
        }],
        Message::User { content, .. } => {
            let has_images = content.iter().any(|c| matches!(c, Content::Image { .. }));
            let content = if has_images {
                MessageContent::Parts(
                    content
                        .iter()
                        .filter_map(|c| match c {
                            Content::Text { text } => {
                                Some(serde_json::json!({ "type": "text", "text": text }))
                            }
                            Content::Image { data, mime_type } => Some(serde_json::json!({
                                "type": "image_url",
                                "image_url": { "url": format!("data:{};base64,{}", mime_type, data) }
                            })),
                            _ => None,
                        })
                        .collect(),
                )
            } else {
                MessageContent::Text(join_text(content))
            };

            vec![OpenAIMessage {
                role: "user".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            }]
        }
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for c in content {
                match c {
                    Content::Text { text } => text_parts.push(text.clone()),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        tool_calls.push(OpenAIToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(arguments).unwrap_or_default(),
                            },
                        });
                    }
                    _ => {}
                }
            }

            let content = if text_parts.is_empty() {
                None
            } else {
                Some(MessageContent::Text(text_parts.join("")))
            };

            vec![OpenAIMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            }]
        }
        Message::ToolResult {
            tool_call_id,
            content,
            ..
        } => vec![OpenAIMessage {
            role: "tool".to_string(),
            content: Some(MessageContent::Text(join_text(content))),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        }],
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = Result<ProviderEvent>> {
    stream! {
        let mut decoder = ChunkDecoder::default();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    match decoder.decode(&msg.data) {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            event_source.close();
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield Err(map_sse_error(e).await);
                    event_source.close();
                    return;
                }
            }
        }

        event_source.close();
        for event in decoder.finish() {
            yield Ok(event);
        }
    }
}

/// Translates streamed completion chunks into provider events. Tool call
/// fragments are keyed by index; a new index closes the previous call.
#[derive(Default)]
struct ChunkDecoder {
    open_call: Option<u32>,
}

impl ChunkDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<ProviderEvent>> {
        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::UnexpectedResponse(format!("Failed to parse chunk: {}", e)))?;

        if let Some(error) = chunk.error {
            return Err(Error::api(
                error.error_type.unwrap_or_else(|| "api_error".to_string()),
                error.message,
            ));
        }

        let mut out = Vec::new();

        for choice in &chunk.choices {
            let delta = &choice.delta;

            if let Some(reasoning) = delta.reasoning_content.as_ref().or(delta.reasoning.as_ref())
                && !reasoning.is_empty()
            {
                out.push(ProviderEvent::ReasoningDelta(reasoning.clone()));
            }

            if let Some(content) = &delta.content
                && !content.is_empty()
            {
                out.push(ProviderEvent::TextDelta(content.clone()));
            }

            for tc in delta.tool_calls.iter().flatten() {
                if self.open_call != Some(tc.index) {
                    if self.open_call.is_some() {
                        out.push(ProviderEvent::ToolCallStop);
                    }
                    self.open_call = Some(tc.index);
                    let id = tc
                        .id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                    let name = tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    out.push(ProviderEvent::ToolCallStart { id, name });
                }

                if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref())
                    && !args.is_empty()
                {
                    out.push(ProviderEvent::ToolCallArgsDelta(args.clone()));
                }
            }

            if choice.finish_reason.is_some() && self.open_call.take().is_some() {
                out.push(ProviderEvent::ToolCallStop);
            }
        }

        if let Some(usage) = chunk.usage {
            let cached = usage
                .prompt_tokens_details
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0);
            let reasoning = usage
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens)
                .unwrap_or(0);
            out.push(ProviderEvent::Usage(Usage {
                input: usage.prompt_tokens.saturating_sub(cached),
                output: usage.completion_tokens,
                cache_read: cached,
                cache_write: 0,
                thinking: reasoning,
            }));
        }

        Ok(out)
    }

    /// Close a call the server never finished explicitly
    fn finish(&mut self) -> Option<ProviderEvent> {
        self.open_call.take().map(|_| ProviderEvent::ToolCallStop)
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<StreamUsage>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    prompt_tokens_details: Option<PromptDetails>,
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionDetails {
    reasoning_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Model, Provider, ReasoningLevel};

    #[test]
    fn test_request_shape() {
        let config = ModelConfig::new(
            Model::custom(Provider::OpenAI, "gpt-test"),
            None,
            ReasoningLevel::High,
        );
        let tools = vec![Tool::new("list_dir", "List a directory", serde_json::json!({"type": "object"}))];
        let history = vec![Message::system("sys"), Message::user("hi")];
        let request = build_request(&history, &tools, &config);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["max_tokens"], 8192);
        // custom models are not reasoning-capable, so no effort is sent
        assert!(json.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_reasoning_model_uses_completion_cap_and_effort() {
        let mut model = Model::custom(Provider::OpenAI, "o-test");
        model.reasoning = true;
        let config = ModelConfig::new(model, None, ReasoningLevel::Medium);
        let json = serde_json::to_value(build_request(&[Message::user("x")], &[], &config)).unwrap();
        assert_eq!(json["reasoning_effort"], "medium");
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["max_completion_tokens"], 8192);
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_user_images_become_parts() {
        let msg = Message::user_with_content(vec![
            Content::text("what is this"),
            Content::image("AAAA", "image/png"),
        ]);
        let json = serde_json::to_value(convert_message(&msg)).unwrap();
        assert_eq!(json[0]["content"][1]["type"], "image_url");
        assert_eq!(json[0]["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_decode_parallel_tool_calls() {
        let mut decoder = ChunkDecoder::default();
        let chunks = [
            r#"{"choices":[{"delta":{"content":"ok"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"read_file","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":\"a\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"list_dir","arguments":"{}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":20,"prompt_tokens_details":{"cached_tokens":40}}}"#,
        ];
        let mut events = vec![];
        for chunk in chunks {
            events.extend(decoder.decode(chunk).unwrap());
        }
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta("ok".into()),
                ProviderEvent::ToolCallStart {
                    id: "call_a".into(),
                    name: "read_file".into()
                },
                ProviderEvent::ToolCallArgsDelta("{\"path\":\"a\"}".into()),
                ProviderEvent::ToolCallStop,
                ProviderEvent::ToolCallStart {
                    id: "call_b".into(),
                    name: "list_dir".into()
                },
                ProviderEvent::ToolCallArgsDelta("{}".into()),
                ProviderEvent::ToolCallStop,
                ProviderEvent::Usage(Usage {
                    input: 60,
                    output: 20,
                    cache_read: 40,
                    ..Default::default()
                }),
            ]
        );
    }

    #[test]
    fn test_decode_reasoning_and_missing_id() {
        let mut decoder = ChunkDecoder::default();
        let events = decoder
            .decode(r#"{"choices":[{"delta":{"reasoning_content":"thinking..."}}]}"#)
            .unwrap();
        assert_eq!(events, vec![ProviderEvent::ReasoningDelta("thinking...".into())]);

        let events = decoder
            .decode(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"list_dir"}}]}}]}"#)
            .unwrap();
        match &events[0] {
            ProviderEvent::ToolCallStart { id, name } => {
                assert!(id.starts_with("call_"));
                assert_eq!(name, "list_dir");
            }
            other => panic!("expected ToolCallStart, got {:?}", other),
        }
        assert_eq!(decoder.finish(), Some(ProviderEvent::ToolCallStop));
    }

    #[test]
    fn test_decode_error_chunk() {
        let mut decoder = ChunkDecoder::default();
        let err = decoder
            .decode(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
