//! Anthropic Messages API provider

use super::{StreamProvider, get_api_key, map_sse_error, open_event_source};
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

const API_VERSION: &str = "2023-06-01";

/// Stand-in first turn when the history does not open with a user message
const CONTINUE_PLACEHOLDER: &str = "(continue)";

/// Anthropic API client
#[derive(Default)]
pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamProvider for AnthropicProvider {
    async fn stream(
        &self,
        history: &[Message],
        tools: &[Tool],
        config: &ModelConfig,
    ) -> Result<ProviderEventStream> {
        let api_key = get_api_key(config.api_key.as_deref(), "ANTHROPIC_API_KEY")?;
        let request = build_request(history, tools, config);
        let url = format!("{}/v1/messages", config.model.base_url);

        tracing::debug!(url = %url, messages = request.messages.len(), "opening anthropic stream");

        let request_builder = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", "fine-grained-tool-streaming-2025-05-14")
            .header("accept", "text/event-stream")
            .json(&request);

        let event_source = open_event_source(request_builder).await?;
        Ok(Box::pin(create_stream(event_source)))
    }
}

fn build_request(history: &[Message], tools: &[Tool], config: &ModelConfig) -> AnthropicRequest {
    let system_text = history
        .iter()
        .filter(|m| m.is_system())
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = if system_text.is_empty() {
        None
    } else {
        Some(vec![SystemBlock {
            block_type: "text".to_string(),
            text: system_text,
            cache_control: Some(CacheControl {
                control_type: "ephemeral".to_string(),
            }),
        }])
    };

    let mut max_tokens = config.max_tokens;
    let thinking = if config.thinking_enabled() {
        let budget = config.thinking.thinking_budget();
        // the thinking budget must fit inside max_tokens
        max_tokens += budget;
        Some(ThinkingConfig {
            thinking_type: "enabled".to_string(),
            budget_tokens: budget,
        })
    } else {
        None
    };

    AnthropicRequest {
        model: config.model.id.clone(),
        messages: convert_messages(history),
        max_tokens,
        stream: true,
        system,
        tools: if tools.is_empty() {
            None
        } else {
            Some(convert_tools(tools))
        },
        thinking,
    }
}

/// Create the event stream from SSE events
fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = Result<ProviderEvent>> {
    stream! {
        let mut decoder = SseDecoder::default();

        while let Some(event_result) = event_source.next().await {
            match event_result {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    match decoder.decode(&message.event, &message.data) {
                        Ok(Step::Continue(events)) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Ok(Step::Done) => break,
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    yield Err(map_sse_error(e).await);
                    break;
                }
            }
        }

        event_source.close();
    }
}

enum Step {
    Continue(Vec<ProviderEvent>),
    Done,
}

/// Translates Anthropic SSE events into provider events
#[derive(Default)]
struct SseDecoder {
    usage: Usage,
    open_tool_block: Option<u32>,
}

impl SseDecoder {
    fn decode(&mut self, event: &str, data: &str) -> Result<Step> {
        let mut out = Vec::new();

        match event {
            "message_start" => {
                let data: MessageStartEvent = serde_json::from_str(data)?;
                self.absorb_usage(&data.message.usage);
            }
            "content_block_start" => {
                let data: ContentBlockStartEvent = serde_json::from_str(data)?;
                if data.content_block.block_type == "tool_use" {
                    self.open_tool_block = Some(data.index);
                    out.push(ProviderEvent::ToolCallStart {
                        id: data.content_block.id.unwrap_or_default(),
                        name: data.content_block.name.unwrap_or_default(),
                    });
                }
            }
            "content_block_delta" => {
                let data: ContentBlockDeltaEvent = serde_json::from_str(data)?;
                match data.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = data.delta.text {
                            out.push(ProviderEvent::TextDelta(text));
                        }
                    }
                    "thinking_delta" => {
                        if let Some(thinking) = data.delta.thinking {
                            out.push(ProviderEvent::ReasoningDelta(thinking));
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = data.delta.partial_json {
                            out.push(ProviderEvent::ToolCallArgsDelta(partial));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let data: ContentBlockStopEvent = serde_json::from_str(data)?;
                if self.open_tool_block == Some(data.index) {
                    self.open_tool_block = None;
                    out.push(ProviderEvent::ToolCallStop);
                }
            }
            "message_delta" => {
                let data: MessageDeltaEvent = serde_json::from_str(data)?;
                if let Some(usage) = data.usage {
                    self.absorb_usage(&usage);
                }
                out.push(ProviderEvent::Usage(self.usage.clone()));
            }
            "message_stop" => return Ok(Step::Done),
            "error" => {
                let data: ErrorEvent = serde_json::from_str(data)?;
                return Err(Error::api(data.error.error_type, data.error.message));
            }
            // ping and future event kinds
            _ => {}
        }

        Ok(Step::Continue(out))
    }

    fn absorb_usage(&mut self, info: &UsageInfo) {
        if let Some(input) = info.input_tokens {
            self.usage.input = input;
        }
        if let Some(output) = info.output_tokens {
            self.usage.output = output;
        }
        if let Some(read) = info.cache_read_input_tokens {
            self.usage.cache_read = read;
        }
        if let Some(write) = info.cache_creation_input_tokens {
            self.usage.cache_write = write;
        }
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: String,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// ============================================================================
// Response event types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct UsageInfo {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    index: u32,
    content_block: ContentBlockInfo,
}

#[derive(Debug, Deserialize)]
struct ContentBlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStopEvent {
    index: u32,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

/// Convert the history into Anthropic turns. System messages travel in the
/// `system` field; consecutive same-role turns are merged because tool results
/// for one assistant turn must arrive in a single user turn.
fn convert_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = vec![];

    for message in messages {
        let (role, blocks): (&'static str, Vec<serde_json::Value>) = match message {
            Message::System { .. } => continue,
            Message::User { content, .. } => ("user", content.iter().filter_map(user_block).collect()),
            Message::Assistant { content, .. } => (
                "assistant",
                content
                    .iter()
                    .filter_map(|c| match c {
                        Content::Text { text } if !text.is_empty() => {
                            Some(serde_json::json!({ "type": "text", "text": text }))
                        }
                        Content::Thinking { thinking } => Some(serde_json::json!({
                            "type": "text",
                            "text": format!("<thinking>\n{}\n</thinking>", thinking)
                        })),
                        Content::ToolCall {
                            id,
                            name,
                            arguments,
                        } => Some(serde_json::json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": if arguments.is_object() { arguments.clone() } else { serde_json::json!({}) }
                        })),
                        _ => None,
                    })
                    .collect(),
            ),
            Message::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let text_content: String = content
                    .iter()
                    .filter_map(|c| c.as_text())
                    .collect::<Vec<_>>()
                    .join("\n");

                (
                    "user",
                    vec![serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": text_content,
                        "is_error": is_error
                    })],
                )
            }
        };

        if blocks.is_empty() {
            continue;
        }

        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => {
                if result.is_empty() && role != "user" {
                    result.push(AnthropicMessage {
                        role: "user",
                        content: vec![serde_json::json!({ "type": "text", "text": CONTINUE_PLACEHOLDER })],
                    });
                }
                result.push(AnthropicMessage {
                    role,
                    content: blocks,
                });
            }
        }
    }

    result
}

fn user_block(content: &Content) -> Option<serde_json::Value> {
    match content {
        Content::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
        Content::Image { data, mime_type } => Some(serde_json::json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": mime_type,
                "data": data
            }
        })),
        _ => None,
    }
}

fn convert_tools(tools: &[Tool]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| {
            let input_schema = if tool.parameters.is_object() {
                let mut schema = tool.parameters.clone();
                if let Some(obj) = schema.as_object_mut() {
                    obj.entry("type").or_insert(serde_json::json!("object"));
                }
                schema
            } else {
                serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                })
            };

            AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Model, Provider, ReasoningLevel};

    fn decode_all(decoder: &mut SseDecoder, events: &[(&str, &str)]) -> Vec<ProviderEvent> {
        let mut out = vec![];
        for (event, data) in events {
            match decoder.decode(event, data).unwrap() {
                Step::Continue(events) => out.extend(events),
                Step::Done => break,
            }
        }
        out
    }

    #[test]
    fn test_system_messages_move_to_system_field() {
        let history = vec![Message::system("be brief"), Message::user("hi")];
        let config = ModelConfig::new(
            Model::custom(Provider::Anthropic, "claude-test"),
            None,
            ReasoningLevel::Off,
        );
        let request = build_request(&history, &[], &config);
        let system = request.system.unwrap();
        assert_eq!(system[0].text, "be brief");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert!(request.thinking.is_none());
    }

    #[test]
    fn test_thinking_budget_added_to_max_tokens() {
        let mut model = Model::custom(Provider::Anthropic, "claude-test");
        model.reasoning = true;
        let config = ModelConfig::new(model, None, ReasoningLevel::Low);
        let request = build_request(&[Message::user("hi")], &[], &config);
        let thinking = request.thinking.unwrap();
        assert_eq!(thinking.budget_tokens, 2048);
        assert_eq!(request.max_tokens, config.max_tokens + 2048);
    }

    #[test]
    fn test_leading_assistant_gets_placeholder_user_turn() {
        let history = vec![
            Message::system("sys"),
            Message::assistant(vec![Content::text("earlier answer")]),
            Message::user("next"),
        ];
        let messages = convert_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content[0]["text"], CONTINUE_PLACEHOLDER);
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let history = vec![
            Message::user("do two things"),
            Message::assistant(vec![
                Content::tool_call("a", "read_file", serde_json::json!({"path": "x"})),
                Content::tool_call("b", "read_file", serde_json::json!({"path": "y"})),
            ]),
            Message::tool_result("a", "read_file", vec![Content::text("X")], false),
            Message::tool_result("b", "read_file", vec![Content::text("Y")], true),
        ];
        let messages = convert_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.len(), 2);
        assert_eq!(messages[2].content[1]["tool_use_id"], "b");
        assert_eq!(messages[2].content[1]["is_error"], true);
    }

    #[test]
    fn test_decode_text_and_tool_call() {
        let mut decoder = SseDecoder::default();
        let events = decode_all(
            &mut decoder,
            &[
                ("message_start", r#"{"type":"message_start","message":{"usage":{"input_tokens":25,"output_tokens":1}}}"#),
                ("content_block_start", r#"{"index":0,"content_block":{"type":"text","text":""}}"#),
                ("content_block_delta", r#"{"index":0,"delta":{"type":"text_delta","text":"Let me check"}}"#),
                ("content_block_stop", r#"{"index":0}"#),
                ("ping", r#"{}"#),
                ("content_block_start", r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file"}}"#),
                ("content_block_delta", r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":\"a\"}"}}"#),
                ("content_block_stop", r#"{"index":1}"#),
                ("message_delta", r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":40}}"#),
                ("message_stop", r#"{}"#),
            ],
        );

        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta("Let me check".into()),
                ProviderEvent::ToolCallStart {
                    id: "toolu_1".into(),
                    name: "read_file".into()
                },
                ProviderEvent::ToolCallArgsDelta("{\"path\":\"a\"}".into()),
                ProviderEvent::ToolCallStop,
                ProviderEvent::Usage(Usage {
                    input: 25,
                    output: 40,
                    ..Default::default()
                }),
            ]
        );
    }

    #[test]
    fn test_decode_error_event() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .decode(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            )
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }
}
