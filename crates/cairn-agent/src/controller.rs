//! The bounded tool-calling loop

use cairn_ai::providers::StreamProvider;
use cairn_ai::{Content, Message, ModelConfig, ProviderEvent, ReplyBuilder, Tool, ToolCall};
use futures::StreamExt;
use std::sync::Arc;

use crate::context_window::ContextWindow;
use crate::coordinator::{NotifyExtra, StatusHandle, StreamData};
use crate::error::{Handoff, Outcome, Result};
use crate::retry::{RetryConfig, open_with_retry};
use crate::session::SessionConfig;
use crate::status::StatusTag;
use crate::store::ConversationStore;
use crate::tool::{DispatchError, ToolContext, ToolDispatcher, unknown_tool_result};
use crate::usage::TokenUsage;

/// Longest tool-call or result summary shown to the user
const SUMMARY_CHARS: usize = 80;

pub(crate) struct RecursionController {
    config: SessionConfig,
    model: ModelConfig,
    provider: Arc<dyn StreamProvider>,
    tools: Arc<dyn ToolDispatcher>,
    store: Arc<dyn ConversationStore>,
    retry: RetryConfig,
    status: StatusHandle,
    ctx: ToolContext,
    window: ContextWindow,
    usage: TokenUsage,
    cost: f64,
}

impl RecursionController {
    pub(crate) fn new(
        config: SessionConfig,
        provider: Arc<dyn StreamProvider>,
        tools: Arc<dyn ToolDispatcher>,
        store: Arc<dyn ConversationStore>,
        retry: RetryConfig,
        status: StatusHandle,
    ) -> Self {
        let model = config.model_config();
        let window = ContextWindow::for_model(&model);
        let ctx = ToolContext::new(status.clone(), config.auto_approve_tools);
        Self {
            config,
            model,
            provider,
            tools,
            store,
            retry,
            status,
            ctx,
            window,
            usage: TokenUsage::default(),
            cost: 0.0,
        }
    }

    /// Run up to `recursion_budget` turns, then report the terminal status.
    pub(crate) async fn run(mut self) -> Result<Outcome> {
        self.prelude().await?;

        let tool_defs: Vec<Tool> = self
            .tools
            .definitions()
            .into_iter()
            .filter(|t| self.config.tool_enabled(&t.name))
            .collect();
        let budget = self.config.recursion_budget.max(1);
        let mut handoff = None;
        let mut exhausted = false;

        for turn in 1..=budget {
            tracing::debug!(turn, budget, "starting turn");
            self.status
                .change_status(StatusTag::Processing, None, None)
                .await?;

            let history = self.store.load().await?;
            let (history, truncated) =
                self.window
                    .prepare(&history, &self.config.system_prompt, &tool_defs);
            if truncated {
                tracing::warn!(turn, kept = history.len(), "history truncated to fit the context window");
                self.status
                    .warn("Older messages were dropped to fit the model's context window")
                    .await?;
                self.store.save(&history).await?;
            }

            let (reply, calls) = self.stream_turn(&history, &tool_defs).await?;
            self.store.push(std::slice::from_ref(&reply)).await?;

            if calls.is_empty() {
                break;
            }

            for call in &calls {
                if let Some(target) = &handoff {
                    self.skip_call(call, target).await?;
                    continue;
                }
                handoff = self.run_tool(call).await?;
            }

            if handoff.is_some() {
                break;
            }
            exhausted = turn == budget;
        }

        self.emit_references().await?;

        if exhausted {
            tracing::warn!(budget, "recursion budget exhausted");
            self.status
                .warn(format!(
                    "Stopped after {} turns; the model still wanted to call tools",
                    budget
                ))
                .await?;
        }

        self.finish(handoff).await
    }

    /// Install the system prompt and append the user message
    async fn prelude(&mut self) -> Result<()> {
        let mut history = self.store.load().await?;

        if !self.config.system_prompt.is_empty() {
            let system = Message::system(&self.config.system_prompt);
            match history.first_mut() {
                Some(first) if first.is_system() => *first = system,
                _ => history.insert(0, system),
            }
        }

        let mut content = vec![Content::text(&self.config.prompt)];
        content.extend(self.config.attachments.iter().cloned());
        history.push(Message::user_with_content(content));

        self.store.save(&history).await?;
        Ok(())
    }

    /// Stream one provider response, forwarding text as it arrives
    async fn stream_turn(
        &mut self,
        history: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Vec<ToolCall>)> {
        let mut stream = open_with_retry(
            self.provider.as_ref(),
            history,
            tools,
            &self.model,
            &self.retry,
        )
        .await?;

        let mut builder = ReplyBuilder::new().with_model(&self.model.model.id);
        let mut started = false;

        while let Some(event) = stream.next().await {
            let event = event?;

            if !started {
                started = true;
                self.status
                    .change_status(StatusTag::Started, None, None)
                    .await?;
            }

            match &event {
                ProviderEvent::TextDelta(text) => {
                    self.close_reasoning().await?;
                    self.status.emit_data(StreamData::normal(text)).await?;
                }
                ProviderEvent::ReasoningDelta(text) => {
                    if self.status.peek() != Some(StatusTag::Reasoning) {
                        self.status
                            .change_status(StatusTag::Reasoning, None, None)
                            .await?;
                    }
                    self.status.emit_data(StreamData::reasoning(text)).await?;
                }
                ProviderEvent::ToolCallStart { .. }
                | ProviderEvent::ToolCallArgsDelta(_)
                | ProviderEvent::ToolCallStop => self.close_reasoning().await?,
                ProviderEvent::Usage(_) => {}
            }

            builder.process(&event);
        }

        self.close_reasoning().await?;
        if !started {
            self.status
                .change_status(StatusTag::Started, None, None)
                .await?;
        }

        let turn_usage = builder.usage().clone();
        self.usage.add(&turn_usage);
        self.cost += turn_usage.cost(&self.model.model);

        let (reply, calls) = builder.finish();
        tracing::debug!(
            calls = calls.len(),
            input = turn_usage.input,
            output = turn_usage.output,
            "turn complete"
        );
        Ok((reply, calls))
    }

    async fn close_reasoning(&self) -> Result<()> {
        if self.status.peek() == Some(StatusTag::Reasoning) {
            self.status
                .change_status(StatusTag::ReasoningOver, None, None)
                .await?;
        }
        Ok(())
    }

    /// Dispatch one call and append its result. Returns a hand-off if the
    /// tool asked for one.
    async fn run_tool(&self, call: &ToolCall) -> Result<Option<Handoff>> {
        self.status
            .change_status(StatusTag::FunctionCalling, Some(describe_call(call)), None)
            .await?;

        let known = self.tools.knows(&call.name) && self.config.tool_enabled(&call.name);
        let (message, handoff) = if known {
            let dispatch = self.tools.dispatch(call, &self.ctx).await;
            match dispatch.error {
                Some(DispatchError::SwitchAgent(handoff)) => (dispatch.message, Some(handoff)),
                Some(err) => {
                    tracing::debug!(tool = %call.name, error = %err, "tool call failed");
                    (dispatch.message, None)
                }
                None => (dispatch.message, None),
            }
        } else {
            tracing::warn!(tool = %call.name, "model called an unknown tool");
            self.status
                .warn(format!("Unknown function: {}", call.name))
                .await?;
            let available: Vec<String> = self
                .tools
                .definitions()
                .into_iter()
                .map(|t| t.name)
                .filter(|name| self.config.tool_enabled(name))
                .collect();
            (unknown_tool_result(call, &available), None)
        };

        self.store.push(std::slice::from_ref(&message)).await?;
        self.status
            .change_status(
                StatusTag::FunctionCallingOver,
                Some(summarize_result(&message)),
                None,
            )
            .await?;

        Ok(handoff)
    }

    /// Answer a call that comes after a hand-off in the same reply
    async fn skip_call(&self, call: &ToolCall, handoff: &Handoff) -> Result<()> {
        let message = Message::tool_result(
            &call.id,
            &call.name,
            vec![Content::text(format!(
                "Not run: the conversation was handed off to agent '{}'.",
                handoff.target
            ))],
            true,
        );
        self.store.push(std::slice::from_ref(&message)).await?;
        Ok(())
    }

    /// Files the tools read, as trailing text
    async fn emit_references(&self) -> Result<()> {
        let references = self.ctx.take_references();
        if !references.is_empty() {
            let mut text = String::from("\n\nReferences:\n");
            for reference in &references {
                text.push_str(&format!("- {}\n", reference));
            }
            self.status.emit_data(StreamData::normal(text)).await?;
        }
        Ok(())
    }

    async fn finish(self, handoff: Option<Handoff>) -> Result<Outcome> {
        let history = self.store.load().await?;
        self.store.save(&history).await?;

        if let Some(handoff) = handoff {
            self.status.finish_data().await?;
            self.status
                .change_status(
                    StatusTag::SwitchAgent,
                    Some(handoff.target.clone()),
                    Some(NotifyExtra::Handoff(handoff.clone())),
                )
                .await?;
            return Ok(Outcome::SwitchAgent(handoff));
        }

        if let Some(path) = &self.config.output_file {
            let answer = history
                .iter()
                .rev()
                .find(|m| matches!(m, Message::Assistant { .. }))
                .map(Message::text)
                .unwrap_or_default();
            tokio::fs::write(path, answer).await?;
            tracing::debug!(path = %path.display(), "wrote final answer");
        }

        self.status.finish_data().await?;
        self.status
            .change_status(
                StatusTag::Finished,
                None,
                Some(NotifyExtra::Usage {
                    usage: self.usage,
                    cost: self.cost,
                }),
            )
            .await?;
        Ok(Outcome::Completed)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// `name {args}` on one line
fn describe_call(call: &ToolCall) -> String {
    let args = match &call.arguments {
        serde_json::Value::Object(map) if map.is_empty() => String::new(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    if args.is_empty() {
        call.name.clone()
    } else {
        format!("{} {}", call.name, truncate_chars(&args, SUMMARY_CHARS))
    }
}

fn summarize_result(message: &Message) -> String {
    let text = message.text();
    let first_line = text.lines().next().unwrap_or_default();
    let is_error = matches!(message, Message::ToolResult { is_error: true, .. });
    if is_error {
        format!("failed: {}", truncate_chars(first_line, SUMMARY_CHARS))
    } else {
        let lines = text.lines().count();
        format!("done ({} line{})", lines, if lines == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::session::{AgentSession, SessionConfig};
    use crate::sink::RenderMode;
    use crate::store::MemoryStore;
    use crate::testing::{
        ConfirmingTool, CountingDispatcher, EchoTool, FailingTool, HandoffTool, RecordingSink,
        ScriptedProvider, SinkEvent, Step, text_turn, tool_turn,
    };
    use crate::tool::ToolRegistry;
    use cairn_ai::{Provider, Usage};

    fn config(prompt: &str, budget: u32) -> SessionConfig {
        SessionConfig {
            system_prompt: "You are a test agent".into(),
            recursion_budget: budget,
            conversation_name: "test".into(),
            ..SessionConfig::new(cairn_ai::Model::custom(Provider::Anthropic, "test-model"), prompt)
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![
            Arc::new(EchoTool),
            Arc::new(FailingTool),
            Arc::new(HandoffTool),
            Arc::new(ConfirmingTool),
        ])
    }

    fn tool_results(history: &[Message]) -> Vec<(String, bool)> {
        history
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult {
                    tool_call_id,
                    is_error,
                    ..
                } => Some((tool_call_id.clone(), *is_error)),
                _ => None,
            })
            .collect()
    }

    /// Every tool call is followed by exactly one result, in order
    fn assert_calls_paired(history: &[Message]) {
        let mut expected: Vec<String> = vec![];
        for message in history {
            match message {
                Message::Assistant { .. } => {
                    assert!(expected.is_empty(), "unanswered calls: {:?}", expected);
                    expected = message.tool_calls().into_iter().map(|c| c.id).collect();
                }
                Message::ToolResult { tool_call_id, .. } => {
                    assert!(!expected.is_empty(), "result without call");
                    assert_eq!(&expected.remove(0), tool_call_id);
                }
                _ => {}
            }
        }
        assert!(expected.is_empty(), "unanswered calls: {:?}", expected);
    }

    #[tokio::test]
    async fn test_tool_call_every_turn_stops_at_budget() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(
            "call_1",
            "echo",
            serde_json::json!({"text": "again"}),
        )]));
        let store = Arc::new(MemoryStore::new("test"));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("loop forever", 3),
            provider.clone(),
            Arc::new(registry()),
            store.clone(),
        );
        let outcome = session.run(&mut sink).await.unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(provider.calls(), 3);
        let history = store.snapshot();
        assert_eq!(tool_results(&history).len(), 3);
        assert_calls_paired(&history);
        assert_eq!(sink.mode_count(RenderMode::Summary), 1);
        // budget exhaustion is reported
        assert_eq!(sink.mode_count(RenderMode::Warning), 1);
    }

    #[tokio::test]
    async fn test_text_reply_finishes_after_one_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("Hello there")]));
        let store = Arc::new(MemoryStore::new("test"));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("hi", 10),
            provider.clone(),
            Arc::new(registry()),
            store.clone(),
        );
        assert_eq!(session.run(&mut sink).await.unwrap(), Outcome::Completed);

        assert_eq!(provider.calls(), 1);
        assert_eq!(sink.text(), "Hello there");
        let history = store.snapshot();
        assert!(history[0].is_system());
        assert_eq!(history[1].text(), "hi");
        assert_eq!(history[2].text(), "Hello there");
        // the first request saw system prompt and user message
        assert_eq!(provider.histories()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_panic_mid_stream_reports_one_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            Step::Event(ProviderEvent::TextDelta("partial".into())),
            Step::Panic("stream decoder blew up"),
        ]]));
        let store = Arc::new(MemoryStore::new("test"));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("hi", 3),
            provider,
            Arc::new(registry()),
            store,
        );
        let err = session.run(&mut sink).await.unwrap_err();

        match err {
            AgentError::Fault(message) => assert_eq!(message, "stream decoder blew up"),
            other => panic!("expected Fault, got {:?}", other),
        }
        assert_eq!(sink.mode_count(RenderMode::Error), 1);
        let events = sink.events();
        match events.last() {
            Some(SinkEvent::Line(line)) => {
                assert!(!line.is_empty());
                assert!(line.contains("stream decoder blew up"));
            }
            other => panic!("expected the error line last, got {:?}", other),
        }
        assert_eq!(sink.text(), "partial");
    }

    #[tokio::test]
    async fn test_unknown_tool_synthesized_without_dispatch() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("call_x", "delete_everything", serde_json::json!({})),
            text_turn("Sorry, I cannot do that."),
        ]));
        let store = Arc::new(MemoryStore::new("test"));
        let dispatcher = Arc::new(CountingDispatcher::new(registry()));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("clean up", 5),
            provider.clone(),
            dispatcher.clone(),
            store.clone(),
        );
        assert_eq!(session.run(&mut sink).await.unwrap(), Outcome::Completed);

        assert_eq!(dispatcher.dispatched(), 0);
        assert_eq!(sink.mode_count(RenderMode::Warning), 1);
        assert_eq!(provider.calls(), 2);

        let history = store.snapshot();
        assert_eq!(tool_results(&history), vec![("call_x".to_string(), true)]);
        let result = history
            .iter()
            .find(|m| matches!(m, Message::ToolResult { .. }))
            .unwrap();
        assert!(result.text().contains("unknown function 'delete_everything'"));
        assert_eq!(history.last().unwrap().text(), "Sorry, I cannot do that.");
    }

    #[tokio::test]
    async fn test_disabled_tool_treated_as_unknown() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("call_1", "fail", serde_json::json!({})),
            text_turn("ok"),
        ]));
        let dispatcher = Arc::new(CountingDispatcher::new(registry()));
        let mut cfg = config("x", 5);
        cfg.enabled_tools = Some(vec!["echo".into()]);

        let session = AgentSession::new(
            cfg,
            provider,
            dispatcher.clone(),
            Arc::new(MemoryStore::new("test")),
        );
        session.run(&mut RecordingSink::new()).await.unwrap();
        assert_eq!(dispatcher.dispatched(), 0);
    }

    #[tokio::test]
    async fn test_failed_tool_still_paired() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                ProviderEvent::ToolCallStart {
                    id: "a".into(),
                    name: "fail".into(),
                }
                .into(),
                ProviderEvent::ToolCallStop.into(),
                ProviderEvent::ToolCallStart {
                    id: "b".into(),
                    name: "echo".into(),
                }
                .into(),
                ProviderEvent::ToolCallArgsDelta(r#"{"text": 7}"#.into()).into(),
                ProviderEvent::ToolCallStop.into(),
            ],
            text_turn("done"),
        ]));
        let store = Arc::new(MemoryStore::new("test"));

        let session = AgentSession::new(
            config("x", 5),
            provider,
            Arc::new(registry()),
            store.clone(),
        );
        session.run(&mut RecordingSink::new()).await.unwrap();

        let history = store.snapshot();
        assert_eq!(
            tool_results(&history),
            vec![("a".to_string(), true), ("b".to_string(), true)]
        );
        assert_calls_paired(&history);
    }

    #[tokio::test]
    async fn test_handoff_after_result_appended() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            ProviderEvent::ToolCallStart {
                id: "h".into(),
                name: "switch_agent".into(),
            }
            .into(),
            ProviderEvent::ToolCallArgsDelta(
                r#"{"target":"reviewer","instruction":"review it"}"#.into(),
            )
            .into(),
            ProviderEvent::ToolCallStop.into(),
            ProviderEvent::ToolCallStart {
                id: "after".into(),
                name: "echo".into(),
            }
            .into(),
            ProviderEvent::ToolCallArgsDelta(r#"{"text":"late"}"#.into()).into(),
            ProviderEvent::ToolCallStop.into(),
        ]]));
        let store = Arc::new(MemoryStore::new("test"));
        let dispatcher = Arc::new(CountingDispatcher::new(registry()));

        let session = AgentSession::new(
            config("please review", 5),
            provider.clone(),
            dispatcher.clone(),
            store.clone(),
        );
        let outcome = session.run(&mut RecordingSink::new()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::SwitchAgent(Handoff {
                target: "reviewer".into(),
                instruction: "review it".into(),
            })
        );
        assert_eq!(provider.calls(), 1);
        assert_eq!(dispatcher.dispatched(), 1);
        let history = store.snapshot();
        assert_calls_paired(&history);
        assert_eq!(
            tool_results(&history),
            vec![("h".to_string(), false), ("after".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_reasoning_closed_before_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            ProviderEvent::ReasoningDelta("let me think".into()).into(),
            ProviderEvent::ReasoningDelta(" more".into()).into(),
            ProviderEvent::TextDelta("answer".into()).into(),
        ]]));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("q", 2),
            provider,
            Arc::new(registry()),
            Arc::new(MemoryStore::new("test")),
        );
        session.run(&mut sink).await.unwrap();

        let events = sink.events();
        let reasoning_at = events
            .iter()
            .position(|e| *e == SinkEvent::Mode(RenderMode::Reasoning))
            .unwrap();
        let normal_at = events
            .iter()
            .position(|e| *e == SinkEvent::Mode(RenderMode::Normal))
            .unwrap();
        let answer_at = events
            .iter()
            .position(|e| *e == SinkEvent::Text("answer".into()))
            .unwrap();
        assert!(reasoning_at < normal_at && normal_at < answer_at);
        assert_eq!(sink.mode_count(RenderMode::Reasoning), 1);
    }

    #[tokio::test]
    async fn test_diff_confirmation_round_trip() {
        for (approve, expect_error) in [(true, false), (false, true)] {
            let provider = Arc::new(ScriptedProvider::new(vec![
                tool_turn("c", "confirm", serde_json::json!({})),
                text_turn("ok"),
            ]));
            let store = Arc::new(MemoryStore::new("test"));
            let mut sink = RecordingSink::new().approving(approve);

            let session = AgentSession::new(
                config("change it", 3),
                provider,
                Arc::new(registry()),
                store.clone(),
            );
            session.run(&mut sink).await.unwrap();

            assert_eq!(
                tool_results(&store.snapshot()),
                vec![("c".to_string(), expect_error)]
            );
            assert!(sink
                .events()
                .iter()
                .any(|e| matches!(e, SinkEvent::Confirm(_))));
        }
    }

    #[tokio::test]
    async fn test_provider_error_aborts_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            ProviderEvent::TextDelta("so far".into()).into(),
            Step::Fail(cairn_ai::Error::api("invalid_request_error", "bad request")),
        ]]));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("q", 3),
            provider,
            Arc::new(registry()),
            Arc::new(MemoryStore::new("test")),
        );
        let err = session.run(&mut sink).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert_eq!(sink.mode_count(RenderMode::Error), 1);
    }

    #[tokio::test]
    async fn test_existing_system_prompt_replaced() {
        let store = Arc::new(MemoryStore::with_history(
            "test",
            vec![
                Message::system("old prompt"),
                Message::user("earlier"),
                Message::assistant(vec![Content::text("earlier answer")]),
            ],
        ));
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("new answer")]));

        let session = AgentSession::new(
            config("follow up", 2),
            provider.clone(),
            Arc::new(registry()),
            store.clone(),
        );
        session.run(&mut RecordingSink::new()).await.unwrap();

        let history = store.snapshot();
        assert_eq!(history.iter().filter(|m| m.is_system()).count(), 1);
        assert_eq!(history[0].text(), "You are a test agent");
        assert_eq!(provider.histories()[0].len(), 4);
    }

    #[tokio::test]
    async fn test_usage_and_references_reported() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("c", "echo", serde_json::json!({"text": "src/lib.rs"})),
            vec![
                ProviderEvent::TextDelta("See lib".into()).into(),
                ProviderEvent::Usage(Usage {
                    input: 30,
                    output: 7,
                    ..Default::default()
                })
                .into(),
            ],
        ]));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("where", 3),
            provider,
            Arc::new(registry()),
            Arc::new(MemoryStore::new("test")),
        );
        session.run(&mut sink).await.unwrap();

        assert!(sink.text().contains("References:\n- echo:src/lib.rs"));
        assert!(sink.events().contains(&SinkEvent::Line("40 in · 12 out".into())));
    }

    #[tokio::test]
    async fn test_references_precede_budget_warning() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(
            "c",
            "echo",
            serde_json::json!({"text": "src/main.rs"}),
        )]));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("keep going", 1),
            provider,
            Arc::new(registry()),
            Arc::new(MemoryStore::new("test")),
        );
        session.run(&mut sink).await.unwrap();

        let events = sink.events();
        let references = events
            .iter()
            .position(|e| matches!(e, SinkEvent::Text(t) if t.contains("References:")))
            .unwrap();
        let warning = events
            .iter()
            .position(|e| matches!(e, SinkEvent::Line(l) if l.starts_with("Stopped after 1 turns")))
            .unwrap();
        assert!(references < warning);
    }

    #[tokio::test]
    async fn test_output_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.md");

        let mut cfg = config("q", 2);
        cfg.output_file = Some(path.clone());
        let session = AgentSession::new(
            cfg,
            Arc::new(ScriptedProvider::new(vec![text_turn("final answer")])),
            Arc::new(registry()),
            Arc::new(MemoryStore::new("test")),
        );
        session.run(&mut RecordingSink::new()).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "final answer");
    }

    #[tokio::test]
    async fn test_oversized_history_truncated_and_saved() {
        let mut history = Vec::new();
        for i in 0..4 {
            history.push(Message::user(format!("{}{}", i, "u".repeat(200_000))));
            history.push(Message::assistant(vec![Content::text(format!(
                "{}{}",
                i,
                "a".repeat(200_000)
            ))]));
        }
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("short")]));
        let store = Arc::new(MemoryStore::with_history("test", history));
        let mut sink = RecordingSink::new();

        let session = AgentSession::new(
            config("q", 2),
            provider.clone(),
            Arc::new(registry()),
            store.clone(),
        );
        session.run(&mut sink).await.unwrap();

        assert_eq!(sink.mode_count(RenderMode::Warning), 1);

        // system, the newest exchange, the prompt
        let sent = &provider.histories()[0];
        assert_eq!(sent.len(), 4);
        assert!(sent[0].is_system());
        assert!(sent[1].text().starts_with('3'));

        // the truncated view plus the reply
        let saved = store.snapshot();
        assert_eq!(saved.len(), 5);
        assert!(saved[0].is_system());
        assert_eq!(saved[4].text(), "short");
    }

    #[test]
    fn test_describe_and_summarize() {
        let call = ToolCall {
            id: "1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "a.txt"}),
        };
        assert_eq!(describe_call(&call), r#"read_file {"path":"a.txt"}"#);

        let ok = Message::tool_result("1", "read_file", vec![Content::text("a\nb")], false);
        assert_eq!(summarize_result(&ok), "done (2 lines)");
        let bad = Message::tool_result("1", "read_file", vec![Content::text("Error: nope")], true);
        assert_eq!(summarize_result(&bad), "failed: Error: nope");
        assert_eq!(truncate_chars("héllo", 2), "hé…");
    }
}
