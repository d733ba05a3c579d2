//! End-to-end behavior of the agent loop against scripted model responses.

use agentloop_agent::{AgentLoop, ExitHandler, ExitReason};
use agentloop_config::{AppConfig, Destination, FallbackConfig};
use agentloop_core::conversation::{ContentBlock, Role};
use agentloop_core::error::{ProviderError, ToolError};
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::provider::{ModelRequest, ModelResponse, Provider, StopReason, Usage};
use agentloop_core::tool::{CompletionTool, Tool, ToolRegistry};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays scripted responses; repeats the last one once the script runs out.
struct ScriptedProvider {
    script: Vec<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(script: Vec<ModelResponse>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    fn with_delay(script: Vec<ModelResponse>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ModelRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let index = call.min(self.script.len() - 1);
        Ok(self.script[index].clone())
    }
}

fn response(stop_reason: StopReason, content: Vec<ContentBlock>) -> ModelResponse {
    ModelResponse {
        stop_reason,
        content,
        usage: Usage {
            input_tokens: 50,
            output_tokens: 10,
        },
        model: "scripted-model".into(),
    }
}

fn tool_call(id: &str, name: &str, input: Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}

/// Counts executions; fails or panics when the input asks it to.
struct SearchTool {
    name: &'static str,
    executions: AtomicUsize,
}

impl SearchTool {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            executions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Search the workspace"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }
    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if input["panic"] == json!(true) {
            panic!("search index corrupted");
        }
        if input["fail"] == json!(true) {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.into(),
                reason: "search backend unavailable".into(),
            });
        }
        Ok(json!({"results": [{"title": format!("hit for {}", input["query"])}]}))
    }
}

fn registry(tools: &[Arc<SearchTool>]) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool.clone());
    }
    Arc::new(registry.with_completion(CompletionTool::new(
        "generate-briefing",
        "Deliver the final briefing",
        "briefing_text",
    )))
}

fn agent(provider: Arc<ScriptedProvider>, tools: Arc<ToolRegistry>) -> AgentLoop {
    AgentLoop::new(
        provider,
        "scripted-model",
        tools,
        "You are a helpful assistant.",
        Arc::new(EventBus::default()),
    )
}

#[tokio::test]
async fn search_then_end_turn_sends_three_turns() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![
        response(StopReason::ToolUse, vec![tool_call("t1", "search", json!({"query": "okr"}))]),
        response(StopReason::EndTurn, vec![ContentBlock::text("done")]),
    ]);

    let outcome = agent(provider.clone(), registry(&[search.clone()]))
        .run("What are our OKRs?")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::EndTurn);
    assert_eq!(outcome.record.final_text.as_deref(), Some("done"));
    assert_eq!(provider.calls(), 2);
    assert_eq!(search.executions.load(Ordering::SeqCst), 1);

    let second = provider.request(1);
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[0].role, Role::User);
    assert_eq!(second.messages[1].role, Role::Assistant);
    assert_eq!(second.messages[2].tool_result_ids(), vec!["t1"]);
    assert_eq!(second.system, provider.request(0).system);
    assert_eq!(second.tools, provider.request(0).tools);

    // The full history is kept, ending with the final answer
    assert_eq!(outcome.conversation.len(), 4);
    assert_eq!(outcome.conversation.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn text_only_first_response_runs_no_tools() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![response(
        StopReason::EndTurn,
        vec![ContentBlock::text("Hello! "), ContentBlock::text("How can I help?")],
    )]);
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();

    let outcome = AgentLoop::new(provider, "scripted-model", registry(&[search.clone()]), "sys", bus)
        .run("hi")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::EndTurn);
    assert_eq!(outcome.record.final_text.as_deref(), Some("Hello! How can I help?"));
    assert_eq!(search.executions.load(Ordering::SeqCst), 0);

    let mut saw_exit = false;
    while let Ok(event) = rx.try_recv() {
        match event.as_ref() {
            DomainEvent::ToolExecuted { .. } => panic!("no tool should run"),
            DomainEvent::LoopExited { reason, iterations, .. } => {
                assert_eq!(reason, "end_turn");
                assert_eq!(*iterations, 1);
                saw_exit = true;
            }
            _ => {}
        }
    }
    assert!(saw_exit);
}

#[tokio::test]
async fn completion_signal_never_executes_siblings() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![response(
        StopReason::ToolUse,
        vec![
            tool_call("t1", "search", json!({"query": "late"})),
            tool_call("t2", "generate-briefing", json!({"briefing_text": "Good morning. Two meetings today."})),
            tool_call("t3", "search", json!({"query": "later"})),
        ],
    )]);

    let outcome = agent(provider.clone(), registry(&[search.clone()]))
        .run("Brief me")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::CompletionSignal);
    assert_eq!(
        outcome.record.final_text.as_deref(),
        Some("Good morning. Two meetings today.")
    );
    assert_eq!(outcome.record.discarded_invocations, 2);
    assert_eq!(search.executions.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn batch_results_match_invocation_order() {
    let search = SearchTool::new("search");
    let fetch = SearchTool::new("fetch");
    let provider = ScriptedProvider::new(vec![
        response(
            StopReason::ToolUse,
            vec![
                tool_call("a", "fetch", json!({"query": "1"})),
                tool_call("b", "search", json!({"query": "2"})),
                tool_call("c", "missing-tool", json!({})),
                tool_call("d", "fetch", json!({"query": "3"})),
            ],
        ),
        response(StopReason::EndTurn, vec![ContentBlock::text("ok")]),
    ]);

    agent(provider.clone(), registry(&[search, fetch]))
        .run("go")
        .await
        .unwrap();

    let results = &provider.request(1).messages[2];
    assert_eq!(results.tool_result_ids(), vec!["a", "b", "c", "d"]);
    match &results.content[2] {
        ContentBlock::ToolResult { content, is_error, .. } => {
            assert!(*is_error);
            assert!(content.contains("Tool not found: missing-tool"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn one_failing_tool_still_yields_both_results() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![
        response(
            StopReason::ToolUse,
            vec![
                tool_call("ok", "search", json!({"query": "calendar"})),
                tool_call("bad", "search", json!({"query": "mail", "fail": true})),
            ],
        ),
        response(StopReason::EndTurn, vec![ContentBlock::text("partial briefing")]),
    ]);

    let outcome = agent(provider.clone(), registry(&[search.clone()]))
        .run("Brief me")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::EndTurn);
    assert_eq!(search.executions.load(Ordering::SeqCst), 2);

    let results = &provider.request(1).messages[2];
    let flags: Vec<(String, bool)> = results
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => (tool_use_id.clone(), *is_error),
            other => panic!("unexpected block {other:?}"),
        })
        .collect();
    assert_eq!(flags, vec![("ok".to_string(), false), ("bad".to_string(), true)]);
}

#[tokio::test]
async fn panic_in_one_invocation_spares_its_sibling() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![
        response(
            StopReason::ToolUse,
            vec![
                tool_call("ok", "search", json!({"query": "calendar"})),
                tool_call("boom", "search", json!({"query": "mail", "panic": true})),
            ],
        ),
        response(StopReason::EndTurn, vec![ContentBlock::text("done")]),
    ]);

    let outcome = agent(provider.clone(), registry(&[search]))
        .run("Brief me")
        .await
        .unwrap();
    assert_eq!(outcome.record.reason, ExitReason::EndTurn);

    let results = &provider.request(1).messages[2];
    match (&results.content[0], &results.content[1]) {
        (
            ContentBlock::ToolResult { content: ok, is_error: ok_err, .. },
            ContentBlock::ToolResult { content: boom, is_error: boom_err, .. },
        ) => {
            assert!(!ok_err);
            assert!(ok.contains("hit for"));
            assert!(boom_err);
            assert!(boom.contains("crashed"));
        }
        other => panic!("unexpected blocks {other:?}"),
    }
}

#[tokio::test]
async fn eleventh_call_is_never_made() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![response(
        StopReason::ToolUse,
        vec![tool_call("loop", "search", json!({"query": "again"}))],
    )]);

    let outcome = agent(provider.clone(), registry(&[search.clone()]))
        .with_max_iterations(10)
        .run("never ends")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::MaxIterationsReached);
    assert_eq!(outcome.record.iterations, 10);
    assert_eq!(provider.calls(), 10);
    assert_eq!(search.executions.load(Ordering::SeqCst), 10);
    assert_eq!(outcome.record.usage.total_tokens(), 600);
}

#[tokio::test(start_paused = true)]
async fn timeout_trips_between_turns_within_iteration_bound() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::with_delay(
        vec![response(
            StopReason::ToolUse,
            vec![tool_call("slow", "search", json!({"query": "x"}))],
        )],
        Duration::from_secs(3),
    );

    let outcome = agent(provider.clone(), registry(&[search]))
        .with_max_iterations(10)
        .with_timeout(Duration::from_secs(5))
        .run("slow task")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::Timeout);
    assert_eq!(provider.calls(), 2);
    assert!(outcome.record.elapsed > Duration::from_secs(5));
}

#[tokio::test]
async fn exit_handler_turns_bound_exit_into_fallback() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![response(
        StopReason::ToolUse,
        vec![tool_call("loop", "search", json!({}))],
    )]);
    let outcome = agent(provider, registry(&[search]))
        .with_max_iterations(2)
        .run("never ends")
        .await
        .unwrap();

    let today = chrono::NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
    let delivery = ExitHandler::new(Destination::Speech, FallbackConfig::default(), today)
        .deliver(&outcome.record);

    assert!(delivery.fallback);
    assert_eq!(delivery.reason, "max_iterations_reached");
    assert_eq!(delivery.iterations, 2);
    assert_eq!(delivery.text, FallbackConfig::default().max_iterations);
}

#[tokio::test]
async fn bound_exit_delivers_previous_response_text() {
    let search = SearchTool::new("search");
    let provider = ScriptedProvider::new(vec![response(
        StopReason::ToolUse,
        vec![
            ContentBlock::text("Standup at nine, nothing else yet."),
            tool_call("loop", "search", json!({})),
        ],
    )]);
    let outcome = agent(provider, registry(&[search]))
        .with_max_iterations(2)
        .run("never ends")
        .await
        .unwrap();

    assert_eq!(outcome.record.reason, ExitReason::MaxIterationsReached);
    assert!(outcome.record.final_text.is_none());
    assert_eq!(outcome.record.text_content, "Standup at nine, nothing else yet.");

    let today = chrono::NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
    let delivery = ExitHandler::new(Destination::Plain, FallbackConfig::default(), today)
        .deliver(&outcome.record);
    assert!(!delivery.fallback);
    assert_eq!(delivery.text, "Standup at nine, nothing else yet.");
}

#[tokio::test]
async fn markup_only_answer_is_never_delivered_empty() {
    let provider = ScriptedProvider::new(vec![response(
        StopReason::ToolUse,
        vec![tool_call("done", "generate-briefing", json!({"briefing_text": "**"}))],
    )]);
    let outcome = agent(provider, registry(&[])).run("Brief me").await.unwrap();
    assert_eq!(outcome.record.reason, ExitReason::CompletionSignal);

    let today = chrono::NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
    let delivery = ExitHandler::new(Destination::Speech, FallbackConfig::default(), today)
        .deliver(&outcome.record);
    assert!(delivery.fallback);
    assert!(!delivery.text.trim().is_empty());
    assert!(delivery.text.contains("Wednesday, October 14, 2026"));
}

#[cfg(unix)]
#[tokio::test]
async fn large_payload_streams_through_command_tool() {
    let config: AppConfig = toml::from_str(
        r#"
[[profiles]]
name = "echo"
system_prompt = "x"

[[profiles.tools]]
name = "echo"
description = "Echo the input"
command = "cat"
"#,
    )
    .unwrap();
    let profile = config.profile("echo").unwrap();
    let body = "y".repeat(400 * 1024);
    let provider = ScriptedProvider::new(vec![
        response(
            StopReason::ToolUse,
            vec![tool_call("big", "echo", json!({"body": body}))],
        ),
        response(StopReason::EndTurn, vec![ContentBlock::text("ok")]),
    ]);

    let tools = Arc::new(agentloop_tools::registry_from_profile(profile));
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        agent(provider.clone(), tools).run("echo it"),
    )
    .await
    .expect("loop finished")
    .unwrap();
    assert_eq!(outcome.record.reason, ExitReason::EndTurn);

    match &provider.request(1).messages[2].content[0] {
        ContentBlock::ToolResult { content, is_error, .. } => {
            assert!(!is_error);
            assert!(content.len() > 400 * 1024);
        }
        other => panic!("unexpected block {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn profile_with_command_tools_runs_end_to_end() {
    let config: AppConfig = toml::from_str(
        r#"
default_model = "scripted-model"

[[profiles]]
name = "briefing"
destination = "speech"
system_prompt = "TODAY: {date}"
task_template = "Brief me for {date}"

[profiles.completion]
name = "generate-briefing"
description = "Deliver"
answer_field = "briefing_text"

[[profiles.tools]]
name = "get-calendar-events"
description = "Today's events"
command = "sh"
args = ["-c", "echo '[{\"title\": \"Standup\"}]'"]
shared = true
"#,
    )
    .unwrap();
    let profile = config.profile("briefing").unwrap();

    let provider = ScriptedProvider::new(vec![
        response(
            StopReason::ToolUse,
            vec![
                tool_call("c1", "get-calendar-events", json!({})),
                tool_call("c2", "get-calendar-events", json!({})),
            ],
        ),
        response(
            StopReason::ToolUse,
            vec![tool_call(
                "done",
                "generate-briefing",
                json!({"briefing_text": "## Morning\n\n**Standup** at nine."}),
            )],
        ),
    ]);

    let tools = Arc::new(agentloop_tools::registry_from_profile(profile));
    let agent = AgentLoop::for_profile(
        provider.clone(),
        &config,
        profile,
        tools,
        "Wednesday, October 14, 2026",
        Arc::new(EventBus::default()),
    );
    let outcome = agent
        .run(profile.render_task("", "Wednesday, October 14, 2026"))
        .await
        .unwrap();

    let first = provider.request(0);
    assert_eq!(first.system, "TODAY: Wednesday, October 14, 2026");
    assert_eq!(first.model, "scripted-model");
    assert_eq!(first.tools.last().unwrap().name, "generate-briefing");

    let results = &provider.request(1).messages[2];
    for block in &results.content {
        match block {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert!(!is_error);
                assert_eq!(content, r#"[{"title":"Standup"}]"#);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    let today = chrono::NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
    let delivery = ExitHandler::new(profile.destination, profile.fallbacks.clone(), today)
        .deliver(&outcome.record);
    assert_eq!(delivery.reason, "completion-signal");
    assert_eq!(delivery.text, "Morning\n\nStandup at nine.");
    assert_eq!(delivery.title, "Briefing - 2026-10-14");
}
