//! Core agent loop implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use super::prompt::build_system_prompt;
use super::reply::{interpret, OracleReply};
use super::run::{truncate_for_log, AgentRun, LogEntryType, LoopState, RunRecorder};
use super::AgentError;
use crate::config::Config;
use crate::llm::{ChatMessage, LlmClient, OpenAiClient};
use crate::output::{self, StructuredAnswer};
use crate::tools::{ToolRegistry, ToolResult};

/// Bounds applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Maximum oracle consultations per query
    pub max_iterations: usize,
    /// Deadline for a single oracle call
    pub turn_timeout: Duration,
    /// Deadline for a single tool execution
    pub tool_timeout: Duration,
    /// Deadline for the whole query
    pub query_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            turn_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(300),
            query_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_iterations: config.max_iterations,
            turn_timeout: config.turn_timeout,
            tool_timeout: config.tool_timeout,
            query_timeout: config.query_timeout,
        }
    }
}

/// Conversation for one query. Only ever grows.
#[derive(Debug, Clone)]
pub struct ConversationState {
    original_query: String,
    turn_history: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new(system_prompt: String, query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            turn_history: vec![ChatMessage::system(system_prompt), ChatMessage::user(query)],
        }
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.turn_history
    }

    fn push(&mut self, message: ChatMessage) {
        self.turn_history.push(message);
    }
}

/// Text fed back to the oracle after a tool ran.
fn tool_feedback(tool_name: &str, result: &ToolResult) -> String {
    let status = if result.success { "success" } else { "error" };
    format!("Result of tool `{}` ({}):\n{}", tool_name, status, result.payload)
}

/// The tool-calling agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    settings: LoopSettings,
}

impl Agent {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, settings: LoopSettings) -> Self {
        Self {
            llm,
            tools,
            settings,
        }
    }

    /// Agent backed by the hosted model and the built-in tools.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let llm = Arc::new(OpenAiClient::from_config(config)?);
        let tools = Arc::new(ToolRegistry::with_default_tools(config)?);
        Ok(Self::new(llm, tools, LoopSettings::from(config)))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer one query. Never panics or returns early: every failure is
    /// captured in the returned run.
    pub async fn run(&self, query: &str) -> AgentRun {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("agent_run", %run_id);
        let mut recorder = RunRecorder::default();

        let outcome = async {
            tracing::info!("Starting run for query: {}", truncate_for_log(query, 200));
            let limit = self.settings.query_timeout;
            match tokio::time::timeout(limit, self.drive(query, &mut recorder)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::Timeout {
                    what: "the query to finish",
                    after: limit,
                }),
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &outcome {
            Ok(answer) => tracing::info!("Run finished: {}", answer.topic),
            Err(e) => tracing::warn!("Run failed: {}", e),
        });

        recorder.finish(run_id, outcome)
    }

    async fn drive(
        &self,
        query: &str,
        run: &mut RunRecorder,
    ) -> Result<StructuredAnswer, AgentError> {
        let mut conversation = ConversationState::new(build_system_prompt(&self.tools), query);

        for iteration in 0..self.settings.max_iterations {
            run.enter(LoopState::AwaitingOracle);
            tracing::debug!("Agent iteration {}", iteration + 1);

            let reply = tokio::time::timeout(
                self.settings.turn_timeout,
                self.llm.complete(conversation.messages()),
            )
            .await
            .map_err(|_| AgentError::Timeout {
                what: "the oracle",
                after: self.settings.turn_timeout,
            })??;

            tracing::debug!("Oracle replied: {}", truncate_for_log(&reply, 1000));
            run.record(LogEntryType::OracleReply, reply.as_str());

            let calls = match interpret(&reply)? {
                OracleReply::Final => {
                    conversation.push(ChatMessage::assistant(reply.as_str()));
                    return output::parse(&reply)
                        .map_err(|source| AgentError::OutputParse { raw: reply, source });
                }
                OracleReply::ToolCalls(calls) => calls,
            };

            // Resolve every call before running any of them.
            let resolved = calls
                .iter()
                .map(|call| self.tools.resolve(call))
                .collect::<Result<Vec<_>, _>>()?;

            conversation.push(ChatMessage::assistant(reply.as_str()));
            run.enter(LoopState::ExecutingTool);

            for (invocation, call) in calls.iter().zip(resolved) {
                tracing::info!(
                    "Calling tool: {} with args: {}",
                    invocation.tool_name,
                    invocation.arguments
                );
                run.record(
                    LogEntryType::ToolCall,
                    format!("{} {}", invocation.tool_name, invocation.arguments),
                );

                let limit = self.settings.tool_timeout;
                let result = match tokio::time::timeout(limit, call.execute()).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Tool {} timed out after {:?}", invocation.tool_name, limit);
                        ToolResult::failure(format!(
                            "Tool {} did not finish within {:?}",
                            invocation.tool_name, limit
                        ))
                    }
                };

                tracing::debug!(
                    "Tool {} returned (success={}): {}",
                    invocation.tool_name,
                    result.success,
                    truncate_for_log(&result.payload, 1000)
                );
                run.record(LogEntryType::ToolResult, result.payload.as_str());
                conversation.push(ChatMessage::tool(tool_feedback(
                    &invocation.tool_name,
                    &result,
                )));
            }
        }

        Err(AgentError::StepLimitExceeded(self.settings.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use super::*;
    use crate::llm::{LlmError, Role};
    use crate::tools::{str_arg, ParamKind, ParamSpec, SaveText, Tool, ToolError};

    /// Oracle that replays a fixed script and records what it was shown.
    struct ScriptedOracle {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedOracle {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn conversations(&self) -> Vec<Vec<ChatMessage>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedOracle {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyResponse)
        }
    }

    /// Oracle that asks for the same tool on every turn.
    struct AlwaysCalls {
        tool: &'static str,
        calls: AtomicUsize,
    }

    impl AlwaysCalls {
        fn new(tool: &'static str) -> Self {
            Self {
                tool,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for AlwaysCalls {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                r#"{{"tool_calls": [{{"name": "{}", "arguments": {{"query": "again"}}}}]}}"#,
                self.tool
            ))
        }
    }

    /// Oracle that never answers in time.
    struct Stalled;

    #[async_trait]
    impl LlmClient for Stalled {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    /// Search stand-in with a canned answer, or a provider failure.
    struct StubSearch {
        result: Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl Tool for StubSearch {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "Search the web for information."
        }

        fn params(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("query", ParamKind::String, "The search query")]
        }

        async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
            str_arg(args, "query")?;
            self.result
                .map(str::to_string)
                .map_err(|e| ToolError::SearchUnavailable(e.to_string()))
        }
    }

    /// Lookup that takes `delay` to answer.
    struct SlowLookup {
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SlowLookup {
        fn name(&self) -> &str {
            "slow_lookup"
        }

        fn description(&self) -> &str {
            "Look something up, slowly."
        }

        fn params(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("query", ParamKind::String, "What to look up")]
        }

        async fn execute(&self, _args: &Map<String, Value>) -> Result<String, ToolError> {
            tokio::time::sleep(self.delay).await;
            Ok("found it".to_string())
        }
    }

    fn slow_registry(delay: Duration) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowLookup { delay })).unwrap();
        Arc::new(registry)
    }

    fn registry(search: StubSearch, log_dir: &std::path::Path) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(search)).unwrap();
        registry
            .register(Arc::new(SaveText::new(log_dir.to_path_buf())))
            .unwrap();
        Arc::new(registry)
    }

    fn settings(max_iterations: usize) -> LoopSettings {
        LoopSettings {
            max_iterations,
            ..LoopSettings::default()
        }
    }

    fn france_answer() -> StructuredAnswer {
        StructuredAnswer {
            topic: "France population".to_string(),
            summary: "France has roughly 68 million inhabitants.".to_string(),
            sources: vec!["search".to_string()],
            tools_used: vec!["search".to_string(), "save_text_to_file".to_string()],
        }
    }

    #[tokio::test]
    async fn direct_answer_finishes_after_one_oracle_visit() {
        let dir = tempfile::tempdir().unwrap();
        let answer = france_answer();
        let oracle = Arc::new(ScriptedOracle::new(&[&answer.to_oracle_format()]));
        let agent = Agent::new(
            oracle.clone(),
            registry(StubSearch { result: Ok("68 million") }, dir.path()),
            settings(5),
        );

        let run = agent.run("How many people live in France?").await;

        assert_eq!(run.state(), LoopState::Done);
        assert_eq!(run.oracle_visits, 1);
        assert_eq!(run.trace, vec![LoopState::AwaitingOracle, LoopState::Done]);
        assert_eq!(run.answer(), Some(&answer));

        let seen = oracle.conversations();
        assert_eq!(seen[0][0].role, Role::System);
        assert!(seen[0][0].content.contains("save_text_to_file"));
        assert_eq!(seen[0][1], ChatMessage::user("How many people live in France?"));
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_the_step_limit() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(AlwaysCalls::new("search"));
        let agent = Agent::new(
            oracle.clone(),
            registry(StubSearch { result: Ok("nothing new") }, dir.path()),
            settings(4),
        );

        let run = agent.run("loop forever").await;

        assert_eq!(run.state(), LoopState::Failed);
        assert!(matches!(run.outcome, Err(AgentError::StepLimitExceeded(4))));
        assert_eq!(run.oracle_visits, 4);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
        assert_eq!(run.trace.len(), 9);
        assert_eq!(run.trace.last(), Some(&LoopState::Failed));
    }

    #[tokio::test]
    async fn search_and_save_scenario_reaches_done() {
        let dir = tempfile::tempdir().unwrap();
        let expected = france_answer();
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [{"name": "search", "arguments": {"query": "population of France"}}]}"#,
            r#"```json
{"tool_calls": [{"name": "save_text_to_file", "arguments": {"data": "France population: 68 million"}}]}
```"#,
            &expected.to_oracle_format(),
        ]));
        let agent = Agent::new(
            oracle.clone(),
            registry(StubSearch { result: Ok("68 million") }, dir.path()),
            settings(10),
        );

        let run = agent
            .run("Search for the population of France and save it")
            .await;

        assert_eq!(run.state(), LoopState::Done);
        assert_eq!(run.oracle_visits, 3);
        assert_eq!(run.answer(), Some(&expected));
        assert_eq!(run.report(), format!("Structured Result:\n{}", expected));
        assert_eq!(output::parse(&run.report()).unwrap(), expected);

        // The search result reached the oracle on the second turn.
        let second_turn = &oracle.conversations()[1];
        let feedback = second_turn.last().unwrap();
        assert_eq!(feedback.role, Role::Tool);
        assert_eq!(feedback.content, "Result of tool `search` (success):\n68 million");

        let saved = std::fs::read_to_string(dir.path().join("research_output.txt")).unwrap();
        assert!(saved.contains("France population: 68 million"));
    }

    #[tokio::test]
    async fn search_failure_is_fed_back_instead_of_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let answer = france_answer();
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [{"name": "search", "arguments": {"query": "France"}}]}"#,
            &answer.to_oracle_format(),
        ]));
        let agent = Agent::new(
            oracle.clone(),
            registry(StubSearch { result: Err("rate limited") }, dir.path()),
            settings(5),
        );

        let run = agent.run("population of France").await;

        assert_eq!(run.state(), LoopState::Done);
        let feedback = oracle.conversations()[1].last().unwrap().content.clone();
        assert!(feedback.starts_with("Result of tool `search` (error):"));
        assert!(feedback.contains("rate limited"));
    }

    #[tokio::test]
    async fn multiple_calls_in_one_turn_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [
                {"name": "save_text_to_file", "arguments": {"data": "first", "filename": "order.txt"}},
                {"name": "save_text_to_file", "arguments": {"data": "second", "filename": "order.txt"}}
            ]}"#,
            &france_answer().to_oracle_format(),
        ]));
        let agent = Agent::new(
            oracle,
            registry(StubSearch { result: Ok("") }, dir.path()),
            settings(5),
        );

        let run = agent.run("save twice").await;

        assert_eq!(run.state(), LoopState::Done);
        assert_eq!(
            run.trace,
            vec![
                LoopState::AwaitingOracle,
                LoopState::ExecutingTool,
                LoopState::AwaitingOracle,
                LoopState::Done,
            ]
        );
        let saved = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert!(saved.find("first").unwrap() < saved.find("second").unwrap());
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [{"name": "delete_everything", "arguments": {}}]}"#,
        ]));
        let agent = Agent::new(
            oracle,
            registry(StubSearch { result: Ok("") }, dir.path()),
            settings(5),
        );

        let run = agent.run("do something odd").await;

        assert!(matches!(run.outcome, Err(AgentError::UnknownTool(ref n)) if n == "delete_everything"));
        assert_eq!(run.trace, vec![LoopState::AwaitingOracle, LoopState::Failed]);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_any_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [
                {"name": "save_text_to_file", "arguments": {"data": "kept?"}},
                {"name": "search", "arguments": {"q": "missing query"}}
            ]}"#,
        ]));
        let agent = Agent::new(
            oracle,
            registry(StubSearch { result: Ok("") }, dir.path()),
            settings(5),
        );

        let run = agent.run("bad args").await;

        assert!(matches!(
            run.outcome,
            Err(AgentError::ArgumentValidation { ref tool, .. }) if tool == "search"
        ));
        assert!(!dir.path().join("research_output.txt").exists());
    }

    #[tokio::test]
    async fn unparseable_final_answer_keeps_the_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(&["France has 68 million people."]));
        let agent = Agent::new(
            oracle,
            registry(StubSearch { result: Ok("") }, dir.path()),
            settings(5),
        );

        let run = agent.run("population?").await;

        match &run.outcome {
            Err(AgentError::OutputParse { raw, .. }) => {
                assert_eq!(raw, "France has 68 million people.")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(run.oracle_visits, 1);
        assert!(run.report().ends_with("France has 68 million people."));
    }

    #[tokio::test]
    async fn oracle_errors_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(
            Arc::new(ScriptedOracle::new(&[])),
            registry(StubSearch { result: Ok("") }, dir.path()),
            settings(5),
        );

        let run = agent.run("anyone there?").await;

        assert!(matches!(run.outcome, Err(AgentError::Oracle(LlmError::EmptyResponse))));
    }

    #[tokio::test]
    async fn stalled_oracle_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(
            Arc::new(Stalled),
            registry(StubSearch { result: Ok("") }, dir.path()),
            LoopSettings {
                max_iterations: 3,
                turn_timeout: Duration::from_millis(50),
                query_timeout: Duration::from_secs(30),
                ..LoopSettings::default()
            },
        );

        let run = agent.run("hello?").await;

        assert!(matches!(
            run.outcome,
            Err(AgentError::Timeout { what: "the oracle", .. })
        ));
    }

    #[tokio::test]
    async fn query_deadline_stops_a_run_that_keeps_calling_tools() {
        let oracle = Arc::new(AlwaysCalls::new("slow_lookup"));
        let agent = Agent::new(
            oracle.clone(),
            slow_registry(Duration::from_millis(40)),
            LoopSettings {
                max_iterations: 1000,
                query_timeout: Duration::from_millis(300),
                ..LoopSettings::default()
            },
        );

        let run = agent.run("keep looking").await;

        assert!(matches!(
            run.outcome,
            Err(AgentError::Timeout {
                what: "the query to finish",
                ..
            })
        ));
        assert_eq!(run.trace.last(), Some(&LoopState::Failed));
        assert!(run.oracle_visits > 1);
        assert!(oracle.calls.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn slow_tool_becomes_an_error_result() {
        let oracle = Arc::new(ScriptedOracle::new(&[
            r#"{"tool_calls": [{"name": "slow_lookup", "arguments": {"query": "x"}}]}"#,
            &france_answer().to_oracle_format(),
        ]));
        let agent = Agent::new(
            oracle.clone(),
            slow_registry(Duration::from_secs(30)),
            LoopSettings {
                max_iterations: 5,
                tool_timeout: Duration::from_millis(50),
                ..LoopSettings::default()
            },
        );

        let run = agent.run("look it up").await;

        assert_eq!(run.state(), LoopState::Done);
        let feedback = oracle.conversations()[1].last().unwrap().content.clone();
        assert!(feedback.starts_with("Result of tool `slow_lookup` (error):"));
        assert!(feedback.contains("did not finish within"));
    }

    #[test]
    fn conversation_keeps_the_query() {
        let conversation = ConversationState::new("system".to_string(), "q");
        assert_eq!(conversation.original_query(), "q");
        assert_eq!(conversation.messages().len(), 2);
    }
}
