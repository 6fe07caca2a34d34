//! Record of a single agent run.

use serde::Serialize;
use uuid::Uuid;

use super::AgentError;
use crate::output::StructuredAnswer;

/// States of the agent loop.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingOracle,
    ExecutingTool,
    Done,
    Failed,
}

/// Types of log entries.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryType {
    /// Raw oracle reply
    OracleReply,
    /// Tool is being called
    ToolCall,
    /// Tool returned a result
    ToolResult,
    /// Run produced its final answer
    Response,
    /// Run failed
    Error,
}

/// A single entry in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    /// Timestamp (RFC 3339)
    pub timestamp: String,

    pub entry_type: LogEntryType,

    pub content: String,
}

/// Everything observable about one query once the loop has terminated.
#[derive(Debug)]
pub struct AgentRun {
    pub run_id: Uuid,

    pub outcome: Result<StructuredAnswer, AgentError>,

    /// Number of oracle consultations
    pub oracle_visits: usize,

    /// Every state entered, in order, ending in `Done` or `Failed`
    pub trace: Vec<LoopState>,

    pub log: Vec<RunLogEntry>,
}

/// States and log entries collected while the loop is still running.
#[derive(Debug, Default)]
pub(crate) struct RunRecorder {
    oracle_visits: usize,
    trace: Vec<LoopState>,
    log: Vec<RunLogEntry>,
}

impl RunRecorder {
    pub(crate) fn enter(&mut self, state: LoopState) {
        if state == LoopState::AwaitingOracle {
            self.oracle_visits += 1;
        }
        self.trace.push(state);
    }

    pub(crate) fn record(&mut self, entry_type: LogEntryType, content: impl Into<String>) {
        self.log.push(RunLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            entry_type,
            content: truncate_for_log(&content.into(), 2000),
        });
    }

    /// Close the record with the terminal state matching `outcome`.
    pub(crate) fn finish(
        mut self,
        run_id: Uuid,
        outcome: Result<StructuredAnswer, AgentError>,
    ) -> AgentRun {
        match &outcome {
            Ok(answer) => {
                self.trace.push(LoopState::Done);
                self.record(LogEntryType::Response, answer.to_string());
            }
            Err(e) => {
                self.trace.push(LoopState::Failed);
                self.record(LogEntryType::Error, e.to_string());
            }
        }
        AgentRun {
            run_id,
            outcome,
            oracle_visits: self.oracle_visits,
            trace: self.trace,
            log: self.log,
        }
    }
}

impl AgentRun {
    /// Terminal state of the run.
    pub fn state(&self) -> LoopState {
        match self.outcome {
            Ok(_) => LoopState::Done,
            Err(_) => LoopState::Failed,
        }
    }

    pub fn answer(&self) -> Option<&StructuredAnswer> {
        self.outcome.as_ref().ok()
    }

    /// Text shown to the user for this run.
    pub fn report(&self) -> String {
        match &self.outcome {
            Ok(answer) => format!("Structured Result:\n{}", answer),
            Err(AgentError::OutputParse { raw, source }) => {
                format!("Failed to parse output ({}):\n{}", source, raw)
            }
            Err(e) => format!("Agent stopped: {}", e),
        }
    }
}

/// Truncate a string for logging purposes, on a char boundary.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
