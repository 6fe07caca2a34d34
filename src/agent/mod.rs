//! Agent module - the tool-calling loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Seed the conversation with the system prompt and the user query
//! 2. Ask the oracle what to do next
//! 3. If it requests tools, run them in order and feed the results back
//! 4. Stop when it produces a final answer or the turn limit is reached
//!
//! Every query gets its own conversation; nothing is shared between runs
//! except the read-only tool registry and the oracle client.

mod agent_loop;
mod prompt;
mod reply;
mod run;

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::output::OutputParseError;
use crate::tools::DispatchError;

pub use agent_loop::{Agent, ConversationState, LoopSettings};
pub use prompt::build_system_prompt;
pub use reply::{interpret, OracleReply};
pub use run::{AgentRun, LogEntryType, LoopState, RunLogEntry};

/// Why a run ended in `Failed`. Terminal for the query, never for the process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    ArgumentValidation { tool: String, reason: String },

    #[error("Step limit exceeded: no final answer after {0} turns")]
    StepLimitExceeded(usize),

    #[error("Final answer does not match the output schema: {source}")]
    OutputParse {
        raw: String,
        #[source]
        source: OutputParseError,
    },

    #[error("Oracle request failed: {0}")]
    Oracle(#[from] LlmError),

    #[error("Timed out waiting for {what} after {after:?}")]
    Timeout { what: &'static str, after: Duration },
}

impl From<DispatchError> for AgentError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownTool(name) => AgentError::UnknownTool(name),
            DispatchError::InvalidArguments { tool, source } => AgentError::ArgumentValidation {
                tool,
                reason: source.to_string(),
            },
        }
    }
}
