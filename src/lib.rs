//! # sheet-analyst
//!
//! A command-line data analyst: a hosted language model wired to four tools
//! (web search, a plain-text research log, Excel metadata and Excel charts).
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Build context with the system prompt, tool schemas and answer format
//! 2. Ask the oracle what to do next
//! 3. Execute any requested tools and feed the results back
//! 4. Repeat until the oracle produces a final answer or the turn limit is hit
//!
//! The final answer is validated against a fixed schema
//! (topic, summary, sources, tools used).
//!
//! ## Example
//!
//! ```rust,ignore
//! use sheet_analyst::{agent::Agent, config::Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::from_config(&config)?;
//! let run = agent.run("Plot revenue by month from ~/sales.xlsx").await;
//! println!("{}", run.report());
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod output;
pub mod tools;

pub use agent::{Agent, AgentError, AgentRun, LoopState};
pub use config::Config;
pub use output::StructuredAnswer;
