//! Interpretation of raw oracle replies.

use serde::Deserialize;
use serde_json::Value;

use super::AgentError;
use crate::output::extract_json;
use crate::tools::ToolInvocation;

/// What the oracle asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Run these tools, in order
    ToolCalls(Vec<ToolInvocation>),
    /// The reply is a final answer candidate
    Final,
}

#[derive(Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<Value>,
}

/// Classify a reply. Only a JSON object with a non-empty `tool_calls` array
/// counts as a tool request; anything else is treated as the final answer.
pub fn interpret(raw: &str) -> Result<OracleReply, AgentError> {
    let Some(envelope) = extract_json(raw)
        .and_then(|json| serde_json::from_str::<ToolCallEnvelope>(json).ok())
    else {
        return Ok(OracleReply::Final);
    };

    if envelope.tool_calls.is_empty() {
        return Ok(OracleReply::Final);
    }

    envelope
        .tool_calls
        .into_iter()
        .map(|call| {
            let tool = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>")
                .to_string();
            serde_json::from_value::<ToolInvocation>(call).map_err(|e| {
                AgentError::ArgumentValidation {
                    tool,
                    reason: format!("malformed tool call: {}", e),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(OracleReply::ToolCalls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_calls_are_read_in_order() {
        let raw = r#"```json
{"tool_calls": [
  {"name": "search", "arguments": {"query": "population of France"}},
  {"name": "save_text_to_file", "arguments": {"data": "68 million"}}
]}
```"#;
        assert_eq!(
            interpret(raw).unwrap(),
            OracleReply::ToolCalls(vec![
                ToolInvocation::new("search", json!({"query": "population of France"})),
                ToolInvocation::new("save_text_to_file", json!({"data": "68 million"})),
            ])
        );
    }

    #[test]
    fn anything_else_is_final() {
        assert_eq!(interpret("Just prose.").unwrap(), OracleReply::Final);
        assert_eq!(
            interpret(r#"{"topic": "t", "summary": "s", "sources": [], "tools_used": []}"#).unwrap(),
            OracleReply::Final
        );
        assert_eq!(interpret(r#"{"tool_calls": []}"#).unwrap(), OracleReply::Final);
    }

    #[test]
    fn call_without_a_name_is_rejected() {
        let err = interpret(r#"{"tool_calls": [{"arguments": {}}]}"#).unwrap_err();
        assert!(matches!(err, AgentError::ArgumentValidation { ref tool, .. } if tool == "<unnamed>"));
    }
}
