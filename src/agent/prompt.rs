//! System prompt for the data analyst agent.

use crate::output::format_instructions;
use crate::tools::ToolRegistry;

/// Build the system prompt with tool definitions and the answer format.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .describe_all()
        .iter()
        .map(|t| {
            format!(
                "- **{}**: {}\n  Arguments schema: {}",
                t.name,
                t.description,
                t.parameters_schema()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a Data Analyst that helps generate graphs from Excel files and researches topics on the web.

## Tools

You have access to the following tools:
{tool_descriptions}

## Rules

1. Use tools when needed. If you are unsure of sheet or column names, call `get_excel_metadata` first.
2. If you are asked to make a graph and do not know the sheet or column names, use `get_excel_metadata` before `graph_from_excel`.
3. If a tool returns an error, read it and adapt: fix the arguments, try another tool, or answer without it.

## Calling tools

To call tools, reply with only a JSON object of this form and nothing else:

```json
{{"tool_calls": [{{"name": "<tool name>", "arguments": {{"<field>": "<value>"}}}}]}}
```

Several calls in one reply are executed in the order given. Each result comes back in the next message.

## Final answer

When you are done, stop calling tools and reply with the final answer.
{format_instructions}"#,
        tool_descriptions = tool_descriptions,
        format_instructions = format_instructions(),
    )
}
