//! Structured output contract for the agent's final answer.
//!
//! [`ANSWER_FIELDS`] is the single definition of the answer's shape. The
//! format instructions shown to the oracle and the parser applied to its final
//! reply are both derived from it, so they cannot drift apart.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// JSON shape of an answer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    StringList,
}

impl FieldKind {
    fn schema(self) -> Value {
        match self {
            FieldKind::String => json!({"type": "string"}),
            FieldKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::StringList => "an array of strings",
        }
    }
}

pub struct AnswerField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

pub const ANSWER_FIELDS: &[AnswerField] = &[
    AnswerField {
        name: "topic",
        kind: FieldKind::String,
        description: "Short title of what was asked",
    },
    AnswerField {
        name: "summary",
        kind: FieldKind::String,
        description: "The answer, in a few sentences",
    },
    AnswerField {
        name: "sources",
        kind: FieldKind::StringList,
        description: "Where the information came from",
    },
    AnswerField {
        name: "tools_used",
        kind: FieldKind::StringList,
        description: "Names of the tools called while answering",
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputParseError {
    #[error("no JSON object found in the reply")]
    NoJson,

    #[error("invalid JSON: {0}")]
    Malformed(String),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// The agent's validated final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub topic: String,
    pub summary: String,
    pub sources: Vec<String>,
    pub tools_used: Vec<String>,
}

impl StructuredAnswer {
    /// Render the answer exactly as the oracle is told to format it.
    pub fn to_oracle_format(&self) -> String {
        format!("```json\n{}\n```", self.to_json_pretty())
    }

    fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl fmt::Display for StructuredAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_pretty())
    }
}

/// JSON Schema of the answer.
pub fn answer_schema() -> Value {
    let mut properties = Map::new();
    for field in ANSWER_FIELDS {
        let mut schema = field.kind.schema();
        schema["description"] = json!(field.description);
        properties.insert(field.name.to_string(), schema);
    }
    let required: Vec<&str> = ANSWER_FIELDS.iter().map(|f| f.name).collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Instructions telling the oracle how to format its final answer.
pub fn format_instructions() -> String {
    let schema = serde_json::to_string_pretty(&answer_schema()).unwrap_or_default();
    format!(
        "The final answer must be formatted as a JSON instance that conforms to the JSON schema below.\n\
         All fields are required. Wrap the JSON in a ```json fenced block and do not add any text \
         outside of it.\n\n\
         ```json\n{schema}\n```"
    )
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fenced json regex")
    })
}

/// Locate the JSON object in a reply: a fenced block first, else the outermost braces.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = fenced_json().captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn string_field(obj: &Map<String, Value>, field: &AnswerField) -> Result<String, OutputParseError> {
    match obj.get(field.name) {
        None => Err(OutputParseError::MissingField(field.name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(OutputParseError::WrongType {
            field: field.name,
            expected: field.kind.expected(),
        }),
    }
}

fn list_field(obj: &Map<String, Value>, field: &AnswerField) -> Result<Vec<String>, OutputParseError> {
    let wrong_type = || OutputParseError::WrongType {
        field: field.name,
        expected: field.kind.expected(),
    };
    match obj.get(field.name) {
        None => Err(OutputParseError::MissingField(field.name)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(wrong_type))
            .collect(),
        Some(_) => Err(wrong_type()),
    }
}

/// Validate a raw oracle reply against the answer schema.
///
/// Either every field is present with the right type or the whole reply is
/// rejected.
pub fn parse(raw: &str) -> Result<StructuredAnswer, OutputParseError> {
    let json_text = extract_json(raw).ok_or(OutputParseError::NoJson)?;
    let value: Value =
        serde_json::from_str(json_text).map_err(|e| OutputParseError::Malformed(e.to_string()))?;
    let obj = value.as_object().ok_or(OutputParseError::NotAnObject)?;

    let mut strings = Vec::new();
    let mut lists = Vec::new();
    for field in ANSWER_FIELDS {
        match field.kind {
            FieldKind::String => strings.push(string_field(obj, field)?),
            FieldKind::StringList => lists.push(list_field(obj, field)?),
        }
    }

    let mut strings = strings.into_iter();
    let mut lists = lists.into_iter();
    Ok(StructuredAnswer {
        topic: strings.next().unwrap_or_default(),
        summary: strings.next().unwrap_or_default(),
        sources: lists.next().unwrap_or_default(),
        tools_used: lists.next().unwrap_or_default(),
    })
}
