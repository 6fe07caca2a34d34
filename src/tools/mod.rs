//! Tool registry and the built-in tools.
//!
//! Every tool declares a name, a description and an ordered list of typed
//! parameters. The registry owns those descriptors, validates oracle-supplied
//! arguments against them and dispatches execution. Tool-local failures never
//! escape as errors: they come back as a [`ToolResult`] with `success = false`
//! so the oracle can adapt.

mod chart;
mod excel;
mod save;
mod web;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::Config;

pub use chart::{ChartKind, GraphFromExcel};
pub use excel::{read_sheet_headers, ExcelMetadata};
pub use save::SaveText;
pub use web::WebSearch;

/// Failures raised inside a tool. Always recoverable by the oracle.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    Format(String),

    #[error("Invalid column names. Available columns: {}", .available.join(", "))]
    InvalidColumn { available: Vec<String> },

    #[error("Unsupported chart type: {0}")]
    UnsupportedChartType(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Execution(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A tool named '{0}' is already registered")]
    DuplicateTool(String),
}

/// Why a set of arguments was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    Missing(String),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

/// Problems resolving an invocation before anything runs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: ArgumentError,
    },
}

/// Scalar types a tool parameter can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Integer => "an integer",
            ParamKind::Number => "a number",
            ParamKind::Boolean => "a boolean",
        }
    }

    /// Coerce a JSON value into this kind, accepting the loose encodings
    /// models tend to produce (`"5"` for 5, `3` for `"3"`).
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::String, Value::String(_)) => Some(value.clone()),
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (ParamKind::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::from),
            (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

            (ParamKind::Number, Value::Number(_)) => Some(value.clone()),
            (ParamKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),

            (ParamKind::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamKind::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },

            _ => None,
        }
    }
}

/// One field of a tool's input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
    /// Value filled in when an optional field is absent
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
            default: Some(default),
        }
    }
}

/// Static description of a registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// JSON Schema of the tool's arguments, as shown to the oracle.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = json!({
                "type": p.kind.json_type(),
                "description": p.description,
            });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the schema, coercing types and filling defaults.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, ArgumentError> {
        let supplied = match arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                // Arguments encoded as a JSON string
                Ok(Value::Object(map)) => map,
                // Single-input tools also accept the raw string
                _ => match self.sole_required_string() {
                    Some(name) => {
                        let mut map = Map::new();
                        map.insert(name.to_string(), Value::String(s.clone()));
                        map
                    }
                    None => return Err(ArgumentError::NotAnObject),
                },
            },
            _ => return Err(ArgumentError::NotAnObject),
        };

        let mut validated = Map::new();
        for p in &self.params {
            match supplied.get(&p.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let coerced = p.kind.coerce(value).ok_or_else(|| ArgumentError::WrongType {
                        field: p.name.clone(),
                        expected: p.kind.expected(),
                    })?;
                    validated.insert(p.name.clone(), coerced);
                }
                None if p.required => return Err(ArgumentError::Missing(p.name.clone())),
                None => {
                    if let Some(default) = &p.default {
                        validated.insert(p.name.clone(), default.clone());
                    }
                }
            }
        }

        for extra in supplied.keys().filter(|k| !validated.contains_key(*k)) {
            tracing::debug!("Ignoring unknown argument '{}' for {}", extra, self.name);
        }

        Ok(validated)
    }

    fn sole_required_string(&self) -> Option<&str> {
        let mut required = self.params.iter().filter(|p| p.required);
        match (required.next(), required.next()) {
            (Some(p), None) if p.kind == ParamKind::String => Some(&p.name),
            _ => None,
        }
    }
}

/// A tool request parsed from an oracle reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(rename = "name", alias = "tool_name", alias = "tool")]
    pub tool_name: String,
    #[serde(default, alias = "args", alias = "input")]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool execution, fed back into the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub payload: String,
}

impl ToolResult {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            success: true,
            payload: payload.into(),
        }
    }

    pub fn failure(payload: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: payload.into(),
        }
    }
}

/// A callable operation the oracle may request.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the oracle refers to the tool by.
    fn name(&self) -> &str;

    /// Natural-language description shown to the oracle.
    fn description(&self) -> &str;

    /// Ordered input schema.
    fn params(&self) -> Vec<ParamSpec>;

    /// Run with arguments already validated against [`Tool::params`].
    async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            params: self.params(),
        }
    }
}

/// Fetch a validated string argument.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Execution(format!("Missing '{}' argument", name)))
}

/// An invocation that has passed name and schema checks.
pub struct ResolvedCall<'a> {
    tool: &'a Arc<dyn Tool>,
    args: Map<String, Value>,
}

impl ResolvedCall<'_> {
    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    /// Execute the tool. Never fails: errors become unsuccessful results.
    pub async fn execute(self) -> ToolResult {
        match self.tool.execute(&self.args).await {
            Ok(output) => ToolResult::ok(output),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", self.tool.name(), e);
                ToolResult::failure(e.to_string())
            }
        }
    }
}

/// Fixed set of tools available to the agent.
#[derive(Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four built-in tools.
    pub fn with_default_tools(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(WebSearch::new(config.search_timeout)))?;
        registry.register(Arc::new(SaveText::new(config.log_output_dir.clone())))?;
        registry.register(Arc::new(
            GraphFromExcel::new(config.chart_output_dir.clone())
                .with_font(config.chart_font.clone()),
        ))?;
        registry.register(Arc::new(ExcelMetadata))?;
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let descriptor = tool.descriptor();
        if self.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }

        self.by_name
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        self.tools.push(tool);
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn describe_all(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look up the tool and validate its arguments.
    pub fn resolve(&self, invocation: &ToolInvocation) -> Result<ResolvedCall<'_>, DispatchError> {
        let index = *self
            .by_name
            .get(&invocation.tool_name)
            .ok_or_else(|| DispatchError::UnknownTool(invocation.tool_name.clone()))?;

        let args = self.descriptors[index]
            .validate(&invocation.arguments)
            .map_err(|source| DispatchError::InvalidArguments {
                tool: invocation.tool_name.clone(),
                source,
            })?;

        Ok(ResolvedCall {
            tool: &self.tools[index],
            args,
        })
    }
}
