use async_trait::async_trait;
use confab_common::Result;

pub mod calculator;
pub mod search;
pub mod weather;

pub use calculator::Calculator;
pub use search::SearchTool;
pub use weather::WeatherTool;

/// A named, schema-typed capability the model may ask to have executed.
///
/// Expected failures (bad arguments, division by zero, upstream API errors)
/// come back as `ToolOutput::error` payloads so the model can react to them;
/// `Err` is reserved for failures the turn cannot recover from, such as a
/// missing credential (`Error::Config`).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the tool's input, surfaced to the model.
    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Per-invocation context handed to tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub thread_id: String,
}

/// Structured result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: serde_json::Value,
}

impl ToolOutput {
    pub fn ok(content: serde_json::Value) -> Self {
        Self { content }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            content: serde_json::json!({"error": reason.into()}),
        }
    }

    pub fn is_error(&self) -> bool {
        self.content.get("error").is_some()
    }
}
