pub mod engine;
pub mod providers;
pub mod session;
pub mod tools;

pub use engine::{AssistantOutput, TurnEngine};
pub use providers::{
    ChatMessage, ChatRole, GeminiProvider, LlmProvider, ModelRequest, ModelResponse, StreamEvent,
    ToolCallRequest, ToolDefinition, Usage,
};
pub use session::{SessionController, SessionEvent};
