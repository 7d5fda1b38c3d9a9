use std::sync::Arc;

use confab_common::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::providers::{
    ChatMessage, LlmProvider, ModelRequest, ModelResponse, StreamEvent, ToolCallRequest,
    ToolDefinition,
};

/// One model turn: either a final answer or a request to run tools.
#[derive(Debug, Clone)]
pub enum AssistantOutput {
    Final {
        text: String,
    },
    /// `text` is any preamble the model produced alongside the calls.
    ToolCalls {
        text: String,
        calls: Vec<ToolCallRequest>,
    },
}

/// Thin wrapper over an [`LlmProvider`] that turns raw model responses into
/// the tagged [`AssistantOutput`] the session loop branches on. Holds no
/// conversation state; the caller owns history.
pub struct TurnEngine {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
}

impl TurnEngine {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: String::new(),
            system_prompt: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn request(&self, history: &[ChatMessage], tools: &[ToolDefinition]) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages: history.to_vec(),
            system: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            tools: tools.to_vec(),
        }
    }

    /// Ask the model for the next assistant output given the full history.
    pub async fn respond(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantOutput> {
        let response = self.provider.complete(&self.request(history, tools)).await?;
        Ok(into_output(response))
    }

    /// Streaming variant: text deltas are forwarded through `delta_tx` as
    /// they arrive. Falls back to the non-streaming call when the provider
    /// cannot stream, sending the final text as a single delta.
    pub async fn respond_streaming(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
        delta_tx: mpsc::Sender<String>,
    ) -> Result<AssistantOutput> {
        let request = self.request(history, tools);

        let mut stream = match self.provider.stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "streaming failed for provider '{}', falling back to non-streaming: {e}",
                    self.provider.provider_id()
                );
                let response = self.provider.complete(&request).await?;
                let output = into_output(response);
                if let AssistantOutput::Final { text } = &output {
                    let _ = delta_tx.send(text.clone()).await;
                }
                return Ok(output);
            }
        };

        let mut text = String::new();
        let mut calls = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    let _ = delta_tx.send(delta).await;
                }
                StreamEvent::ToolCall(call) => calls.push(call),
            }
        }

        if calls.is_empty() {
            Ok(AssistantOutput::Final { text })
        } else {
            Ok(AssistantOutput::ToolCalls { text, calls })
        }
    }

    /// Derive a short display name for a thread from its opening messages.
    pub async fn title(&self, history: &[ChatMessage]) -> Result<String> {
        let snippet = history
            .iter()
            .take(3)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Generate a short, catchy title for this conversation (max 5 words):\n{snippet}"
        );

        let request = ModelRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            system: None,
            max_tokens: self.max_tokens,
            tools: Vec::new(),
        };

        let response = self.provider.complete(&request).await?;
        Ok(response.text.trim().to_string())
    }
}

fn into_output(response: ModelResponse) -> AssistantOutput {
    if response.tool_calls.is_empty() {
        AssistantOutput::Final {
            text: response.text,
        }
    } else {
        AssistantOutput::ToolCalls {
            text: response.text,
            calls: response.tool_calls,
        }
    }
}
