use std::collections::VecDeque;
use std::env;

use async_trait::async_trait;
use bytes::Bytes;
use confab_common::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::json;

use super::{
    ChatRole, LlmProvider, ModelRequest, ModelResponse, StreamEvent, ToolCallRequest, Usage,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";

pub struct GeminiProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("GOOGLE_API_KEY"))
            .map_err(|_| Error::Config("GEMINI_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    fn endpoint(&self, request: &ModelRequest, action: &str) -> String {
        let model = if request.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &request.model
        };
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, action, self.api_key
        )
    }

    fn build_request_body(&self, request: &ModelRequest) -> Result<serde_json::Value> {
        let mut contents = Vec::new();

        for msg in &request.messages {
            let content = match msg.role {
                ChatRole::User => json!({
                    "role": "user",
                    "parts": [{"text": msg.content}]
                }),
                ChatRole::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({"text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        parts.push(json!({
                            "functionCall": {
                                "name": call.name,
                                "args": call.arguments,
                            }
                        }));
                    }
                    // An empty assistant turn has no wire representation;
                    // skip it so a resumed thread stays sendable.
                    if parts.is_empty() {
                        continue;
                    }
                    json!({"role": "model", "parts": parts})
                }
                ChatRole::Tool => {
                    let name = msg.tool_name.as_deref().ok_or_else(|| {
                        Error::Model("tool message is missing its tool name".to_string())
                    })?;
                    // Tool results are stored as JSON text; fall back to a
                    // plain wrapper when the payload is not valid JSON.
                    let response: serde_json::Value = serde_json::from_str(&msg.content)
                        .unwrap_or_else(|_| json!({"content": msg.content}));
                    json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {"name": name, "response": response}
                        }]
                    })
                }
            };
            contents.push(content);
        }

        let mut body = json!({"contents": contents});

        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        if !request.tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": request.tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })).collect::<Vec<_>>()
            }]);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["generationConfig"] = json!({"maxOutputTokens": max_tokens});
        }

        Ok(body)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = self.build_request_body(request)?;

        let response = self
            .client
            .post(self.endpoint(request, "generateContent"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(format!("network error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!(
                "Gemini API error ({status}): {error_text}"
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("invalid response body: {e}")))?;

        let candidate = raw["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| Error::Model("no candidates in response".to_string()))?;

        let (text, tool_calls) = collect_parts(&candidate["content"]["parts"]);

        let usage = raw["usageMetadata"].as_object().map(|u| Usage {
            input_tokens: u["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ModelResponse {
            text,
            tool_calls,
            usage,
        })
    }

    async fn stream(
        &self,
        request: &ModelRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_request_body(request)?;
        let url = format!("{}&alt=sse", self.endpoint(request, "streamGenerateContent"));

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(format!("network error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!(
                "Gemini API error ({status}): {error_text}"
            )));
        }

        let bytes = response.bytes_stream().boxed();
        let state = SseState {
            bytes,
            buffer: Vec::new(),
            pending: VecDeque::new(),
        };

        let s = stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }

                if let Some(i) = state.buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = state.buffer.drain(0..=i).collect();
                    let line = String::from_utf8_lossy(&line_bytes).trim().to_string();

                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) {
                            if let Some(candidate) =
                                chunk["candidates"].as_array().and_then(|c| c.first())
                            {
                                let (text, calls) =
                                    collect_parts(&candidate["content"]["parts"]);
                                if !text.is_empty() {
                                    state.pending.push_back(StreamEvent::TextDelta(text));
                                }
                                for call in calls {
                                    state.pending.push_back(StreamEvent::ToolCall(call));
                                }
                            }
                        }
                    }
                    continue;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Err(Error::Model(format!("network error: {e}"))),
                    None => return Ok(None),
                }
            }
        });

        Ok(Box::pin(s))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        match self.client.get(url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    pending: VecDeque<StreamEvent>,
}

/// Split a candidate's parts into concatenated text and function calls.
/// Gemini does not assign call ids, so one is minted per call for the
/// request/result pairing in persisted history.
fn collect_parts(parts: &serde_json::Value) -> (String, Vec<ToolCallRequest>) {
    let mut text = String::new();
    let mut calls = Vec::new();

    if let Some(parts) = parts.as_array() {
        for part in parts {
            if let Some(t) = part["text"].as_str() {
                text.push_str(t);
            }
            if let Some(call) = part["functionCall"].as_object() {
                calls.push(ToolCallRequest {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: call
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call.get("args").cloned().unwrap_or(json!({})),
                });
            }
        }
    }

    (text, calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn request_body_maps_roles_and_tool_results() {
        let provider = GeminiProvider::new("test-key".to_string());
        let request = ModelRequest {
            model: String::new(),
            messages: vec![
                ChatMessage::user("What is 12 / 4?"),
                ChatMessage::tool_request(
                    "",
                    vec![ToolCallRequest {
                        id: "c1".to_string(),
                        name: "calculator".to_string(),
                        arguments: json!({"first_num": 12.0, "second_num": 4.0, "operation": "div"}),
                    }],
                ),
                ChatMessage::tool_result("calculator", &json!({"result": 3.0})),
            ],
            system: Some("Be brief.".to_string()),
            max_tokens: Some(256),
            tools: vec![],
        };

        let body = provider.build_request_body(&request).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            contents[1]["parts"][0]["functionCall"]["name"],
            "calculator"
        );
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["result"],
            3.0
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn empty_assistant_message_is_skipped() {
        let provider = GeminiProvider::new("test-key".to_string());
        let request = ModelRequest {
            model: String::new(),
            messages: vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant(""),
                ChatMessage::user("still there?"),
            ],
            system: None,
            max_tokens: None,
            tools: vec![],
        };

        let body = provider.build_request_body(&request).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "user");
    }

    #[test]
    fn collect_parts_splits_text_and_calls() {
        let parts = json!([
            {"text": "Let me check."},
            {"functionCall": {"name": "get_weather", "args": {"place": "Lisbon"}}}
        ]);

        let (text, calls) = collect_parts(&parts);
        assert_eq!(text, "Let me check.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments["place"], "Lisbon");
        assert!(!calls[0].id.is_empty());
    }
}
