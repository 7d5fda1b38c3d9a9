use std::sync::Arc;

use confab_common::{Error, Result};
use confab_db::{StoredMessage, ThreadStore, ThreadSummary};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

use crate::engine::{AssistantOutput, TurnEngine};
use crate::providers::{ChatMessage, ChatRole, ToolDefinition};
use crate::tools::{Tool, ToolContext, ToolOutput};

/// Maximum number of tool-use round-trips before the loop is forcibly stopped.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Incremental view over a turn, surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TextDelta(String),
    ToolStarted { name: String },
}

/// Drives full user turns against durable threads.
///
/// The per-turn state machine: ask the model; if it requests tools, run each
/// one and feed the results back; repeat until a final answer. Every message
/// is persisted the moment it exists, so an abandoned turn leaves a
/// partial-but-consistent history rather than a torn one.
pub struct SessionController {
    engine: TurnEngine,
    tools: Vec<Box<dyn Tool>>,
    store: Arc<Mutex<ThreadStore>>,
}

impl SessionController {
    pub fn new(engine: TurnEngine, store: Arc<Mutex<ThreadStore>>) -> Self {
        Self {
            engine,
            tools: Vec::new(),
            store,
        }
    }

    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        info!("registered tool: {}", tool.name());
        self.tools.push(tool);
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Mint a fresh thread id. The thread itself is created lazily by the
    /// first persisted message.
    pub fn new_thread(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        self.store.lock().await.list_threads()
    }

    /// Load the full ordered history of a thread. Unknown ids yield an
    /// empty history.
    pub async fn load(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let snapshot = self.store.lock().await.snapshot(thread_id)?;
        snapshot.messages.iter().map(from_stored).collect()
    }

    async fn persist(&self, thread_id: &str, message: &ChatMessage) -> Result<()> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&message.tool_calls)?)
        };

        self.store.lock().await.append_message(
            thread_id,
            message.role.as_str(),
            &message.content,
            message.tool_name.as_deref(),
            tool_calls.as_ref(),
            chrono::Utc::now(),
        )
    }

    /// Process one full user turn and return the final assistant text.
    ///
    /// Text deltas and tool-start notices are emitted on `events` when a
    /// channel is supplied. A model failure aborts the turn; nothing of the
    /// failed assistant response is persisted.
    #[instrument(skip(self, user_text, events), fields(thread_id = %thread_id))]
    pub async fn send(
        &self,
        thread_id: &str,
        user_text: &str,
        events: Option<mpsc::Sender<SessionEvent>>,
    ) -> Result<String> {
        let snapshot = self.store.lock().await.snapshot(thread_id)?;
        let first_turn = snapshot.messages.is_empty();
        let named = snapshot.name.is_some();

        let mut history: Vec<ChatMessage> = snapshot
            .messages
            .iter()
            .map(from_stored)
            .collect::<Result<_>>()?;

        let user_message = ChatMessage::user(user_text);
        self.persist(thread_id, &user_message).await?;
        history.push(user_message);

        let tool_defs = self.tool_definitions();

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let output = self.next_output(&history, &tool_defs, &events).await?;

            match output {
                AssistantOutput::Final { text } => {
                    let message = ChatMessage::assistant(&text);
                    self.persist(thread_id, &message).await?;
                    history.push(message);

                    if first_turn && !named {
                        self.name_thread(thread_id, &history).await;
                    }
                    return Ok(text);
                }
                AssistantOutput::ToolCalls { text, calls } => {
                    let message = ChatMessage::tool_request(text, calls.clone());
                    self.persist(thread_id, &message).await?;
                    history.push(message);

                    let context = ToolContext {
                        thread_id: thread_id.to_string(),
                    };
                    for call in &calls {
                        if let Some(tx) = &events {
                            let _ = tx
                                .send(SessionEvent::ToolStarted {
                                    name: call.name.clone(),
                                })
                                .await;
                        }

                        let output = match self.find_tool(&call.name) {
                            Some(tool) => {
                                match tool.execute(&context, call.arguments.clone()).await {
                                    Ok(output) => output,
                                    // A missing credential is not something
                                    // the model can talk its way around.
                                    Err(e @ Error::Config(_)) => return Err(e),
                                    Err(e) => ToolOutput::error(e.to_string()),
                                }
                            }
                            None => ToolOutput::error(format!("unknown tool: {}", call.name)),
                        };

                        let message = ChatMessage::tool_result(&call.name, &output.content);
                        self.persist(thread_id, &message).await?;
                        history.push(message);
                    }
                }
            }
        }

        Err(Error::Agent(format!(
            "tool loop exceeded maximum of {MAX_TOOL_ITERATIONS} iterations"
        )))
    }

    async fn next_output(
        &self,
        history: &[ChatMessage],
        tool_defs: &[ToolDefinition],
        events: &Option<mpsc::Sender<SessionEvent>>,
    ) -> Result<AssistantOutput> {
        match events {
            Some(tx) => {
                let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
                let tx = tx.clone();
                let forward = tokio::spawn(async move {
                    while let Some(delta) = delta_rx.recv().await {
                        let _ = tx.send(SessionEvent::TextDelta(delta)).await;
                    }
                });

                let output = self
                    .engine
                    .respond_streaming(history, tool_defs, delta_tx)
                    .await;
                let _ = forward.await;
                output
            }
            None => self.engine.respond(history, tool_defs).await,
        }
    }

    /// Best-effort: a failed title generation never fails the turn.
    async fn name_thread(&self, thread_id: &str, history: &[ChatMessage]) {
        match self.engine.title(history).await {
            Ok(name) if !name.is_empty() => {
                if let Err(e) = self.store.lock().await.set_name_once(thread_id, &name) {
                    warn!("failed to persist thread name: {e}");
                }
            }
            Ok(_) => warn!("model produced an empty thread name, skipping"),
            Err(e) => warn!("thread naming failed: {e}"),
        }
    }
}

fn from_stored(stored: &StoredMessage) -> Result<ChatMessage> {
    let role = ChatRole::parse(&stored.role)
        .ok_or_else(|| Error::Database(format!("unknown message role '{}'", stored.role)))?;

    let tool_calls = match &stored.tool_calls {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };

    Ok(ChatMessage {
        role,
        content: stored.content.clone(),
        tool_name: stored.tool_name.clone(),
        tool_calls,
    })
}
