pub mod navigation;
pub mod reports;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use gemini_live_types::tools::{
    FunctionCall, FunctionDeclaration, FunctionResponse, Tool, ToolCall, ToolCallCancellation,
    ToolResponse,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::interaction_log::{InteractionLogEntry, InteractionLogger};
use crate::realtime_api::LiveApi;

pub use navigation::{InfoType, Section, SectionMode, UiCommand};
pub use reports::{InMemoryReportStore, JsonFileReportStore, Report, ReportError, ReportStore};

/// A function the model may call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> FunctionDeclaration;

    async fn call(&self, args: Value) -> Result<Value>;
}

/// Handlers keyed by function name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!("tool {} registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Everything registered, as the single tool group sent in the setup message.
    pub fn tools(&self) -> Vec<Tool> {
        if self.handlers.is_empty() {
            return Vec::new();
        }
        vec![Tool {
            function_declarations: self.handlers.values().map(|h| h.declaration()).collect(),
        }]
    }
}

/// The product's tool set: report generation and retrieval plus page navigation.
pub fn builtin_registry(store: Arc<dyn ReportStore>, ui: mpsc::Sender<UiCommand>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(reports::GenerateReport::new(store.clone())));
    registry.register(Arc::new(reports::ListReports::new(store.clone())));
    registry.register(Arc::new(reports::GetReport::new(store.clone())));
    registry.register(Arc::new(reports::UpdateReport::new(store)));
    registry.register(Arc::new(navigation::ScrollToSection::new(ui.clone())));
    registry.register(Arc::new(navigation::SwitchSectionMode::new(ui.clone())));
    registry.register(Arc::new(navigation::CollectUserInfo::new(ui)));
    registry
}

pub fn success(result: Value) -> Value {
    json!({ "success": true, "result": result })
}

pub fn failure(error: &str) -> Value {
    json!({ "success": false, "error": error })
}

/// Answers every function call with exactly one response carrying the same id.
#[derive(Clone)]
pub struct ToolCallDispatcher {
    registry: Arc<ToolRegistry>,
    live: Arc<dyn LiveApi>,
    logger: InteractionLogger,
    session_id: String,
}

impl ToolCallDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        live: Arc<dyn LiveApi>,
        logger: InteractionLogger,
        session_id: &str,
    ) -> Self {
        Self {
            registry,
            live,
            logger,
            session_id: session_id.to_string(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs each call, then sends one tool response for the whole batch.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let function_responses = join_all(call.function_calls.iter().map(|c| self.execute(c))).await;
        let response = ToolResponse { function_responses };

        if !self.live.send_tool_response(response.clone()).await {
            tracing::warn!(
                "tool response for {} call(s) dropped, connection is gone",
                response.function_responses.len()
            );
        }
        response
    }

    async fn execute(&self, call: &FunctionCall) -> FunctionResponse {
        tracing::info!("tool call {} ({})", call.name, call.id);
        self.logger.log(InteractionLogEntry::tool_call(
            &self.session_id,
            &call.name,
            &call.args,
            &call.id,
        ));

        let payload = match self.registry.get(&call.name) {
            None => {
                tracing::warn!("no handler for tool {}", call.name);
                failure(&format!("unknown tool: {}", call.name))
            }
            Some(handler) => {
                let outcome = AssertUnwindSafe(handler.call(call.args.clone()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(result)) => success(result),
                    Ok(Err(e)) => {
                        tracing::error!("tool {} failed: {:#}", call.name, e);
                        failure(&format!("{:#}", e))
                    }
                    Err(_) => {
                        tracing::error!("tool {} panicked", call.name);
                        failure("tool handler panicked")
                    }
                }
            }
        };

        let succeeded = payload["success"].as_bool().unwrap_or(false);
        self.logger.log(InteractionLogEntry::tool_response(
            &self.session_id,
            &payload,
            succeeded,
            &call.id,
        ));

        FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: payload,
        }
    }

    /// The server withdrew calls; handlers already running finish but their result is moot.
    pub fn cancel(&self, cancellation: &ToolCallCancellation) {
        for id in &cancellation.ids {
            tracing::info!("tool call {} cancelled by server", id);
        }
        self.logger.log(
            InteractionLogEntry::error(
                &self.session_id,
                &format!("tool calls cancelled: {}", cancellation.ids.join(", ")),
                "ToolCallCancellation",
            )
            .with_metadata(json!({ "call_ids": cancellation.ids })),
        );
    }
}
