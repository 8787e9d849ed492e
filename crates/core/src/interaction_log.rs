mod sink;

pub use sink::{HttpFallbackSink, LogSink, NullSink, RestSink, SinkError};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

pub const BATCH_SIZE: usize = 10;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    UserMessage,
    AssistantResponse,
    ToolCall,
    ToolResponse,
    AudioInput,
    AudioOutput,
    SessionStart,
    SessionEnd,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionLogEntry {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub interaction_type: InteractionType,
    pub content: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InteractionLogEntry {
    pub fn new(session_id: &str, interaction_type: InteractionType, content: Value) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: None,
            interaction_type,
            content,
            metadata: json!({ "timestamp": Utc::now().timestamp_millis() }),
            timestamp: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Merges the fields of `extra` into the metadata object.
    pub fn with_metadata(mut self, extra: Value) -> Self {
        match (&mut self.metadata, extra) {
            (Value::Object(metadata), Value::Object(extra)) => metadata.extend(extra),
            (_, Value::Null) => {}
            (metadata, extra) => *metadata = extra,
        }
        self
    }

    pub fn session_start(session_id: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::SessionStart,
            json!({ "event": "session_started" }),
        )
    }

    pub fn session_end(session_id: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::SessionEnd,
            json!({ "event": "session_ended" }),
        )
    }

    pub fn user_message(session_id: &str, text: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::UserMessage,
            json!({ "text": text, "length": text.chars().count() }),
        )
    }

    pub fn assistant_response(session_id: &str, text: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::AssistantResponse,
            json!({ "text": text, "length": text.chars().count() }),
        )
    }

    pub fn audio_input(session_id: &str, duration_ms: u64, size_bytes: usize) -> Self {
        Self::new(
            session_id,
            InteractionType::AudioInput,
            json!({ "audio_duration_ms": duration_ms, "audio_size_bytes": size_bytes }),
        )
    }

    pub fn audio_output(session_id: &str, duration_ms: u64, size_bytes: usize) -> Self {
        Self::new(
            session_id,
            InteractionType::AudioOutput,
            json!({ "audio_duration_ms": duration_ms, "audio_size_bytes": size_bytes }),
        )
    }

    pub fn tool_call(session_id: &str, name: &str, args: &Value, call_id: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::ToolCall,
            json!({ "function_name": name, "arguments": args, "call_id": call_id }),
        )
    }

    pub fn tool_response(session_id: &str, response: &Value, success: bool, call_id: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::ToolResponse,
            json!({ "response": response, "success": success, "call_id": call_id }),
        )
    }

    pub fn error(session_id: &str, message: &str, error_type: &str) -> Self {
        Self::new(
            session_id,
            InteractionType::Error,
            json!({ "error_message": message, "error_type": error_type }),
        )
    }
}

#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    /// Multiplied by the attempt number between primary attempts.
    pub retry_delay: Duration,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            flush_interval: FLUSH_INTERVAL,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// Another flush holds the queue.
    Busy,
    Primary(usize),
    Fallback(usize),
    /// Both transports failed; the batch is back at the front of the queue.
    Requeued(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub is_processing: bool,
}

struct Shared {
    queue: Mutex<VecDeque<InteractionLogEntry>>,
    processing: AtomicBool,
    wake: Notify,
    primary: Arc<dyn LogSink>,
    fallback: Arc<dyn LogSink>,
    options: LoggerOptions,
}

/// Releases the in-progress flag on every exit path.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<InteractionLogEntry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Option<ProcessingGuard<'_>> {
        if self.processing.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(ProcessingGuard(&self.processing))
        }
    }

    fn requeue(&self, batch: Vec<InteractionLogEntry>) {
        let mut queue = self.queue();
        for entry in batch.into_iter().rev() {
            queue.push_front(entry);
        }
    }

    async fn flush(&self) -> FlushOutcome {
        let Some(_guard) = self.begin() else {
            return FlushOutcome::Busy;
        };
        let batch: Vec<InteractionLogEntry> = self.queue().drain(..).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let attempts = self.options.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.primary.insert(&batch).await {
                Ok(()) => {
                    tracing::debug!("flushed {} interaction logs to {}", batch.len(), self.primary.name());
                    return FlushOutcome::Primary(batch.len());
                }
                Err(e) => {
                    tracing::error!(
                        "failed to flush logs (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_delay * attempt).await;
                    }
                }
            }
        }

        match self.fallback.insert(&batch).await {
            Ok(()) => {
                tracing::info!("flushed {} logs via {}", batch.len(), self.fallback.name());
                FlushOutcome::Fallback(batch.len())
            }
            Err(e) => {
                tracing::error!("fallback {} failed, logs re-queued: {}", self.fallback.name(), e);
                let count = batch.len();
                self.requeue(batch);
                FlushOutcome::Requeued(count)
            }
        }
    }
}

/// Batched, non-blocking audit log.
///
/// Cloning yields another handle to the same queue. A timer task flushes every
/// `flush_interval`, and reaching `batch_size` queued entries flushes early.
#[derive(Clone)]
pub struct InteractionLogger {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl InteractionLogger {
    /// Spawns the flush task; must be called inside a tokio runtime.
    pub fn start(
        primary: Arc<dyn LogSink>,
        fallback: Arc<dyn LogSink>,
        options: LoggerOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            wake: Notify::new(),
            primary,
            fallback,
            options,
        });
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            let period = task_shared.options.flush_interval;
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = task_shared.wake.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }
                task_shared.flush().await;
            }
            tracing::debug!("interaction log flush task stopped");
        });

        Self {
            shared,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// A logger that accepts entries and drops them on flush.
    pub fn disabled() -> Self {
        Self::start(Arc::new(NullSink), Arc::new(NullSink), LoggerOptions::default())
    }

    /// Queues `entry` and returns immediately.
    pub fn log(&self, mut entry: InteractionLogEntry) {
        if entry.session_id.is_empty() {
            tracing::warn!("invalid log entry without a session id: {:?}", entry.interaction_type);
            return;
        }
        entry.timestamp.get_or_insert_with(Utc::now);

        let len = {
            let mut queue = self.shared.queue();
            queue.push_back(entry);
            queue.len()
        };
        if len >= self.shared.options.batch_size {
            self.shared.wake.notify_one();
        }
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Flushes, then hands anything still queued straight to the fallback sink.
    pub async fn force_flush(&self) -> FlushOutcome {
        let outcome = self.shared.flush().await;

        let Some(_guard) = self.shared.begin() else {
            return outcome;
        };
        let rest: Vec<InteractionLogEntry> = self.shared.queue().drain(..).collect();
        if rest.is_empty() {
            return outcome;
        }
        match self.shared.fallback.insert(&rest).await {
            Ok(()) => FlushOutcome::Fallback(rest.len()),
            Err(e) => {
                tracing::error!("forced flush failed, {} logs re-queued: {}", rest.len(), e);
                let count = rest.len();
                self.shared.requeue(rest);
                FlushOutcome::Requeued(count)
            }
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_size: self.shared.queue().len(),
            is_processing: self.shared.processing.load(Ordering::Acquire),
        }
    }

    /// Stops the timer and makes a final, time-bounded attempt to deliver the queue.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, self.force_flush())
            .await
            .is_err()
        {
            tracing::warn!(
                "final flush timed out with {} logs queued",
                self.queue_status().queue_size
            );
        }
    }
}
