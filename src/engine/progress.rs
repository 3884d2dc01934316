//! # Progress Module
//!
//! Events emitted by a run and the stream that delivers them. Every run ends
//! with either a `TASK_COMPLETE` event or the natural end of the stream.

use crate::engine::context::TaskState;
use crate::engine::error::{ErrorInfo, codes};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Kind of state transition an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressType {
    TaskInit,
    NodeStart,
    ConditionCheck,
    NodeSkip,
    NodeProgress,
    NodeRetry,
    Compensation,
    NodeComplete,
    NodeError,
    TaskComplete,
}

/// Immutable snapshot emitted at each state transition of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub request_id: String,
    pub task_key: String,
    pub node_key: String,
    #[serde(rename = "type")]
    pub progress_type: ProgressType,
    pub state: TaskState,
    pub node_index: usize,
    pub total_nodes: usize,
    /// Aggregate progress, 0-100
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    /// Context map at the time of the event
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ProgressData {
    /// The single event of a run whose task key is not registered
    pub fn task_not_found(request_id: &str, task_key: &str, context: Map<String, Value>) -> Self {
        Self::not_started(
            request_id,
            task_key,
            context,
            ErrorInfo::new(codes::TASK_NOT_FOUND, format!("Task not found: {task_key}"), false),
        )
    }

    /// The single event of a run started outside a Tokio runtime
    pub fn runtime_unavailable(
        request_id: &str,
        task_key: &str,
        context: Map<String, Value>,
        reason: impl Into<String>,
    ) -> Self {
        Self::not_started(
            request_id,
            task_key,
            context,
            ErrorInfo::new(codes::RUNTIME_UNAVAILABLE, reason, false),
        )
    }

    fn not_started(
        request_id: &str,
        task_key: &str,
        context: Map<String, Value>,
        error: ErrorInfo,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            task_key: task_key.to_string(),
            node_key: task_key.to_string(),
            progress_type: ProgressType::NodeError,
            state: TaskState::PartialFailed,
            node_index: 0,
            total_nodes: 0,
            progress: 0,
            timestamp: Utc::now(),
            context: Value::Object(context),
            payload: None,
            error: Some(error),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn is_task_complete(&self) -> bool {
        self.progress_type == ProgressType::TaskComplete
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Stream of progress events for one run
///
/// Dropping the stream cancels the run.
pub struct ProgressStream {
    request_id: String,
    inner: UnboundedReceiverStream<ProgressData>,
    cancellation: CancellationToken,
    _guard: DropGuard,
}

impl ProgressStream {
    pub(crate) fn new(
        request_id: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<ProgressData>,
        cancellation: CancellationToken,
    ) -> Self {
        let guard = cancellation.clone().drop_guard();
        Self {
            request_id: request_id.into(),
            inner: UnboundedReceiverStream::new(receiver),
            cancellation,
            _guard: guard,
        }
    }

    /// A stream that yields `events` and then ends
    pub(crate) fn from_events(request_id: &str, events: Vec<ProgressData>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        for event in events {
            let _ = sender.send(event);
        }
        Self::new(request_id, receiver, CancellationToken::new())
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Request cancellation of the run; pending adapter calls see the signal
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Drain the stream and return the last event
    pub async fn finish(mut self) -> Option<ProgressData> {
        use futures::StreamExt;

        let mut last = None;
        while let Some(event) = self.next().await {
            last = Some(event);
        }
        last
    }
}

impl Stream for ProgressStream {
    type Item = ProgressData;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
