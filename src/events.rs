//! Lifecycle events emitted while a run progresses.
//!
//! A run hands its caller an [`EventStream`]; every listener-style concern
//! (console logging, metrics, tests) consumes that one typed stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::dispatch::Batch;
use crate::error::QuotaError;
use crate::report::{Completion, FailureRecord};
use crate::transport::SendReceipt;

/// One step of a run.
#[derive(Debug)]
pub enum Event {
    /// The quota could not be fetched; nothing was sent.
    QuotaError(QuotaError),
    /// A list begins.
    Start {
        list_id: String,
        recipients: usize,
        started_at: DateTime<Utc>,
    },
    /// A pacing window begins.
    Batch(Batch),
    /// One recipient was accepted by the transport.
    Sent {
        list_id: String,
        recipient: String,
        elapsed: Duration,
        receipt: SendReceipt,
    },
    /// One recipient failed.
    Error {
        list_id: String,
        failure: FailureRecord,
    },
    /// A list finished; carries the full report.
    Complete(Arc<Completion>),
    /// The queue is exhausted.
    Finish,
}

impl Event {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QuotaError(_) => "quota.error",
            Self::Start { .. } => "start",
            Self::Batch(_) => "batch",
            Self::Sent { .. } => "sent",
            Self::Error { .. } => "error",
            Self::Complete(_) => "complete",
            Self::Finish => "finish",
        }
    }

    /// The list this event belongs to, if any.
    pub fn list_id(&self) -> Option<&str> {
        match self {
            Self::Start { list_id, .. } | Self::Sent { list_id, .. } | Self::Error { list_id, .. } => {
                Some(list_id.as_str())
            }
            Self::Batch(batch) => Some(batch.list_id.as_str()),
            Self::Complete(completion) => Some(completion.list.id.as_str()),
            Self::QuotaError(_) | Self::Finish => None,
        }
    }
}

/// Stream of run events. Ends after `finish`, or after `quota.error`.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Producer side of a run's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        // A dropped stream means nobody is listening; the run still completes.
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(event = e.0.name(), "Event stream closed, dropping event");
        }
    }
}

/// Create a connected sink and stream.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, Box::pin(UnboundedReceiverStream::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut stream) = channel();
        sink.emit(Event::Start {
            list_id: "weekly".into(),
            recipients: 2,
            started_at: Utc::now(),
        });
        sink.emit(Event::Finish);
        drop(sink);

        let first = stream.next().await.unwrap();
        assert_eq!(first.name(), "start");
        assert_eq!(first.list_id(), Some("weekly"));
        assert_eq!(stream.next().await.unwrap().name(), "finish");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn emit_after_stream_dropped_is_harmless() {
        let (sink, stream) = channel();
        drop(stream);
        sink.emit(Event::Finish);
    }
}
