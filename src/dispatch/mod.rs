//! Batch dispatcher — paces one list through the transport.
//!
//! The list is cut into windows of at most `rate_ceiling` recipients. Each
//! window's sends are spawned at once, and the next window starts one pacing
//! interval after this one, whether or not its sends have resolved. Pacing
//! bounds the outbound call rate; response latency never slows it down.
//!
//! Outcomes flow to the [`tracker`], which owns the report and decides when
//! the list is complete.

pub mod scheduler;
pub(crate) mod tracker;

pub use scheduler::{Scheduler, TokioScheduler};
pub use tracker::Outcome;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::TransportError;
use crate::events::{Event, EventSink};
use crate::list::RecipientList;
use crate::report::Completion;
use crate::transport::{Envelope, SendReceipt, Transport};
use tracker::{Signal, Tracker};

/// One pacing window of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub list_id: String,
    /// 1-based.
    pub iteration: usize,
    /// Expected number of windows for the list. Advisory.
    pub cycle: usize,
    pub recipients: Vec<String>,
}

/// `ceil(recipients / rate_ceiling)`, at least 1.
pub fn cycle_count(recipients: usize, rate_ceiling: usize) -> usize {
    recipients.div_ceil(rate_ceiling.max(1)).max(1)
}

/// Dispatches lists through a transport, one pacing window at a time.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    events: EventSink,
    send_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            scheduler,
            events,
            send_timeout: None,
        }
    }

    /// Resolve sends that take longer than `timeout` as failures.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Deliver `list` and wait for its completion.
    ///
    /// Emits `start`, one `batch` per window, `sent`/`error` per recipient and
    /// finally `complete`. Returns the completion carried by `complete`.
    pub async fn dispatch(&self, mut list: RecipientList) -> Option<Arc<Completion>> {
        let total = list.pending();
        let cycle = cycle_count(total, list.rate_ceiling());
        let envelope = Arc::new(Envelope::from(&list));

        let tracker = Tracker::new(&list, self.events.clone());
        self.events.emit(Event::Start {
            list_id: list.id.clone(),
            recipients: total,
            started_at: tracker.report().start,
        });
        info!(
            list_id = %list.id,
            recipients = total,
            rate_ceiling = list.rate_ceiling(),
            transport = self.transport.name(),
            "Starting list"
        );

        let (signals, rx) = mpsc::unbounded_channel();
        let tracking = tokio::spawn(tracker::run(tracker, rx));

        let mut iteration = 0;
        loop {
            let recipients = list.take_batch();
            if recipients.is_empty() {
                break;
            }
            iteration += 1;

            debug!(list_id = %list.id, iteration, cycle, size = recipients.len(), "Batch started");
            self.events.emit(Event::Batch(Batch {
                list_id: list.id.clone(),
                iteration,
                cycle,
                recipients: recipients.clone(),
            }));

            for recipient in recipients {
                self.spawn_send(Arc::clone(&envelope), recipient, signals.clone());
            }

            if list.pending() == 0 {
                break;
            }
            self.scheduler.wait(list.batch_interval()).await;
        }

        // The tracker holds the receiver until completion, so this cannot fail.
        let _ = signals.send(Signal::Drained(list));
        drop(signals);

        match tracking.await {
            Ok(completion) => completion,
            Err(e) => {
                error!("Completion tracker failed: {e}");
                None
            }
        }
    }

    fn spawn_send(
        &self,
        envelope: Arc<Envelope>,
        recipient: String,
        signals: mpsc::UnboundedSender<Signal>,
    ) {
        let transport = Arc::clone(&self.transport);
        let send_timeout = self.send_timeout;

        tokio::spawn(async move {
            let start = Instant::now();
            let to = recipient.clone();
            // Own task so a panicking transport still yields an outcome.
            let mut send = tokio::spawn(async move { transport.send(&envelope, &to).await });

            let result = match send_timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut send).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        send.abort();
                        Err(TransportError::Timeout(limit))
                    }
                },
                None => flatten(send.await),
            };

            let outcome = Outcome {
                recipient,
                elapsed: start.elapsed(),
                result,
            };
            let _ = signals.send(Signal::Outcome(outcome));
        });
    }
}

fn flatten(
    joined: Result<Result<SendReceipt, TransportError>, JoinError>,
) -> Result<SendReceipt, TransportError> {
    joined.unwrap_or_else(|e| Err(TransportError::SendFailed(format!("transport task failed: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use crate::config::DispatchDefaults;
    use crate::events::{self, EventStream};
    use crate::list::ListSpec;
    use crate::message::MessageTemplate;

    /// Accepts everything except addresses starting with "bad".
    struct StubTransport;

    #[async_trait]
    impl Transport for StubTransport {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(&self, _envelope: &Envelope, to: &str) -> Result<SendReceipt, TransportError> {
            if to.starts_with("bad") {
                Err(TransportError::SendFailed(format!("rejected {to}")))
            } else {
                Ok(SendReceipt {
                    message_id: None,
                    response: "250 OK".into(),
                })
            }
        }
    }

    /// Never answers.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        fn name(&self) -> &str {
            "silent"
        }

        async fn send(&self, _envelope: &Envelope, _to: &str) -> Result<SendReceipt, TransportError> {
            std::future::pending().await
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn send(&self, _envelope: &Envelope, _to: &str) -> Result<SendReceipt, TransportError> {
            panic!("transport bug")
        }
    }

    /// Records requested waits and returns immediately.
    #[derive(Default)]
    struct RecordingScheduler {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn list(count: usize, rate: usize) -> RecipientList {
        let members: Vec<String> = (0..count).map(|i| format!("user{i}@example.com")).collect();
        ListSpec::new("news@example.com", members, MessageTemplate::Html("<p>hi</p>".into()))
            .with_id("weekly")
            .into_list(1, &DispatchDefaults::default())
            .unwrap()
            .with_rate_ceiling(rate)
    }

    async fn drain(stream: EventStream) -> Vec<Event> {
        stream.collect().await
    }

    #[test]
    fn cycle_count_rounds_up() {
        assert_eq!(cycle_count(120, 50), 3);
        assert_eq!(cycle_count(100, 50), 2);
        assert_eq!(cycle_count(3, 50), 1);
        assert_eq!(cycle_count(0, 50), 1);
    }

    #[tokio::test]
    async fn batches_follow_rate_ceiling() {
        let (sink, stream) = events::channel();
        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = Dispatcher::new(Arc::new(StubTransport), scheduler.clone(), sink);

        let completion = dispatcher.dispatch(list(120, 50)).await.unwrap();
        drop(dispatcher);
        assert_eq!(completion.report.sent.len(), 120);

        let batches: Vec<Batch> = drain(stream)
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Batch(b) => Some(b),
                _ => None,
            })
            .collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.recipients.len()).collect();
        let iterations: Vec<usize> = batches.iter().map(|b| b.iteration).collect();
        assert_eq!(sizes, [50, 50, 20]);
        assert_eq!(iterations, [1, 2, 3]);
        assert!(batches.iter().all(|b| b.cycle == 3));

        // No wait after the final window.
        assert_eq!(
            *scheduler.waits.lock().unwrap(),
            [Duration::from_millis(1000), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn failures_are_recorded_not_fatal() {
        let members = vec!["bad1@example.com", "good@example.com", "bad2@example.com"];
        let l = ListSpec::new("news@example.com", members, MessageTemplate::Html("x".into()))
            .into_list(1, &DispatchDefaults::default())
            .unwrap()
            .with_rate_ceiling(2);

        let (sink, stream) = events::channel();
        let dispatcher = Dispatcher::new(
            Arc::new(StubTransport),
            Arc::new(RecordingScheduler::default()),
            sink,
        );
        let completion = dispatcher.dispatch(l).await.unwrap();
        drop(dispatcher);

        assert_eq!(completion.report.sent, ["good@example.com"]);
        assert_eq!(completion.report.errors.len(), 2);
        assert!(completion.report.errors[0].detail.contains("rejected"));

        let events = drain(stream).await;
        let completes = events.iter().filter(|e| e.name() == "complete").count();
        let errors = events.iter().filter(|e| e.name() == "error").count();
        assert_eq!(completes, 1);
        assert_eq!(errors, 2);
        assert_eq!(events.last().map(Event::name), Some("complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_turns_stall_into_failure() {
        let (sink, _stream) = events::channel();
        let dispatcher = Dispatcher::new(Arc::new(SilentTransport), Arc::new(TokioScheduler), sink)
            .with_send_timeout(Some(Duration::from_secs(5)));

        let completion = dispatcher.dispatch(list(2, 50)).await.unwrap();
        assert_eq!(completion.report.errors.len(), 2);
        assert!(completion.report.errors[0].detail.contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_transport_yields_failure() {
        let (sink, _stream) = events::channel();
        let dispatcher = Dispatcher::new(
            Arc::new(PanickingTransport),
            Arc::new(RecordingScheduler::default()),
            sink,
        );

        let completion = dispatcher.dispatch(list(1, 50)).await.unwrap();
        assert_eq!(completion.report.errors.len(), 1);
        assert!(completion.report.errors[0].detail.contains("transport task failed"));
    }

    #[tokio::test]
    async fn duplicate_recipients_are_each_sent() {
        let members = vec!["a@example.com", "a@example.com"];
        let l = ListSpec::new("news@example.com", members, MessageTemplate::Html("x".into()))
            .into_list(1, &DispatchDefaults::default())
            .unwrap();

        let (sink, _stream) = events::channel();
        let dispatcher = Dispatcher::new(
            Arc::new(StubTransport),
            Arc::new(RecordingScheduler::default()),
            sink,
        );
        let completion = dispatcher.dispatch(l).await.unwrap();
        assert_eq!(completion.report.sent, ["a@example.com", "a@example.com"]);
    }
}
