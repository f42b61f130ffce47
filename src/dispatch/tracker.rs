//! Completion tracker — the single owner of a list's report.
//!
//! Every send funnels its [`Outcome`] through one channel into the tracker
//! task. The list completes when both hold:
//! - outcomes received == recipients the list started with
//! - the dispatcher has handed back the drained list (no batch left to form)
//!
//! The check runs after every signal. Completion consumes the tracker, so
//! `complete` fires at most once per list.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::events::{Event, EventSink};
use crate::list::RecipientList;
use crate::report::{Completion, FailureRecord, Report};
use crate::transport::SendReceipt;

/// Terminal result of sending to one recipient.
#[derive(Debug)]
pub struct Outcome {
    pub recipient: String,
    pub elapsed: Duration,
    pub result: Result<SendReceipt, TransportError>,
}

/// Input to the tracker task.
#[derive(Debug)]
pub(crate) enum Signal {
    Outcome(Outcome),
    /// Every recipient has been dispatched; carries the drained list.
    Drained(RecipientList),
}

pub(crate) struct Tracker {
    expected: usize,
    report: Report,
    drained: Option<RecipientList>,
    started: Instant,
    events: EventSink,
}

impl Tracker {
    pub(crate) fn new(list: &RecipientList, events: EventSink) -> Self {
        Self {
            expected: list.pending(),
            report: Report::new(list, Utc::now()),
            drained: None,
            started: Instant::now(),
            events,
        }
    }

    pub(crate) fn report(&self) -> &Report {
        &self.report
    }

    /// Apply one signal. Returns `true` once the list is complete.
    pub(crate) fn observe(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Outcome(outcome) => self.record(outcome),
            Signal::Drained(list) => self.drained = Some(list),
        }
        self.is_complete()
    }

    fn is_complete(&self) -> bool {
        self.drained.is_some() && self.report.outcomes() >= self.expected
    }

    fn record(&mut self, outcome: Outcome) {
        let list_id = self.report.list_id.clone();
        match outcome.result {
            Ok(receipt) => {
                debug!(list_id = %list_id, recipient = %outcome.recipient, "Sent");
                self.report.sent.push(outcome.recipient.clone());
                self.events.emit(Event::Sent {
                    list_id,
                    recipient: outcome.recipient,
                    elapsed: outcome.elapsed,
                    receipt,
                });
            }
            Err(e) => {
                warn!(list_id = %list_id, recipient = %outcome.recipient, "Send failed: {e}");
                let failure = FailureRecord {
                    recipient: outcome.recipient,
                    elapsed: outcome.elapsed,
                    detail: e.to_string(),
                };
                self.report.errors.push(failure.clone());
                self.events.emit(Event::Error { list_id, failure });
            }
        }

        if self.report.outcomes() > self.expected {
            error!(
                list_id = %self.report.list_id,
                outcomes = self.report.outcomes(),
                expected = self.expected,
                "More outcomes than recipients"
            );
        }
    }

    /// Finalize the report and raise `complete`.
    fn finish(self) -> Option<Arc<Completion>> {
        let Self {
            mut report,
            drained,
            started,
            events,
            ..
        } = self;
        let list = drained?;

        let duration = started.elapsed();
        report.finalize(Utc::now(), duration);
        info!(
            list_id = %list.id,
            sent = report.sent.len(),
            failed = report.errors.len(),
            duration_ms = duration.as_millis() as u64,
            "List complete"
        );

        let completion = Arc::new(Completion { list, report });
        events.emit(Event::Complete(Arc::clone(&completion)));
        Some(completion)
    }
}

/// Drive a tracker until its list completes.
///
/// Returns `None` only if every sender went away before completion.
pub(crate) async fn run(
    mut tracker: Tracker,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) -> Option<Arc<Completion>> {
    while let Some(signal) = signals.recv().await {
        if tracker.observe(signal) {
            return tracker.finish();
        }
    }

    error!(
        list_id = %tracker.report.list_id,
        outcomes = tracker.report.outcomes(),
        expected = tracker.expected,
        "Outcome channel closed before the list completed"
    );
    None
}
