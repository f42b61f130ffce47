//! Queue runner. Sequences a run's lists through the dispatcher.
//!
//! The quota is fetched once per run. Lists are then dispatched strictly one
//! after another; a finished list that declares report recipients has its
//! report list pushed to the front of the queue, so the report goes out
//! before the next caller list starts.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::{DispatchDefaults, RunConfig};
use crate::dispatch::{Dispatcher, Scheduler, TokioScheduler};
use crate::error::ValidationError;
use crate::events::{self, Event, EventSink, EventStream};
use crate::list::{self, ListSpec, RecipientList};
use crate::report;
use crate::transport::Transport;
use crate::transport::quota::{self, QuotaOptions, QuotaProvider};
use crate::transport::smtp::{SmtpConfig, SmtpMailer};

// ── Queue ───────────────────────────────────────────────────────────

/// FIFO of lists awaiting dispatch. Report lists jump the line.
#[derive(Debug, Default)]
pub struct RunQueue {
    lists: VecDeque<RecipientList>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, list: RecipientList) {
        self.lists.push_back(list);
    }

    pub fn push_front(&mut self, list: RecipientList) {
        self.lists.push_front(list);
    }

    pub fn pop_front(&mut self) -> Option<RecipientList> {
        self.lists.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

// ── Newsletter ──────────────────────────────────────────────────────

/// Entry point for a run: one transport, one quota provider, many lists.
#[derive(Clone)]
pub struct Newsletter {
    transport: Arc<dyn Transport>,
    quota: Arc<dyn QuotaProvider>,
    scheduler: Arc<dyn Scheduler>,
    defaults: DispatchDefaults,
}

impl Newsletter {
    pub fn new(transport: Arc<dyn Transport>, quota: Arc<dyn QuotaProvider>) -> Self {
        Self {
            transport,
            quota,
            scheduler: Arc::new(TokioScheduler),
            defaults: DispatchDefaults::default(),
        }
    }

    /// SMTP delivery with the quota provider chosen from the environment.
    pub fn from_env() -> crate::Result<Self> {
        let smtp = SmtpConfig::from_env()?;
        info!(host = %smtp.host, port = smtp.port, "Using SMTP relay");
        let transport = Arc::new(SmtpMailer::new(&smtp)?);
        let quota = quota::from_env()?;
        Ok(Self::new(transport, quota))
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_defaults(mut self, defaults: DispatchDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Validate `specs` and start delivering them in the background.
    ///
    /// Validation errors are returned before anything is sent. Everything
    /// else is reported on the returned stream, which ends after `finish`
    /// (or after `quota.error`). Must be called within a tokio runtime.
    pub fn send(
        &self,
        options: QuotaOptions,
        specs: Vec<ListSpec>,
    ) -> Result<EventStream, ValidationError> {
        let lists = list::normalize(specs, &self.defaults)?;
        let (sink, stream) = events::channel();

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.scheduler),
            sink.clone(),
        )
        .with_send_timeout(self.defaults.send_timeout);

        let run = Run {
            quota: Arc::clone(&self.quota),
            options,
            lists,
            fallback_rate: self.defaults.max_send_rate,
            dispatcher,
            events: sink,
        };
        tokio::spawn(run.execute());

        Ok(stream)
    }

    /// Start the run described by `config`, applying its run-wide defaults.
    pub fn run(mut self, config: RunConfig) -> crate::Result<EventStream> {
        self.defaults = config.defaults()?;
        Ok(self.send(config.quota, config.lists)?)
    }
}

// ── Run ─────────────────────────────────────────────────────────────

struct Run {
    quota: Arc<dyn QuotaProvider>,
    options: QuotaOptions,
    lists: Vec<RecipientList>,
    fallback_rate: usize,
    dispatcher: Dispatcher,
    events: EventSink,
}

impl Run {
    async fn execute(self) {
        let Self {
            quota,
            options,
            lists,
            fallback_rate,
            dispatcher,
            events,
        } = self;

        let rate_ceiling = match quota.get_quota(&options).await {
            Ok(q) => q.rate_ceiling().unwrap_or(fallback_rate),
            Err(e) => {
                error!(provider = quota.name(), "Quota fetch failed: {e}");
                events.emit(Event::QuotaError(e));
                return;
            }
        };
        info!(provider = quota.name(), rate_ceiling, lists = lists.len(), "Run starting");

        let mut queue = RunQueue::new();
        for list in lists {
            if list.pending() == 0 {
                info!(list_id = %list.id, "Skipping list without members");
                continue;
            }
            queue.push_back(list.with_rate_ceiling(rate_ceiling));
        }

        while let Some(list) = queue.pop_front() {
            let Some(completion) = dispatcher.dispatch(list).await else {
                continue;
            };
            if let Some(report_list) = report::format_report(&completion) {
                info!(
                    list_id = %report_list.id,
                    recipients = report_list.pending(),
                    "Queued report"
                );
                queue.push_front(report_list);
            }
        }

        info!("Run finished");
        events.emit(Event::Finish);
    }
}
