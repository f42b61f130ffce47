//! Per-list reports and the report formatter.
//!
//! A [`Report`] is assembled by the completion tracker while outcomes arrive.
//! When a list declares report recipients, [`format_report`] renders the
//! finished report into a new list that is delivered ahead of the rest of
//! the queue.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::list::{ListKind, RecipientList};
use crate::message::RenderedMessage;

/// Successful recipients shown in a rendered report.
pub const DISPLAY_CAP: usize = 10;

// ── Report ──────────────────────────────────────────────────────────

/// A recipient the transport rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub recipient: String,
    pub elapsed: Duration,
    pub detail: String,
}

/// What was sent, what failed, and how long it took.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub list_id: String,
    pub sender: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub sent: Vec<String>,
    pub errors: Vec<FailureRecord>,
    pub duration: Option<Duration>,
}

impl Report {
    pub fn new(list: &RecipientList, start: DateTime<Utc>) -> Self {
        Self {
            list_id: list.id.clone(),
            sender: list.sender.clone(),
            start,
            end: None,
            sent: Vec::new(),
            errors: Vec::new(),
            duration: None,
        }
    }

    /// Outcomes recorded so far.
    pub fn outcomes(&self) -> usize {
        self.sent.len() + self.errors.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.end.is_some()
    }

    pub(crate) fn finalize(&mut self, end: DateTime<Utc>, duration: Duration) {
        self.end = Some(end);
        self.duration = Some(duration);
    }
}

/// A finished list together with its final report.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// The list, with its pending recipients drained.
    pub list: RecipientList,
    pub report: Report,
}

// ── Formatter ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ReportView<'a> {
    list: &'a str,
    sender: &'a str,
    subject: &'a str,
    start: String,
    end: Option<String>,
    duration_ms: Option<String>,
    sent_count: usize,
    failed_count: usize,
    sent: Vec<String>,
    errors: Vec<FailureView<'a>>,
    message: &'a str,
}

#[derive(Serialize)]
struct FailureView<'a> {
    recipient: &'a str,
    time_ms: String,
    error: &'a str,
}

fn millis(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64() * 1000.0)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Successful recipients for display, capped at [`DISPLAY_CAP`].
pub fn displayed_recipients(sent: &[String]) -> Vec<String> {
    let mut shown: Vec<String> = sent.iter().take(DISPLAY_CAP).cloned().collect();
    if sent.len() > DISPLAY_CAP {
        shown.push(format!("... and {} more", sent.len() - DISPLAY_CAP));
    }
    shown
}

/// Escape `&`, `<` and `>` in a single pass.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Subject for the report message, phrased by how the list went.
pub fn report_subject(completion: &Completion) -> String {
    let subject = if completion.list.message.subject.is_empty() {
        completion.list.id.as_str()
    } else {
        completion.list.message.subject.as_str()
    };
    let report = &completion.report;
    let failed = report.errors.len();

    if failed > 0 && report.sent.is_empty() {
        format!("Newsletter failed to send, {subject}")
    } else if failed > 0 {
        format!(
            "Newsletter sent with {failed} of {} failed, {subject}",
            report.outcomes()
        )
    } else {
        format!("Newsletter has been sent, {subject}")
    }
}

/// Render the report as a pretty JSON dump.
pub fn render_dump(completion: &Completion) -> Result<String, serde_json::Error> {
    let report = &completion.report;
    let view = ReportView {
        list: &report.list_id,
        sender: &report.sender,
        subject: &completion.list.message.subject,
        start: timestamp(report.start),
        end: report.end.map(timestamp),
        duration_ms: report.duration.map(millis),
        sent_count: report.sent.len(),
        failed_count: report.errors.len(),
        sent: displayed_recipients(&report.sent),
        errors: report
            .errors
            .iter()
            .map(|f| FailureView {
                recipient: &f.recipient,
                time_ms: millis(f.elapsed),
                error: &f.detail,
            })
            .collect(),
        message: completion.list.message.html.trim(),
    };
    serde_json::to_string_pretty(&view)
}

/// Build the report list for a finished list.
///
/// Returns `None` when the list has no report recipients or is itself a
/// report list.
pub fn format_report(completion: &Completion) -> Option<RecipientList> {
    let list = &completion.list;
    if list.kind() == ListKind::Report || list.report_to.is_empty() {
        return None;
    }

    let dump = match render_dump(completion) {
        Ok(dump) => dump,
        Err(e) => {
            tracing::warn!(list_id = %list.id, "Failed to render report: {e}");
            return None;
        }
    };

    let message = RenderedMessage {
        subject: report_subject(completion),
        html: format!("<html><body><pre>{}</pre></body></html>", escape_html(&dump)),
        plain: dump,
    };

    Some(RecipientList::report_for(list, message))
}
