//! Recipient lists — caller input and the normalized form the dispatcher consumes.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{BatchSettings, DispatchDefaults};
use crate::error::ValidationError;
use crate::message::{self, MessageTemplate, RenderedMessage};

/// Suffix appended to a list id to name its synthesized report list.
pub const REPORT_SUFFIX: &str = "-report";

// ── Input ───────────────────────────────────────────────────────────

/// A list member, either a bare address or a contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Member {
    Address(String),
    Contact { email: String },
}

impl Member {
    pub fn email(&self) -> &str {
        match self {
            Self::Address(email) | Self::Contact { email } => email,
        }
    }
}

/// Extra addressing applied to every copy sent for a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// A list as described by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub sender: String,
    pub members: Vec<Member>,
    pub message: MessageTemplate,
    #[serde(default)]
    pub batch: Option<BatchSettings>,
    #[serde(default, alias = "sendReportTo")]
    pub send_report_to: Option<Vec<String>>,
    #[serde(default)]
    pub options: Option<SendOptions>,
}

impl ListSpec {
    /// Minimal spec with a bare HTML message.
    pub fn new(
        sender: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
        message: MessageTemplate,
    ) -> Self {
        Self {
            id: None,
            name: None,
            sender: sender.into(),
            members: members
                .into_iter()
                .map(|m| Member::Address(m.into()))
                .collect(),
            message,
            batch: None,
            send_report_to: None,
            options: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchSettings) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_report_to(mut self, recipients: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.send_report_to = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and normalize. `position` is the 1-based index in the run input.
    pub fn into_list(
        self,
        position: usize,
        defaults: &DispatchDefaults,
    ) -> Result<RecipientList, ValidationError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("list-{position}"));

        if self.sender.trim().is_empty() {
            return Err(ValidationError::MissingSender { list: id });
        }

        let mut members = VecDeque::with_capacity(self.members.len());
        for (i, member) in self.members.iter().enumerate() {
            let email = member.email().trim();
            if email.is_empty() {
                return Err(ValidationError::EmptyMember {
                    list: id,
                    position: i + 1,
                });
            }
            members.push_back(email.to_string());
        }

        let report_to = self.send_report_to.unwrap_or_default();
        if let Some(i) = report_to.iter().position(|r| r.trim().is_empty()) {
            return Err(ValidationError::EmptyReportAddress {
                list: id,
                position: i + 1,
            });
        }

        let fallback_subject = self.name.clone().unwrap_or_else(|| id.clone());
        let message = message::load(&self.message, &fallback_subject).map_err(|source| {
            ValidationError::Message {
                list: id.clone(),
                source,
            }
        })?;

        Ok(RecipientList {
            id,
            name: self.name,
            sender: self.sender,
            members,
            message,
            rate_ceiling: defaults.max_send_rate.max(1),
            batch: self.batch.unwrap_or(defaults.batch),
            report_to,
            options: self.options.unwrap_or_default(),
            kind: ListKind::Original,
        })
    }
}

/// Normalize every spec of a run.
///
/// Rejects duplicate ids, and ids that a report list of another list would reuse.
pub fn normalize(
    specs: Vec<ListSpec>,
    defaults: &DispatchDefaults,
) -> Result<Vec<RecipientList>, ValidationError> {
    let mut seen = HashSet::new();
    let mut lists = Vec::with_capacity(specs.len());

    for (i, spec) in specs.into_iter().enumerate() {
        let list = spec.into_list(i + 1, defaults)?;
        if !seen.insert(list.id.clone()) {
            return Err(ValidationError::DuplicateId(list.id));
        }
        lists.push(list);
    }

    for list in lists.iter().filter(|l| !l.report_to.is_empty()) {
        let report_id = report_list_id(&list.id);
        if seen.contains(&report_id) {
            return Err(ValidationError::ReportIdTaken {
                list: list.id.clone(),
                report_id,
            });
        }
    }

    Ok(lists)
}

fn report_list_id(list_id: &str) -> String {
    format!("{list_id}{REPORT_SUFFIX}")
}

// ── Normalized list ─────────────────────────────────────────────────

/// Whether a list came from the caller or was synthesized from a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Original,
    Report,
}

/// A validated list ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientList {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sender: String,
    /// Recipients not yet handed to the transport.
    #[serde(skip_serializing_if = "VecDeque::is_empty")]
    members: VecDeque<String>,
    pub message: RenderedMessage,
    rate_ceiling: usize,
    pub batch: BatchSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub report_to: Vec<String>,
    pub options: SendOptions,
    kind: ListKind,
}

impl RecipientList {
    /// Build the list that delivers `message` (a rendered report of `origin`)
    /// to `origin`'s report recipients.
    pub fn report_for(origin: &RecipientList, message: RenderedMessage) -> Self {
        Self {
            id: report_list_id(&origin.id),
            name: None,
            sender: origin.sender.clone(),
            members: origin.report_to.iter().cloned().collect(),
            message,
            rate_ceiling: origin.rate_ceiling,
            batch: origin.batch,
            report_to: Vec::new(),
            options: SendOptions::default(),
            kind: ListKind::Report,
        }
    }

    /// Assign the rate ceiling reported by the quota provider.
    pub fn with_rate_ceiling(mut self, rate_ceiling: usize) -> Self {
        self.rate_ceiling = rate_ceiling.max(1);
        self
    }

    pub fn rate_ceiling(&self) -> usize {
        self.rate_ceiling
    }

    pub fn batch_interval(&self) -> Duration {
        self.batch.interval()
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Recipients still waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Remove the next window of at most `rate_ceiling` recipients.
    pub(crate) fn take_batch(&mut self) -> Vec<String> {
        let n = self.rate_ceiling.min(self.members.len());
        self.members.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(members: &[&str]) -> ListSpec {
        ListSpec::new(
            "news@example.com",
            members.iter().copied(),
            MessageTemplate::Html("<p>hi</p>".into()),
        )
    }

    #[test]
    fn default_id_uses_position() {
        let list = spec(&["a@example.com"])
            .into_list(3, &DispatchDefaults::default())
            .unwrap();
        assert_eq!(list.id, "list-3");
        assert_eq!(list.kind(), ListKind::Original);
        assert_eq!(list.message.subject, "list-3");
    }

    #[test]
    fn defaults_fill_batch_and_rate() {
        let defaults = DispatchDefaults {
            max_send_rate: 7,
            batch: BatchSettings { interval_ms: 20 },
            send_timeout: None,
        };
        let list = spec(&["a@example.com"]).into_list(1, &defaults).unwrap();
        assert_eq!(list.rate_ceiling(), 7);
        assert_eq!(list.batch_interval(), Duration::from_millis(20));

        let own = spec(&["a@example.com"])
            .with_batch(BatchSettings { interval_ms: 5 })
            .into_list(1, &defaults)
            .unwrap();
        assert_eq!(own.batch_interval(), Duration::from_millis(5));
    }

    #[test]
    fn empty_sender_is_rejected() {
        let mut s = spec(&["a@example.com"]);
        s.sender = "  ".into();
        let err = s.into_list(1, &DispatchDefaults::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingSender { .. }));
    }

    #[test]
    fn empty_member_is_rejected() {
        let err = spec(&["a@example.com", ""])
            .into_list(1, &DispatchDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyMember { position: 2, .. }));
    }

    #[test]
    fn missing_body_is_a_validation_error() {
        let mut s = spec(&["a@example.com"]);
        s.message = MessageTemplate::Parts {
            subject: Some("s".into()),
            html: None,
            plain: None,
        };
        let err = s.into_list(1, &DispatchDefaults::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Message { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let specs = vec![
            spec(&["a@example.com"]).with_id("weekly"),
            spec(&["b@example.com"]).with_id("weekly"),
        ];
        let err = normalize(specs, &DispatchDefaults::default()).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateId(ref id) if id == "weekly"));
    }

    #[test]
    fn report_id_cannot_shadow_a_caller_list() {
        let specs = vec![
            spec(&["a@example.com"]).with_id("a").with_report_to(["boss@example.com"]),
            spec(&["b@example.com"]).with_id("a-report"),
        ];
        let err = normalize(specs, &DispatchDefaults::default()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ReportIdTaken { ref list, ref report_id }
                if list == "a" && report_id == "a-report"
        ));
    }

    #[test]
    fn report_id_is_free_without_report_recipients() {
        let specs = vec![
            spec(&["a@example.com"]).with_id("a"),
            spec(&["b@example.com"]).with_id("a-report"),
        ];
        let lists = normalize(specs, &DispatchDefaults::default()).unwrap();
        assert_eq!(lists.len(), 2);
    }

    #[test]
    fn duplicate_members_are_kept() {
        let list = spec(&["a@example.com", "a@example.com"])
            .into_list(1, &DispatchDefaults::default())
            .unwrap();
        assert_eq!(list.pending(), 2);
    }

    #[test]
    fn take_batch_drains_in_windows() {
        let members: Vec<String> = (0..5).map(|i| format!("m{i}@example.com")).collect();
        let mut list = ListSpec::new("news@example.com", members, MessageTemplate::Html("x".into()))
            .into_list(1, &DispatchDefaults::default())
            .unwrap()
            .with_rate_ceiling(2);

        assert_eq!(list.take_batch(), vec!["m0@example.com", "m1@example.com"]);
        assert_eq!(list.take_batch().len(), 2);
        assert_eq!(list.take_batch(), vec!["m4@example.com"]);
        assert!(list.take_batch().is_empty());
        assert_eq!(list.pending(), 0);
    }

    #[test]
    fn members_accept_contact_objects() {
        let spec: ListSpec = serde_json::from_str(
            r#"{
                "id": "weekly",
                "sender": "news@example.com",
                "members": ["a@example.com", { "email": "b@example.com" }],
                "message": "<p>hi</p>",
                "sendReportTo": ["boss@example.com"]
            }"#,
        )
        .unwrap();
        let list = spec.into_list(1, &DispatchDefaults::default()).unwrap();
        assert_eq!(list.members().collect::<Vec<_>>(), ["a@example.com", "b@example.com"]);
        assert_eq!(list.report_to, ["boss@example.com"]);
    }

    #[test]
    fn report_list_inherits_pacing_not_reporting() {
        let origin = spec(&["a@example.com"])
            .with_id("weekly")
            .with_report_to(["boss@example.com"])
            .into_list(1, &DispatchDefaults::default())
            .unwrap()
            .with_rate_ceiling(9);

        let report = RecipientList::report_for(&origin, origin.message.clone());
        assert_eq!(report.id, "weekly-report");
        assert_eq!(report.kind(), ListKind::Report);
        assert_eq!(report.rate_ceiling(), 9);
        assert!(report.report_to.is_empty());
        assert_eq!(report.members().collect::<Vec<_>>(), ["boss@example.com"]);
    }

    #[test]
    fn rate_ceiling_never_zero() {
        let list = spec(&["a@example.com"])
            .into_list(1, &DispatchDefaults::default())
            .unwrap()
            .with_rate_ceiling(0);
        assert_eq!(list.rate_ceiling(), 1);
    }
}
