//! Message loading — turns a list's message template into the subject, HTML
//! and plain-text bodies every recipient receives.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// Column at which derived plain text is wrapped.
pub const WORD_WRAP: usize = 130;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<title>(.+)</title>").expect("valid title regex"));

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<head\b.*?</head\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>")
        .expect("valid hidden block regex")
});

static BLOCK_BREAKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|table|ul|ol|blockquote)\s*>")
        .expect("valid block regex")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Message as supplied in a list description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageTemplate {
    /// A bare HTML document.
    Html(String),
    /// Explicit parts; at least one of `html` or `plain` is required.
    Parts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plain: Option<String>,
    },
}

/// The fully derived message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
    pub plain: String,
}

/// Derive the rendered message from a template.
///
/// The subject falls back to the HTML `<title>` and then to `fallback_subject`
/// (the list name or id).
pub fn load(
    template: &MessageTemplate,
    fallback_subject: &str,
) -> Result<RenderedMessage, MessageError> {
    match template {
        MessageTemplate::Html(html) => Ok(RenderedMessage {
            subject: parse_title(html).unwrap_or_else(|| fallback_subject.to_string()),
            html: html.clone(),
            plain: html_to_text(html),
        }),
        MessageTemplate::Parts {
            subject,
            html,
            plain,
        } => {
            let (html, plain) = match (non_empty(html), non_empty(plain)) {
                (Some(html), Some(plain)) => (html.to_string(), plain.to_string()),
                (Some(html), None) => (html.to_string(), html_to_text(html)),
                (None, Some(plain)) => (plain.to_string(), plain.to_string()),
                (None, None) => return Err(MessageError::MissingBody),
            };

            let subject = non_empty(subject)
                .map(str::to_string)
                .or_else(|| parse_title(&html))
                .unwrap_or_else(|| fallback_subject.to_string());

            Ok(RenderedMessage {
                subject,
                html,
                plain,
            })
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Contents of the first `<title>` element, if any.
pub fn parse_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Convert HTML to readable plain text, wrapped at [`WORD_WRAP`] columns.
pub fn html_to_text(html: &str) -> String {
    let visible = HIDDEN_BLOCKS.replace_all(html, "");
    let broken = BLOCK_BREAKS.replace_all(&visible, "\n");
    let stripped = TAGS.replace_all(&broken, "");
    let decoded = decode_entities(&stripped);

    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            // Collapse runs of blank lines into one paragraph break
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }
        lines.extend(wrap_words(&words, WORD_WRAP));
    }

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    lines.join("\n")
}

fn wrap_words(words: &[&str], width: usize) -> Vec<String> {
    let mut wrapped = Vec::new();
    let mut current = String::new();

    for word in words {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            wrapped.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        wrapped.push(current);
    }
    wrapped
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
