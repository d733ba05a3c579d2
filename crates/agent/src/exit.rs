//! Turning an exit record into something deliverable.
//!
//! The handler picks the final text for the exit reason, cleans it up for
//! the destination, and attaches delivery metadata. It never fails: when the
//! loop produced nothing usable, a canned message keyed by exit reason is
//! delivered instead.

use crate::controller::{ExitReason, ExitRecord};
use agentloop_config::{Destination, FallbackConfig};
use agentloop_core::error::LoopError;
use agentloop_core::provider::Usage;
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::warn;

/// Speaking rate used for delivery estimates.
pub const WORDS_PER_MINUTE: usize = 160;

const DESCRIPTION_CHARS: usize = 200;

/// Delivered when even the configured fallback cleans down to nothing.
const LAST_RESORT: &str = "Sorry, there is nothing to report right now. Please try again later.";

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+ +(.*)$").expect("valid regex"));
static HEADING_MARK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+ ").expect("valid regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));
static MANY_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// The final answer of one loop execution, ready to hand to a sink.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub text: String,
    pub title: String,
    /// ISO date of the delivery
    pub date: String,
    /// First paragraph, truncated
    pub description: String,
    pub word_count: usize,
    pub estimated_minutes: usize,
    pub reason: String,
    pub iterations: u32,
    pub usage: Usage,
    /// True when a canned message replaced the model's output
    pub fallback: bool,
}

/// Builds deliveries for one profile.
pub struct ExitHandler {
    destination: Destination,
    fallbacks: FallbackConfig,
    title: String,
    today: NaiveDate,
}

impl ExitHandler {
    pub fn new(destination: Destination, fallbacks: FallbackConfig, today: NaiveDate) -> Self {
        Self {
            destination,
            fallbacks,
            title: "Briefing".into(),
            today,
        }
    }

    /// Set the title prefix (`"<title> - <date>"`).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The long form of today's date, as used in prompts and fallbacks.
    pub fn display_date(&self) -> String {
        self.today.format("%A, %B %-d, %Y").to_string()
    }

    /// Build the delivery for a controlled exit.
    ///
    /// Candidates are judged after cleanup, so an answer made only of markup
    /// counts as no answer.
    pub fn deliver(&self, record: &ExitRecord) -> Delivery {
        let chosen = record
            .final_text
            .as_deref()
            .map(|t| self.clean(t))
            .filter(|t| !t.is_empty())
            .or_else(|| Some(self.clean(&record.text_content)).filter(|t| !t.is_empty()));

        let (text, fallback) = match chosen {
            Some(text) => (text, false),
            None => {
                warn!(reason = %record.reason, "No usable answer; delivering fallback message");
                (self.canned(self.fallback_for(record.reason)), true)
            }
        };

        self.build(
            text,
            record.reason.as_str(),
            record.iterations,
            record.usage,
            fallback,
        )
    }

    /// Build the apologetic delivery for a failed execution.
    ///
    /// The error itself is logged, never shown to the end user.
    pub fn from_error(&self, error: &LoopError) -> Delivery {
        let iterations = match error {
            LoopError::Provider { iteration, .. } => *iteration,
            LoopError::ProtocolDesync(_) => 0,
        };
        warn!(error = %error, iterations, "Agent loop failed; delivering error message");
        let text = self.canned(&self.fallbacks.error);
        self.build(text, "error", iterations, Usage::default(), true)
    }

    fn fallback_for(&self, reason: ExitReason) -> &str {
        match reason {
            ExitReason::MaxIterationsReached => &self.fallbacks.max_iterations,
            ExitReason::Timeout => &self.fallbacks.timeout,
            _ => &self.fallbacks.no_output,
        }
    }

    /// Render and clean a fallback template, never returning empty text.
    fn canned(&self, template: &str) -> String {
        let text = self.clean(&template.replace("{date}", &self.display_date()));
        if text.is_empty() {
            LAST_RESORT.to_string()
        } else {
            text
        }
    }

    fn clean(&self, text: &str) -> String {
        clean(self.destination, text)
    }

    fn build(
        &self,
        text: String,
        reason: &str,
        iterations: u32,
        usage: Usage,
        fallback: bool,
    ) -> Delivery {
        let word_count = text.split_whitespace().count();
        let date = self.today.format("%Y-%m-%d").to_string();

        Delivery {
            title: format!("{} - {date}", self.title),
            description: describe(&text),
            estimated_minutes: estimated_minutes(word_count),
            word_count,
            text,
            date,
            reason: reason.to_string(),
            iterations,
            usage,
            fallback,
        }
    }
}

/// Destination-specific cleanup.
pub fn clean(destination: Destination, text: &str) -> String {
    let cleaned = match destination {
        Destination::Speech => for_speech(text),
        Destination::Slack => for_slack(text),
        Destination::Plain => text.to_string(),
    };
    MANY_NEWLINES
        .replace_all(&cleaned, "\n\n")
        .trim()
        .to_string()
}

/// Strip Markdown so text reads naturally aloud.
fn for_speech(text: &str) -> String {
    let text = HEADING_MARK.replace_all(text, "");
    let text = text.replace("**", "").replace(['*', '`'], "");
    LINK.replace_all(&text, "$1").into_owned()
}

/// Rewrite Markdown as Slack mrkdwn.
fn for_slack(text: &str) -> String {
    let text = HEADING.replace_all(text, "*$1*");
    let text = BOLD.replace_all(&text, "*$1*");
    LINK.replace_all(&text, "<$2|$1>").into_owned()
}

fn estimated_minutes(word_count: usize) -> usize {
    (word_count + WORDS_PER_MINUTE / 2) / WORDS_PER_MINUTE
}

fn describe(text: &str) -> String {
    let first = text.split("\n\n").next().unwrap_or_default();
    if first.chars().count() > DESCRIPTION_CHARS {
        let head: String = first.chars().take(DESCRIPTION_CHARS).collect();
        format!("{head}...")
    } else {
        first.to_string()
    }
}
