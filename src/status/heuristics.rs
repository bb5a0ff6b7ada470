use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::Status;
use crate::config::MarkerConfig;

/// How many trailing lines of a capture are considered
const RECENT_LINES: usize = 30;

/// Compiled regex patterns for status detection
static RE_WAITING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\[y/n\]|\(y/n\)|\byes/no\b|\bapprove\b|allow (edit|bash|write|command)|do you want to (proceed|continue|make this edit)|press enter to continue|waiting for (your )?input)",
    )
    .unwrap()
});

static RE_PROMPT_GLYPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[>❯›]\s*$").unwrap());

static RE_THINKING_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(thinking|think)>").unwrap());

static RE_THINKING_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(thinking|think)>").unwrap());

static RE_THINKING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\b(thinking|reasoning|pondering)(\.{3}|…)|[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]\s+\w)").unwrap()
});

static RE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)(^\s*error(\[\w+\])?:|\berror:\s|\bfailed\b|\bFAILED\b|traceback \(most recent call last\)|panicked at|\bexception\b|\bfatal:)",
    )
    .unwrap()
});

static RE_DONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\btask (is )?(complete|completed|done)\b|\ball done\b|\bcompleted successfully\b|\bfinished successfully\b|✓ done)")
        .unwrap()
});

/// Maps captured pane text to a `Status`.
///
/// Priority, highest first: Waiting, Thinking, Error, Done; no marker means Active.
#[derive(Debug, Default)]
pub struct TextClassifier {
    waiting: Vec<Regex>,
    thinking: Vec<Regex>,
    error: Vec<Regex>,
    done: Vec<Regex>,
}

impl TextClassifier {
    /// Classifier with the built-in markers plus any configured extras
    pub fn new(extra: &MarkerConfig) -> Self {
        Self {
            waiting: compile_literals(&extra.waiting),
            thinking: compile_literals(&extra.thinking),
            error: compile_literals(&extra.error),
            done: compile_literals(&extra.done),
        }
    }

    pub fn classify(&self, content: &str) -> Status {
        let lines: Vec<&str> = content.lines().rev().take(RECENT_LINES).collect();
        let recent = lines.into_iter().rev().collect::<Vec<_>>().join("\n");

        if self.is_waiting(&recent) {
            return Status::Waiting;
        }

        let (open_block, remainder) = split_thinking(&recent);
        if open_block || matches(&RE_THINKING, &self.thinking, remainder) {
            return Status::Thinking;
        }

        if matches(&RE_ERROR, &self.error, remainder) {
            return Status::Error;
        }

        if matches(&RE_DONE, &self.done, remainder) {
            return Status::Done;
        }

        Status::Active
    }

    fn is_waiting(&self, recent: &str) -> bool {
        if matches(&RE_WAITING, &self.waiting, recent) {
            return true;
        }
        recent
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| RE_PROMPT_GLYPH.is_match(line))
    }
}

/// Classify with the built-in markers only
pub fn classify_text(content: &str) -> Status {
    static DEFAULT: Lazy<TextClassifier> = Lazy::new(TextClassifier::default);
    DEFAULT.classify(content)
}

fn matches(builtin: &Regex, extra: &[Regex], text: &str) -> bool {
    builtin.is_match(text) || extra.iter().any(|re| re.is_match(text))
}

/// Find whether the text ends inside an unterminated thinking block.
///
/// Returns that flag plus the text after the last closed block, which is
/// judged on its own.
fn split_thinking(text: &str) -> (bool, &str) {
    let last_open = RE_THINKING_OPEN.find_iter(text).last();
    let last_close = RE_THINKING_CLOSE.find_iter(text).last();
    match (last_open, last_close) {
        (Some(open), Some(close)) if close.start() > open.start() => (false, &text[close.end()..]),
        (Some(open), _) => (true, &text[open.end()..]),
        (None, Some(close)) => (false, &text[close.end()..]),
        (None, None) => (false, text),
    }
}

fn compile_literals(markers: &[String]) -> Vec<Regex> {
    markers
        .iter()
        .filter(|m| !m.trim().is_empty())
        .filter_map(|m| {
            RegexBuilder::new(&regex::escape(m))
                .case_insensitive(true)
                .build()
                .map_err(|e| warn!(marker = %m, error = %e, "skipping status marker"))
                .ok()
        })
        .collect()
}
