//! Commit message normalization.
//!
//! Models wrap their answer in code fences, quotes, and chatty prefixes
//! ("Here is the commit message:"). [`MessageNormalizer::clean`] strips all
//! of that and returns a message LazyGit can use directly.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::{DEFAULT_MAX_MESSAGE_LENGTH, MessageSettings};
use crate::error::MessageError;

/// Appended when a message is shortened.
pub const TRUNCATION_MARKER: &str = "...";

/// Smallest accepted length bound.
const MIN_MAX_LENGTH: usize = 10;

const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
    ('“', '”'),
    ('‘', '’'),
    ('「', '」'),
    ('『', '』'),
];

static ROLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:",
        r"git\s+commit\s+-m\s+",
        r"|(?:here\s+is|here's)\s+(?:the\s+|a\s+|your\s+)?(?:suggested\s+|proposed\s+)?commit\s+message\s*[:\-]?\s*",
        r"|(?:suggested\s+|proposed\s+)?commit(?:\s+message)?\s*[:\-]\s*",
        r")",
    ))
    .expect("Invalid regex")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("Invalid regex"));

/// Cleans raw model output into a commit message.
#[derive(Debug, Clone)]
pub struct MessageNormalizer {
    max_length: usize,
    multiline: bool,
}

impl Default for MessageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH, false)
    }
}

impl MessageNormalizer {
    /// `max_length` is counted in characters and raised to at least 10.
    /// With `multiline` the line structure is kept and the bound applies
    /// to the subject line only.
    pub fn new(max_length: usize, multiline: bool) -> Self {
        Self {
            max_length: max_length.max(MIN_MAX_LENGTH),
            multiline,
        }
    }

    pub fn from_settings(settings: &MessageSettings) -> Self {
        Self::new(settings.max_length, settings.multiline)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Normalize `raw` into a commit message.
    pub fn clean(&self, raw: &str) -> Result<String, MessageError> {
        let text = raw.replace("\r\n", "\n").replace('\r', "\n");

        if let Some(c) = text.chars().find(|c| is_disallowed_control(*c)) {
            return Err(MessageError::ControlCharacter { code: c as u32 });
        }

        let unfenced: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect();
        let text = strip_decorations(&unfenced.join("\n"));
        if text.is_empty() {
            return Err(MessageError::Empty);
        }

        let lines: Vec<String> = text.lines().map(collapse_whitespace).collect();

        let message = if self.multiline {
            self.clean_multiline(&lines)
        } else {
            self.clean_single_line(&lines)
        };

        if message.is_empty() {
            return Err(MessageError::Empty);
        }
        Ok(message)
    }

    fn clean_single_line(&self, lines: &[String]) -> String {
        let non_empty: Vec<&String> = lines.iter().filter(|l| !l.is_empty()).collect();
        let Some(first) = non_empty.first() else {
            return String::new();
        };

        let line = if non_empty.len() == 1 {
            first_sentence(first)
        } else {
            first.as_str()
        };

        truncate(&strip_decorations(line), self.max_length)
    }

    fn clean_multiline(&self, lines: &[String]) -> String {
        let mut kept: Vec<String> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.is_empty() && kept.last().is_none_or(|prev| prev.is_empty()) {
                continue;
            }
            kept.push(line.clone());
        }
        while kept.last().is_some_and(|l| l.is_empty()) {
            kept.pop();
        }

        if let Some(subject) = kept.first_mut() {
            *subject = truncate(&strip_decorations(subject), self.max_length);
        }
        kept.join("\n")
    }
}

fn is_disallowed_control(c: char) -> bool {
    (c as u32) < 32 && !matches!(c, '\n' | '\r' | '\t')
}

/// Strip role prefixes and enclosing quotes until nothing changes.
fn strip_decorations(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let without_prefix = ROLE_PREFIX.replace(&current, "").trim().to_string();
        let next = strip_enclosing_quotes(&without_prefix).trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_enclosing_quotes(text: &str) -> &str {
    let mut chars = text.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return text;
    };
    if !QUOTE_PAIRS.contains(&(first, last)) {
        return text;
    }
    let inner = &text[first.len_utf8()..text.len() - last.len_utf8()];
    // `"a" and "b"` is two quoted spans, not one enclosed message.
    if inner.contains(first) || inner.contains(last) {
        text
    } else {
        inner
    }
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text up to the first sentence terminator followed by whitespace.
fn first_sentence(line: &str) -> &str {
    match SENTENCE_END.find(line) {
        Some(m) if m.start() > 0 => &line[..m.start()],
        _ => line,
    }
}

/// Shorten `line` to at most `max_length` characters at a word boundary,
/// ending in [`TRUNCATION_MARKER`].
fn truncate(line: &str, max_length: usize) -> String {
    if line.chars().count() <= max_length {
        return line.to_string();
    }

    let budget = max_length - TRUNCATION_MARKER.len();
    let prefix_end = line
        .char_indices()
        .nth(budget)
        .map_or(line.len(), |(idx, _)| idx);
    let prefix = &line[..prefix_end];
    let at_boundary = line[prefix_end..].starts_with(' ');

    let cut = if at_boundary {
        prefix
    } else {
        match prefix.rfind(' ') {
            Some(idx) if idx > 0 => &prefix[..idx],
            // A single word longer than the budget; the marker flags the cut.
            _ => prefix,
        }
    };

    let cut = cut.trim_end().trim_end_matches(TRAILING_PUNCTUATION).trim_end();
    let cut = if cut.is_empty() { prefix } else { cut };
    format!("{cut}{TRUNCATION_MARKER}")
}
