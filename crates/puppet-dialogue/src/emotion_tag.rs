//! `[EMOTION:<id>]` tags embedded in language model replies

use regex::Regex;
use std::sync::LazyLock;

static EMOTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[EMOTION:([^\]]+)\]").expect("EMOTION_TAG is a compile-time constant")
});

static EMOTION_TAG_WITH_SPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\[EMOTION:[^\]]+\]\s*")
        .expect("EMOTION_TAG_WITH_SPACE is a compile-time constant")
});

/// A reply split into spoken text and its authoritative emotion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// Identifier of the last tag, if any
    pub emotion: Option<String>,
    /// Text with every tag removed
    pub text: String,
}

/// Extract emotion tags from `text`.
///
/// The last tag wins. Tags are removed together with their surrounding
/// whitespace, which collapses to a single space, and the result is trimmed.
/// Text without tags is returned unchanged.
#[must_use]
pub fn parse_emotion_tags(text: &str) -> ParsedReply {
    let emotion = EMOTION_TAG
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let text = if emotion.is_some() {
        EMOTION_TAG_WITH_SPACE.replace_all(text, " ").trim().to_string()
    } else {
        text.to_string()
    };

    ParsedReply { emotion, text }
}
