//! Emotion tag to animation lookup

use crate::config::EmotionEntry;
use std::collections::BTreeMap;

/// Outcome of an emotion lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmotionMatch<'a> {
    /// Expression/motion pair to apply
    pub entry: &'a EmotionEntry,
    /// `false` when the tag was unknown and the neutral default was used
    pub known: bool,
}

/// Static emotion table with a neutral fallback
#[derive(Debug, Clone)]
pub struct EmotionTable {
    entries: BTreeMap<String, EmotionEntry>,
    neutral: EmotionEntry,
}

impl EmotionTable {
    /// Build the table; `neutral` answers every miss
    #[must_use]
    pub fn new(entries: BTreeMap<String, EmotionEntry>, neutral: EmotionEntry) -> Self {
        Self { entries, neutral }
    }

    /// Look up a tag (case-sensitive). Never fails.
    #[must_use]
    pub fn resolve(&self, tag: &str) -> EmotionMatch<'_> {
        match self.entries.get(tag) {
            Some(entry) => EmotionMatch { entry, known: true },
            None => EmotionMatch {
                entry: &self.neutral,
                known: false,
            },
        }
    }

    /// Neutral fallback entry
    #[must_use]
    pub fn neutral(&self) -> &EmotionEntry {
        &self.neutral
    }

    /// Known tags
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EmotionTable {
        let mut entries = BTreeMap::new();
        entries.insert(
            "happy".to_string(),
            EmotionEntry {
                expression: "happy".to_string(),
                motion_group: "Happy".to_string(),
            },
        );
        EmotionTable::new(
            entries,
            EmotionEntry {
                expression: "neutral".to_string(),
                motion_group: "Idle".to_string(),
            },
        )
    }

    #[test]
    fn test_known_tag() {
        let table = table();
        let found = table.resolve("happy");
        assert!(found.known);
        assert_eq!(found.entry.motion_group, "Happy");
    }

    #[test]
    fn test_miss_resolves_to_neutral() {
        let table = table();
        let found = table.resolve("Happy");
        assert!(!found.known);
        assert_eq!(found.entry.expression, "neutral");
        assert_eq!(found.entry.motion_group, "Idle");
    }
}
