//! Label normalization and the metadata encoding used on stored images.
//!
//! Labels are case-folded at write time and again at query time, so a stored
//! label set always compares equal regardless of where a label came from
//! (vision labels, detected objects, detected text or user captions).

use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::{BTreeSet, HashMap};

/// Metadata key holding the comma-joined label set
pub const LABELS_METADATA_KEY: &str = "labels";
/// Metadata key marking a non-ASCII label set as base64-encoded
pub const LABELS_ENCODING_KEY: &str = "labels-encoding";

const BASE64_ENCODING: &str = "base64";

/// Normalized, de-duplicated, sorted set of labels for one image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: BTreeSet<String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from raw strings, normalizing each one
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        set.extend(raw);
        set
    }

    /// Add a single label, ignoring it if it normalizes to nothing
    pub fn insert(&mut self, raw: &str) -> bool {
        match normalize_label(raw) {
            Some(label) => self.labels.insert(label),
            None => false,
        }
    }

    pub fn extend<I, S>(&mut self, raw: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for label in raw {
            self.insert(label.as_ref());
        }
    }

    pub fn merge(&mut self, other: LabelSet) {
        self.labels.extend(other.labels);
    }

    pub fn contains(&self, label: &str) -> bool {
        normalize_label(label).is_some_and(|l| self.labels.contains(&l))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Comma-joined form stored in object metadata
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }

    /// Parse the comma-joined form
    pub fn parse(joined: &str) -> Self {
        Self::from_raw(joined.split(','))
    }

    /// Encode into object metadata entries.
    ///
    /// Object-store metadata travels in HTTP headers, so a label set that is
    /// not plain ASCII is stored base64-encoded and flagged.
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let joined = self.joined();
        let mut metadata = HashMap::new();

        if joined.is_ascii() {
            metadata.insert(LABELS_METADATA_KEY.to_string(), joined);
        } else {
            metadata.insert(LABELS_METADATA_KEY.to_string(), STANDARD.encode(joined));
            metadata.insert(
                LABELS_ENCODING_KEY.to_string(),
                BASE64_ENCODING.to_string(),
            );
        }

        metadata
    }

    /// Decode from object metadata entries; a missing or undecodable entry
    /// yields an empty set
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let Some(value) = metadata.get(LABELS_METADATA_KEY) else {
            return Self::new();
        };

        match metadata.get(LABELS_ENCODING_KEY).map(String::as_str) {
            Some(BASE64_ENCODING) => STANDARD
                .decode(value)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .map(|joined| Self::parse(&joined))
                .unwrap_or_default(),
            _ => Self::parse(value),
        }
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.iter().collect::<Vec<_>>().join(", "))
    }
}

/// Case-fold a label, collapse inner whitespace and strip separators.
/// Returns `None` when nothing is left.
pub fn normalize_label(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == ',' { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();

    let label = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

/// Split free text (a caption or detected text) into label words.
///
/// Words shorter than two characters and pure numbers are dropped.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Cat "), Some("cat".to_string()));
        assert_eq!(normalize_label("Sports   Car"), Some("sports car".to_string()));
        assert_eq!(normalize_label("a,b"), Some("a b".to_string()));
        assert_eq!(normalize_label(" , "), None);
    }

    #[test]
    fn test_label_set_dedups_case_insensitively() {
        let set = LabelSet::from_raw(["Cat", "cat", "ANIMAL"]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.joined(), "animal,cat");
        assert!(set.contains("CAT"));
    }

    #[test]
    fn test_parse_joined() {
        let set = LabelSet::parse("cat,animal,,Whiskers");
        assert_eq!(set.joined(), "animal,cat,whiskers");
    }

    #[test]
    fn test_ascii_metadata_is_plain() {
        let set = LabelSet::from_raw(["cat", "animal"]);
        let metadata = set.to_metadata();

        assert_eq!(metadata.get(LABELS_METADATA_KEY).unwrap(), "animal,cat");
        assert!(!metadata.contains_key(LABELS_ENCODING_KEY));
        assert_eq!(LabelSet::from_metadata(&metadata), set);
    }

    #[test]
    fn test_non_ascii_metadata_is_encoded() {
        let set = LabelSet::from_raw(["città", "gatto"]);
        let metadata = set.to_metadata();

        assert_eq!(metadata.get(LABELS_ENCODING_KEY).unwrap(), "base64");
        assert!(metadata.get(LABELS_METADATA_KEY).unwrap().is_ascii());
        assert_eq!(LabelSet::from_metadata(&metadata), set);
    }

    #[test]
    fn test_missing_metadata_is_empty() {
        assert!(LabelSet::from_metadata(&HashMap::new()).is_empty());
    }

    #[test]
    fn test_words() {
        assert_eq!(
            words("Il mio Gatto, al mare! 2024 a"),
            vec!["il", "mio", "gatto", "al", "mare"]
        );
    }
}
