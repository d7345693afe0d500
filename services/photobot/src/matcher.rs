use crate::labels::LabelSet;
use thiserror::Error;
use tracing::trace;

/// Whether a search returns the first matching image or every match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Stop after the first hit
    First,
    /// Accumulate all hits
    All,
}

/// Query parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("Query is empty")]
    Empty,
}

/// A parsed user query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Case-folded, whitespace-collapsed query text without the marker
    pub text: String,
    /// Search raw label text, skipping translation and synonyms
    pub literal: bool,
}

impl SearchQuery {
    /// Parse a raw query; a leading `literal_marker` switches to literal search
    pub fn parse(raw: &str, literal_marker: &str) -> Result<Self, QueryError> {
        let trimmed = raw.trim();

        let (literal, rest) = match trimmed.strip_prefix(literal_marker) {
            Some(rest) if !literal_marker.is_empty() => (true, rest),
            _ => (false, trimmed),
        };

        let text = rest
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if text.is_empty() {
            return Err(QueryError::Empty);
        }

        Ok(Self { text, literal })
    }
}

/// An image considered by the matcher
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: String,
    pub labels: LabelSet,
}

/// A matched image with the label that matched best
#[derive(Debug, Clone, PartialEq)]
pub struct MatchHit {
    pub key: String,
    pub label: String,
    pub score: f64,
    /// Every label of the image, used as the reply caption
    pub labels: LabelSet,
}

/// Result of evaluating one term against a candidate list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub hits: Vec<MatchHit>,
}

impl MatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.key.clone()).collect()
    }
}

/// Label-matching query evaluator
///
/// A term matches a label when the label contains it as a substring, or
/// otherwise when their normalized Levenshtein similarity reaches the
/// threshold. An image's score is its best label score.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    similarity_threshold: f64,
}

impl QueryMatcher {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Score a term against a single label in `[0, 1]`
    pub fn score_label(term: &str, label: &str) -> f64 {
        let term = term.to_lowercase();
        let label = label.to_lowercase();

        if label.contains(&term) {
            1.0
        } else {
            strsim::normalized_levenshtein(&term, &label)
        }
    }

    /// Best matching label for a term, if any reaches the threshold
    pub fn best_label<'a>(&self, term: &str, labels: &'a LabelSet) -> Option<(&'a str, f64)> {
        labels
            .iter()
            .map(|label| (label, Self::score_label(term, label)))
            .filter(|(_, score)| *score >= self.similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Evaluate a term against candidates in order
    pub fn evaluate(&self, term: &str, candidates: &[Candidate], mode: SearchMode) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        for candidate in candidates {
            let Some((label, score)) = self.best_label(term, &candidate.labels) else {
                continue;
            };

            trace!(key = %candidate.key, label = %label, score, "Candidate matched");

            outcome.hits.push(MatchHit {
                key: candidate.key.clone(),
                label: label.to_string(),
                score,
                labels: candidate.labels.clone(),
            });

            if mode == SearchMode::First {
                break;
            }
        }

        outcome
    }
}

/// Builder for creating QueryMatcher with custom settings
pub struct QueryMatcherBuilder {
    similarity_threshold: f64,
}

impl QueryMatcherBuilder {
    pub fn new() -> Self {
        Self {
            similarity_threshold: 0.8,
        }
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn build(self) -> QueryMatcher {
        QueryMatcher::new(self.similarity_threshold)
    }
}

impl Default for QueryMatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
