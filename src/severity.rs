//! Severity Classifier.
//!
//! Sources describe severity in different ways: a textual database level,
//! bare CVSS scores, or CVSS vector strings ending in a score. Everything is
//! collapsed to [`Level::Fatal`] or [`Level::Warn`]:
//!
//! 1. textual `CRITICAL` / `HIGH` is fatal and decides immediately
//! 2. otherwise the highest numeric score is compared against [`FATAL_SCORE`]
//! 3. no usable data at all is a warning

use crate::model::Level;

/// Scores at or above this are fatal.
pub const FATAL_SCORE: f64 = 7.0;

/// Raw severity evidence extracted from one vulnerability record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeveritySignals {
    /// Explicit textual level (`CRITICAL`, `high`, `MODERATE`, ...).
    pub label: Option<String>,
    /// Bare scores (`"9.8"`) or vectors whose last token is the score.
    pub scores: Vec<String>,
}

impl SeveritySignals {
    pub fn new(label: Option<String>) -> Self {
        Self {
            label,
            scores: Vec::new(),
        }
    }

    pub fn with_score(mut self, score: impl Into<String>) -> Self {
        self.scores.push(score.into());
        self
    }

    /// Highest parsable score, if any.
    pub fn max_score(&self) -> Option<f64> {
        self.scores
            .iter()
            .filter_map(|s| parse_score(s))
            .reduce(f64::max)
    }
}

pub fn classify(signals: &SeveritySignals) -> Level {
    if let Some(label) = &signals.label {
        if is_fatal_label(label) {
            return Level::Fatal;
        }
    }

    match signals.max_score() {
        Some(score) if score >= FATAL_SCORE => Level::Fatal,
        _ => Level::Warn,
    }
}

fn is_fatal_label(label: &str) -> bool {
    let label = label.trim();
    label.eq_ignore_ascii_case("critical") || label.eq_ignore_ascii_case("high")
}

/// Parses `"7.5"` or a vector such as `"CVSS:3.1/AV:N/.../A:H/9.8"`.
pub fn parse_score(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Ok(score) = raw.parse::<f64>() {
        return score.is_finite().then_some(score);
    }

    raw.rsplit(['/', ' '])
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|score| score.is_finite())
}
