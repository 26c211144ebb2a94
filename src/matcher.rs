//! Version Matcher.
//!
//! Decides whether a concrete version falls inside an affected-version
//! specification. Three shapes are supported:
//!
//! - npm-style range strings (`">=1.0.0 <2.0.0 || ^3.1.0"`)
//! - OSV event ranges (`introduced` / `fixed` / `last_affected`)
//! - explicit version lists
//!
//! Matching fails closed: unparsable versions or ranges are reported as
//! [`MatchError`] and callers treat them as "not affected".

use semver::{Version, VersionReq};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("unparsable version '{0}'")]
    Version(String),
    #[error("unparsable range '{range}': {reason}")]
    Range { range: String, reason: String },
}

/// One boundary event in an OSV affected range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeEvent {
    Introduced(String),
    Fixed(String),
    LastAffected(String),
    Limit(String),
}

/// An affected-version specification in any supported shape.
#[derive(Debug, Clone)]
pub enum AffectedSpec<'a> {
    Range(&'a str),
    Events(&'a [RangeEvent]),
    Versions(&'a [String]),
}

/// Fail-closed entry point: any parse problem yields `false`.
pub fn is_affected(version: &str, spec: &AffectedSpec<'_>) -> bool {
    match try_is_affected(version, spec) {
        Ok(affected) => affected,
        Err(err) => {
            tracing::debug!(version, error = %err, "treating as not affected");
            false
        }
    }
}

/// Like [`is_affected`] but surfaces parse problems to the caller.
pub fn try_is_affected(version: &str, spec: &AffectedSpec<'_>) -> Result<bool, MatchError> {
    match spec {
        AffectedSpec::Versions(list) => Ok(list.iter().any(|v| same_version(v, version))),
        AffectedSpec::Range(range) => {
            let version = parse_version(version)?;
            range_matches(range, &version)
        }
        AffectedSpec::Events(events) => {
            let version = parse_version(version)?;
            events_match(events, &version)
        }
    }
}

pub fn parse_version(raw: &str) -> Result<Version, MatchError> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|_| MatchError::Version(raw.to_string()))
}

fn same_version(listed: &str, version: &str) -> bool {
    if listed == version {
        return true;
    }
    match (parse_version(listed), parse_version(version)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Evaluates an npm-style range: `||`-separated alternatives, each a set of
/// whitespace-separated comparators or a hyphen range.
/// A malformed alternative only fails the range when no other alternative matches.
fn range_matches(range: &str, version: &Version) -> Result<bool, MatchError> {
    let mut malformed = None;
    for alternative in range.split("||") {
        match parse_alternative(alternative) {
            Ok(req) if req.matches(version) => return Ok(true),
            Ok(_) => {}
            Err(reason) => {
                malformed.get_or_insert(reason);
            }
        }
    }
    match malformed {
        Some(reason) => Err(MatchError::Range {
            range: range.to_string(),
            reason,
        }),
        None => Ok(false),
    }
}

fn parse_alternative(alternative: &str) -> Result<VersionReq, String> {
    let alternative = alternative.trim();
    if alternative.is_empty() || alternative == "*" || alternative.eq_ignore_ascii_case("x") {
        return Ok(VersionReq::STAR);
    }

    let comparators = match alternative.split_once(" - ") {
        Some((low, high)) => vec![
            normalize_comparator(&format!(">={}", low.trim())),
            normalize_comparator(&format!("<={}", high.trim())),
        ],
        None => join_operators(alternative)
            .into_iter()
            .map(|c| normalize_comparator(&c))
            .collect(),
    };

    VersionReq::parse(&comparators.join(", ")).map_err(|e| e.to_string())
}

/// Splits on whitespace, gluing a detached operator (`>= 1.0.0`) to its version.
fn join_operators(alternative: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut pending: Option<&str> = None;
    for token in alternative.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending = Some(token);
            continue;
        }
        match pending.take() {
            Some(op) => out.push(format!("{op}{token}")),
            None => out.push(token.to_string()),
        }
    }
    out
}

/// npm treats a bare version as exact while `semver` treats it as caret.
/// A `v` prefix is dropped after any operator.
fn normalize_comparator(comparator: &str) -> String {
    let split = comparator
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '^' | '~'))
        .unwrap_or(comparator.len());
    let (op, rest) = comparator.split_at(split);
    let rest = rest.trim_start_matches(['v', 'V']);

    let starts_with_digit = rest.chars().next().is_some_and(|c| c.is_ascii_digit());
    let has_wildcard = rest
        .split(['.', '-', '+'])
        .any(|part| matches!(part, "x" | "X" | "*"));

    if op.is_empty() && starts_with_digit && !has_wildcard {
        format!("={rest}")
    } else {
        format!("{op}{rest}")
    }
}

/// Walks events in order: `introduced` opens an interval, `fixed` closes it
/// exclusively, `last_affected` closes it inclusively. Intervals are unioned.
fn events_match(events: &[RangeEvent], version: &Version) -> Result<bool, MatchError> {
    let mut affected = false;
    let mut open: Option<Option<Version>> = None;

    for event in events {
        match event {
            RangeEvent::Introduced(raw) => {
                let start = if raw == "0" {
                    None
                } else {
                    Some(parse_version(raw)?)
                };
                open = Some(start);
            }
            RangeEvent::Fixed(raw) => {
                if let Some(start) = open.take() {
                    let end = parse_version(raw)?;
                    affected |= at_least(version, start.as_ref()) && version < &end;
                }
            }
            RangeEvent::LastAffected(raw) => {
                if let Some(start) = open.take() {
                    let end = parse_version(raw)?;
                    affected |= at_least(version, start.as_ref()) && version <= &end;
                }
            }
            RangeEvent::Limit(_) => {}
        }
    }

    if let Some(start) = open {
        affected |= at_least(version, start.as_ref());
    }

    Ok(affected)
}

fn at_least(version: &Version, start: Option<&Version>) -> bool {
    start.is_none_or(|start| version >= start)
}
