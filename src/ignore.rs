//! Ignore Policy.
//!
//! [`IgnoreConfig`] is what users write; [`IgnorePolicy`] is the compiled
//! form with hash-set lookups, built once per scan and shared read-only by
//! every source.
//!
//! ```toml
//! [ignore]
//! ids = ["CVE-2021-23337"]
//!
//! [ignore.packages.lodash]
//! ids = ["GHSA-35jh-r3h4-6jhm"]
//! until = "2027-01-01"
//! reason = "prototype pollution path not reachable"
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// User-facing ignore rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Advisory IDs (or aliases) ignored for every package.
    pub ids: Vec<String>,

    /// Rules scoped to a single package name.
    pub packages: HashMap<String, PackageIgnore>,
}

/// Ignore rule for one package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageIgnore {
    pub ids: Vec<String>,

    /// Expiry as RFC 3339 or `YYYY-MM-DD` (midnight UTC). Once passed the
    /// whole rule stops applying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreDecision {
    Keep,
    Ignored { reason: String },
}

impl IgnoreDecision {
    pub fn is_ignored(&self) -> bool {
        matches!(self, IgnoreDecision::Ignored { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            IgnoreDecision::Keep => None,
            IgnoreDecision::Ignored { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expiry {
    Never,
    At(DateTime<Utc>),
    /// Unparsable date: the rule never applies.
    Invalid,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    ids: HashSet<String>,
    expiry: Expiry,
    reason: Option<String>,
}

impl CompiledRule {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::At(until) => until < now,
            Expiry::Invalid => true,
        }
    }
}

/// Compiled ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    global: HashSet<String>,
    packages: HashMap<String, CompiledRule>,
}

impl IgnorePolicy {
    pub fn compile(config: &IgnoreConfig) -> Self {
        let global = config.ids.iter().cloned().collect();
        let packages = config
            .packages
            .iter()
            .map(|(name, rule)| {
                let expiry = match rule.until.as_deref() {
                    None => Expiry::Never,
                    Some(raw) => parse_expiry(raw).map(Expiry::At).unwrap_or_else(|| {
                        tracing::warn!(
                            package = %name,
                            until = raw,
                            "unparsable ignore expiry, rule disabled"
                        );
                        Expiry::Invalid
                    }),
                };
                let compiled = CompiledRule {
                    ids: rule.ids.iter().cloned().collect(),
                    expiry,
                    reason: rule.reason.clone().filter(|r| !r.trim().is_empty()),
                };
                (name.clone(), compiled)
            })
            .collect();

        Self { global, packages }
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.packages.is_empty()
    }

    pub fn should_ignore(&self, vuln_id: &str, aliases: &[String], package: &str) -> IgnoreDecision {
        self.should_ignore_at(vuln_id, aliases, package, Utc::now())
    }

    /// Evaluates the policy at a fixed instant.
    pub fn should_ignore_at(
        &self,
        vuln_id: &str,
        aliases: &[String],
        package: &str,
        now: DateTime<Utc>,
    ) -> IgnoreDecision {
        let mut candidates = std::iter::once(vuln_id).chain(aliases.iter().map(String::as_str));

        if let Some(hit) = candidates.clone().find(|id| self.global.contains(*id)) {
            return IgnoreDecision::Ignored {
                reason: format!("globally ignored ({hit})"),
            };
        }

        let Some(rule) = self.packages.get(package) else {
            return IgnoreDecision::Keep;
        };
        if rule.is_expired(now) {
            return IgnoreDecision::Keep;
        }

        match candidates.find(|id| rule.ids.contains(*id)) {
            Some(hit) => IgnoreDecision::Ignored {
                reason: rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("ignored for {package} ({hit})")),
            },
            None => IgnoreDecision::Keep,
        }
    }
}

impl fmt::Display for IgnorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} global ids, {} package rules",
            self.global.len(),
            self.packages.len()
        )
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
