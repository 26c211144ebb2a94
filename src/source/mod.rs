//! Vulnerability sources.
//!
//! A [`Source`] pairs a client (network access to one vulnerability database)
//! with a processor (matching raw records against the installed packages).
//!
//! | Source | Database | Transport |
//! |--------|----------|-----------|
//! | [`OsvSource`] | OSV.dev | batch query + per-ID detail fetch, or paginated per-package query |
//! | [`NpmSource`] | npm registry | gzip bulk advisory endpoint |
//!
//! # Example
//!
//! ```no_run
//! use vulngate::config::Config;
//! use vulngate::source::sources_from_config;
//! use vulngate::Package;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     for source in sources_from_config(&config)? {
//!         let advisories = source.scan(&[Package::new("lodash", "4.17.20")]).await?;
//!         println!("{}: {} advisories", source.name(), advisories.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod npm;
pub mod osv;

pub use npm::NpmSource;
pub use osv::OsvSource;

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::config::{Config, SourceMode};
use crate::error::SourceError;
use crate::ignore::IgnorePolicy;
use crate::model::{Advisory, Package};
use crate::retry::Retrier;

/// Maximum length of a description cut from long-form details.
pub const MAX_DESCRIPTION_CHARS: usize = 300;

/// One vulnerability database behind a uniform scan contract.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short identifier used in logs (`osv`, `npm`).
    fn name(&self) -> &str;

    /// Returns advisories for the affected packages among `packages`.
    ///
    /// Individual failed requests are logged and skipped; an error means the
    /// source could not produce anything at all.
    async fn scan(&self, packages: &[Package]) -> Result<Vec<Advisory>, SourceError>;
}

/// Builds the sources selected by `config.mode`.
pub fn sources_from_config(config: &Config) -> Result<Vec<Box<dyn Source>>, SourceError> {
    let policy = Arc::new(IgnorePolicy::compile(&config.ignore));
    let retrier = Retrier::new();
    debug!(policy = %policy, mode = ?config.mode, "building sources");

    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    if matches!(config.mode, SourceMode::Osv | SourceMode::Both) {
        sources.push(Box::new(OsvSource::new(
            &config.osv,
            Arc::clone(&policy),
            retrier.clone(),
        )?));
    }
    if matches!(config.mode, SourceMode::Npm | SourceMode::Both) {
        sources.push(Box::new(NpmSource::new(&config.npm, policy, retrier)?));
    }
    Ok(sources)
}

/// Coalesces duplicate `name@version` pairs, keeping first-seen order.
pub fn dedupe_packages(packages: &[Package]) -> Vec<Package> {
    let mut seen = HashSet::new();
    let unique: Vec<Package> = packages
        .iter()
        .filter(|p| seen.insert(p.key()))
        .cloned()
        .collect();

    if unique.len() < packages.len() {
        debug!(
            before = packages.len(),
            after = unique.len(),
            "deduplicated input packages"
        );
    }
    unique
}

/// A raw record from one database, as seen by the shared matching loop.
pub(crate) trait VulnerabilityRecord {
    fn id(&self) -> &str;

    /// Other identifiers for the same vulnerability, excluding [`id`](Self::id).
    fn aliases(&self) -> Vec<String>;

    /// Whether this record concerns packages named `name` at all.
    fn targets(&self, name: &str) -> bool;

    fn affects(&self, package: &Package) -> bool;

    fn to_advisory(&self, package: &Package, aliases: Vec<String>) -> Advisory;
}

#[derive(Debug, Default)]
pub(crate) struct ProcessOutcome {
    pub advisories: Vec<Advisory>,
    /// Matches suppressed by the ignore policy.
    pub ignored: usize,
}

/// Matches records against packages and applies the ignore policy.
///
/// Records are visited in order, then packages in input order. Each
/// `(record, package name)` pair produces at most one advisory, taken from
/// the first affected installed version.
pub(crate) fn process_records<R: VulnerabilityRecord>(
    records: &[R],
    packages: &[Package],
    policy: &IgnorePolicy,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut settled: HashSet<(String, String)> = HashSet::new();

    for record in records {
        let id = record.id();
        let aliases = record.aliases();

        for package in packages.iter().filter(|p| record.targets(&p.name)) {
            if !seen.insert(format!("{id}+{}", package.key())) {
                continue;
            }
            if settled.contains(&(id.to_string(), package.name.clone())) {
                continue;
            }
            if !record.affects(package) {
                continue;
            }

            settled.insert((id.to_string(), package.name.clone()));

            let decision = policy.should_ignore(id, &aliases, &package.name);
            if let Some(reason) = decision.reason() {
                debug!(id, package = %package, reason, "advisory ignored");
                outcome.ignored += 1;
                continue;
            }

            outcome
                .advisories
                .push(record.to_advisory(package, aliases.clone()));
        }
    }

    outcome
}

/// Picks a short description: the summary if present, else long-form
/// details cut to [`MAX_DESCRIPTION_CHARS`].
pub fn select_description(summary: Option<&str>, details: Option<&str>) -> Option<String> {
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(summary.to_string());
    }

    let details = details.map(str::trim).filter(|s| !s.is_empty())?;
    if details.chars().count() <= MAX_DESCRIPTION_CHARS {
        return Some(details.to_string());
    }

    if let Some(sentence) = first_sentence(details) {
        if sentence.chars().count() <= MAX_DESCRIPTION_CHARS {
            return Some(sentence.to_string());
        }
    }

    let cut: String = details.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    Some(format!("{}...", cut.trim_end()))
}

fn first_sentence(text: &str) -> Option<&str> {
    text.match_indices(". ")
        .next()
        .map(|(idx, _)| &text[..=idx])
        .or_else(|| text.find(".\n").map(|idx| &text[..=idx]))
}

static ADVISORY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(GHSA(?:-[0-9a-z]{4}){3}|CVE-\d{4}-\d{4,})\b").expect("valid regex")
});

/// Unions explicit aliases with IDs found in the reference URL, dropping
/// the primary ID and duplicates.
pub fn collect_aliases<I>(primary: &str, explicit: I, url: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let from_url = url
        .into_iter()
        .flat_map(|u| ADVISORY_ID.find_iter(u).map(|m| normalize_advisory_id(m.as_str())));

    let mut seen = HashSet::new();
    seen.insert(primary.to_string());

    explicit
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .chain(from_url)
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

fn normalize_advisory_id(raw: &str) -> String {
    if raw.len() > 5 && raw[..5].eq_ignore_ascii_case("GHSA-") {
        format!("GHSA-{}", raw[5..].to_ascii_lowercase())
    } else {
        raw.to_ascii_uppercase()
    }
}
