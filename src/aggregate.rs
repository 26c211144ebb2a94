//! Multi-source aggregation.
//!
//! The [`Aggregator`] runs every configured [`Source`] concurrently and
//! merges their advisories. Two advisories for the same package describe
//! the same vulnerability when their identity sets (`id` plus aliases)
//! intersect. Of a duplicate group the most severe advisory survives;
//! on equal severity the one seen first is kept.
//!
//! A failing source contributes nothing and never fails the scan.

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::{error, info};

use crate::config::Config;
use crate::error::ScanError;
use crate::model::{Advisory, Package};
use crate::source::{sources_from_config, Source};

pub struct Aggregator {
    sources: Vec<Box<dyn Source>>,
}

impl Aggregator {
    /// Fails with [`ScanError::NoSources`] when `sources` is empty.
    pub fn new(sources: Vec<Box<dyn Source>>) -> Result<Self, ScanError> {
        if sources.is_empty() {
            return Err(ScanError::NoSources);
        }
        Ok(Self { sources })
    }

    pub fn from_config(config: &Config) -> Result<Self, ScanError> {
        Self::new(sources_from_config(config)?)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Scans `packages` with every source and returns the merged advisories.
    pub async fn scan(&self, packages: &[Package]) -> Vec<Advisory> {
        if packages.is_empty() {
            return Vec::new();
        }

        let results = join_all(self.sources.iter().map(|source| async move {
            (source.name(), source.scan(packages).await)
        }))
        .await;

        let mut collected = Vec::new();
        for (name, result) in results {
            match result {
                Ok(advisories) => {
                    info!(source = name, count = advisories.len(), "source finished");
                    collected.extend(advisories);
                }
                Err(e) => error!(source = name, error = %e, "source failed, continuing without it"),
            }
        }

        merge_advisories(collected)
    }
}

/// Deduplicates advisories across sources by package-scoped identity.
pub fn merge_advisories(advisories: impl IntoIterator<Item = Advisory>) -> Vec<Advisory> {
    let mut merger = Merger::default();
    for advisory in advisories {
        merger.insert(advisory);
    }
    merger.finish()
}

struct Slot {
    advisory: Advisory,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct Merger {
    slots: Vec<Option<Slot>>,
    index: HashMap<String, usize>,
}

impl Merger {
    fn insert(&mut self, advisory: Advisory) {
        let keys: BTreeSet<String> = advisory
            .identity()
            .map(|id| identity_key(&advisory.package, id))
            .collect();

        let mut owners: Vec<usize> = keys.iter().filter_map(|k| self.index.get(k).copied()).collect();
        owners.sort_unstable();
        owners.dedup();

        let Some(&target) = owners.first() else {
            let slot = self.slots.len();
            for key in &keys {
                self.index.insert(key.clone(), slot);
            }
            self.slots.push(Some(Slot { advisory, keys }));
            return;
        };

        let mut merged = keys;
        let mut incumbent: Option<Advisory> = None;
        for owner in owners {
            let Some(slot) = self.slots[owner].take() else {
                continue;
            };
            merged.extend(slot.keys);
            let replace = incumbent
                .as_ref()
                .is_none_or(|current| slot.advisory.level > current.level);
            if replace {
                incumbent = Some(slot.advisory);
            }
        }

        let winner = match incumbent {
            Some(current) if current.level >= advisory.level => current,
            _ => advisory,
        };

        for key in &merged {
            self.index.insert(key.clone(), target);
        }
        self.slots[target] = Some(Slot {
            advisory: winner,
            keys: merged,
        });
    }

    fn finish(self) -> Vec<Advisory> {
        self.slots
            .into_iter()
            .flatten()
            .map(|slot| slot.advisory)
            .collect()
    }
}

fn identity_key(package: &str, id: &str) -> String {
    format!("{package}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::model::Level;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn advisory(id: &str, aliases: &[&str], level: Level, package: &str) -> Advisory {
        Advisory {
            id: id.to_string(),
            message: format!("{id} message"),
            level,
            package: package.to_string(),
            url: None,
            description: None,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }

    struct StaticSource {
        name: &'static str,
        result: Result<Vec<Advisory>, u16>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticSource {
        fn ok(name: &'static str, advisories: Vec<Advisory>) -> Box<dyn Source> {
            Box::new(Self {
                name,
                result: Ok(advisories),
                calls: Arc::default(),
            })
        }

        fn failing(name: &'static str) -> Box<dyn Source> {
            Box::new(Self {
                name,
                result: Err(503),
                calls: Arc::default(),
            })
        }
    }

    #[async_trait]
    impl Source for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn scan(&self, packages: &[Package]) -> Result<Vec<Advisory>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if packages.is_empty() {
                return Ok(Vec::new());
            }
            match &self.result {
                Ok(advisories) => Ok(advisories.clone()),
                Err(status) => Err(SourceError::Status {
                    status: *status,
                    url: "https://example.invalid".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_no_sources_is_error() {
        assert!(matches!(Aggregator::new(Vec::new()), Err(ScanError::NoSources)));
    }

    #[test]
    fn test_alias_duplicate_keeps_fatal() {
        let merged = merge_advisories(vec![
            advisory("GHSA-x", &["CVE-1"], Level::Warn, "lodash"),
            advisory("CVE-1", &[], Level::Fatal, "lodash"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].level, Level::Fatal);
        assert_eq!(merged[0].id, "CVE-1");
        // The survivor is passed through untouched.
        assert_eq!(merged[0], advisory("CVE-1", &[], Level::Fatal, "lodash"));
    }

    #[test]
    fn test_merged_group_answers_to_either_id() {
        let mut merger = Merger::default();
        merger.insert(advisory("GHSA-x", &["CVE-1"], Level::Warn, "lodash"));
        merger.insert(advisory("CVE-1", &[], Level::Fatal, "lodash"));

        let slot = merger.index["lodash:GHSA-x"];
        assert_eq!(merger.index["lodash:CVE-1"], slot);
        let keys = &merger.slots[slot].as_ref().unwrap().keys;
        assert!(keys.contains("lodash:GHSA-x"));
        assert!(keys.contains("lodash:CVE-1"));

        // A later report under the ID the survivor dropped still lands on it.
        merger.insert(advisory("GHSA-x", &[], Level::Warn, "lodash"));
        let merged = merger.finish();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "CVE-1");
        assert_eq!(merged[0].level, Level::Fatal);
        assert!(merged[0].aliases.is_empty());
    }

    #[test]
    fn test_fatal_first_not_replaced_by_warn() {
        let merged = merge_advisories(vec![
            advisory("CVE-1", &[], Level::Fatal, "lodash"),
            advisory("GHSA-x", &["CVE-1"], Level::Warn, "lodash"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "CVE-1");
    }

    #[test]
    fn test_tie_keeps_incumbent() {
        let merged = merge_advisories(vec![
            advisory("GHSA-x", &["CVE-1"], Level::Warn, "lodash"),
            advisory("CVE-1", &[], Level::Warn, "lodash"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "GHSA-x");
    }

    #[test]
    fn test_different_packages_not_merged() {
        let merged = merge_advisories(vec![
            advisory("CVE-1", &[], Level::Warn, "lodash"),
            advisory("CVE-1", &[], Level::Warn, "lodash-es"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_transitive_chain_collapses() {
        let merged = merge_advisories(vec![
            advisory("A", &["X"], Level::Warn, "pkg"),
            advisory("B", &["A"], Level::Warn, "pkg"),
            advisory("X", &[], Level::Fatal, "pkg"),
            advisory("B", &[], Level::Warn, "pkg"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "X");
    }

    #[test]
    fn test_bridge_merges_two_groups() {
        let merged = merge_advisories(vec![
            advisory("A", &[], Level::Warn, "pkg"),
            advisory("B", &[], Level::Fatal, "pkg"),
            advisory("C", &["A", "B"], Level::Warn, "pkg"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "B");
    }

    #[test]
    fn test_distinct_advisories_kept_in_order() {
        let merged = merge_advisories(vec![
            advisory("A", &[], Level::Warn, "pkg"),
            advisory("B", &[], Level::Fatal, "pkg"),
        ]);
        let ids: Vec<&str> = merged.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_fail_scan() {
        let aggregator = Aggregator::new(vec![
            StaticSource::failing("broken"),
            StaticSource::ok("osv", vec![advisory("GHSA-x", &[], Level::Warn, "lodash")]),
        ])
        .unwrap();

        let advisories = aggregator.scan(&[Package::new("lodash", "4.17.20")]).await;
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].id, "GHSA-x");
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_empty() {
        let aggregator =
            Aggregator::new(vec![StaticSource::failing("a"), StaticSource::failing("b")]).unwrap();
        assert!(aggregator.scan(&[Package::new("lodash", "1.0.0")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_cross_source_dedup() {
        let aggregator = Aggregator::new(vec![
            StaticSource::ok("osv", vec![advisory("GHSA-x", &["CVE-1"], Level::Warn, "lodash")]),
            StaticSource::ok("npm", vec![advisory("CVE-1", &[], Level::Fatal, "lodash")]),
        ])
        .unwrap();

        let advisories = aggregator.scan(&[Package::new("lodash", "4.17.20")]).await;
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].level, Level::Fatal);
        assert_eq!(aggregator.source_names(), vec!["osv", "npm"]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = StaticSource {
            name: "osv",
            result: Ok(vec![advisory("A", &[], Level::Warn, "x")]),
            calls: Arc::clone(&calls),
        };
        let aggregator = Aggregator::new(vec![Box::new(source)]).unwrap();
        assert!(aggregator.scan(&[]).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
