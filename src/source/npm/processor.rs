use super::client::NpmAdvisory;
use crate::ignore::IgnorePolicy;
use crate::matcher::{is_affected, AffectedSpec};
use crate::model::{Advisory, Package};
use crate::severity::{classify, SeveritySignals};
use crate::source::{collect_aliases, process_records, select_description, ProcessOutcome, VulnerabilityRecord};

const GITHUB_ADVISORY_URL: &str = "https://github.com/advisories";

/// An npm advisory with its ID rendered once.
pub(crate) struct NpmRecord<'a> {
    advisory: &'a NpmAdvisory,
    id: String,
}

pub(crate) fn process(
    advisories: &[NpmAdvisory],
    packages: &[Package],
    policy: &IgnorePolicy,
) -> ProcessOutcome {
    let records: Vec<NpmRecord<'_>> = advisories
        .iter()
        .map(|advisory| NpmRecord {
            advisory,
            id: advisory.id.to_string(),
        })
        .collect();
    process_records(&records, packages, policy)
}

impl NpmRecord<'_> {
    fn severity_signals(&self) -> SeveritySignals {
        let advisory = self.advisory;
        let mut signals =
            SeveritySignals::new(advisory.severity.and_then(|s| s.label()).map(str::to_string));

        if let Some(cvss) = &advisory.cvss {
            if let Some(score) = cvss.score {
                signals = signals.with_score(score.to_string());
            }
            if let Some(vector) = &cvss.vector_string {
                signals = signals.with_score(vector.clone());
            }
        }
        signals
    }

    fn url(&self) -> Option<String> {
        self.advisory
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                self.advisory
                    .github_advisory_id
                    .as_ref()
                    .map(|ghsa| format!("{GITHUB_ADVISORY_URL}/{ghsa}"))
            })
    }
}

impl VulnerabilityRecord for NpmRecord<'_> {
    fn id(&self) -> &str {
        &self.id
    }

    fn aliases(&self) -> Vec<String> {
        let explicit = self
            .advisory
            .cves
            .iter()
            .flatten()
            .chain(self.advisory.github_advisory_id.iter())
            .cloned();
        collect_aliases(&self.id, explicit, self.advisory.url.as_deref())
    }

    fn targets(&self, name: &str) -> bool {
        self.advisory.name.as_deref() == Some(name)
    }

    fn affects(&self, package: &Package) -> bool {
        match self.advisory.vulnerable_versions.as_deref() {
            Some(range) => is_affected(&package.version, &AffectedSpec::Range(range)),
            None => false,
        }
    }

    fn to_advisory(&self, package: &Package, aliases: Vec<String>) -> Advisory {
        let message = self
            .advisory
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Vulnerability {} in {}", self.id, package.name));

        Advisory {
            id: self.id.clone(),
            message,
            level: classify(&self.severity_signals()),
            package: package.name.clone(),
            url: self.url(),
            description: select_description(None, self.advisory.overview.as_deref()),
            aliases,
        }
    }
}
