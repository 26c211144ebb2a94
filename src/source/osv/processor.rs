use super::client::{OsvAffected, OsvVulnerability};
use crate::ignore::IgnorePolicy;
use crate::matcher::{is_affected, AffectedSpec};
use crate::model::{Advisory, Package};
use crate::severity::{classify, SeveritySignals};
use crate::source::{collect_aliases, process_records, select_description, ProcessOutcome, VulnerabilityRecord};

const OSV_VULN_URL: &str = "https://osv.dev/vulnerability";

/// An OSV record scoped to the ecosystem being scanned.
pub(crate) struct OsvRecord<'a> {
    vuln: &'a OsvVulnerability,
    ecosystem: &'a str,
}

pub(crate) fn process(
    vulns: &[OsvVulnerability],
    packages: &[Package],
    policy: &IgnorePolicy,
    ecosystem: &str,
) -> ProcessOutcome {
    let records: Vec<OsvRecord<'_>> = vulns
        .iter()
        .map(|vuln| OsvRecord { vuln, ecosystem })
        .collect();
    process_records(&records, packages, policy)
}

impl<'a> OsvRecord<'a> {
    /// `affected` entries for `name` in the scanned ecosystem. Entries
    /// without an ecosystem are accepted.
    fn affected_for<'s>(&self, name: &'s str) -> impl Iterator<Item = &'a OsvAffected> + 's
    where
        'a: 's,
    {
        let ecosystem = self.ecosystem;
        self.vuln.affected.iter().filter(move |affected| {
            affected.package.as_ref().is_some_and(|p| {
                p.name == name
                    && p.ecosystem
                        .as_deref()
                        .is_none_or(|e| e.eq_ignore_ascii_case(ecosystem))
            })
        })
    }

    fn severity_signals(&self, name: &str) -> SeveritySignals {
        let label = self
            .vuln
            .database_specific
            .as_ref()
            .and_then(|d| d.severity.clone())
            .or_else(|| {
                self.affected_for(name)
                    .find_map(|a| a.database_specific.as_ref()?.severity.clone())
            });

        let scores = self
            .vuln
            .severity
            .iter()
            .chain(self.affected_for(name).flat_map(|a| a.severity.iter()))
            .map(|s| s.score.clone())
            .collect();

        SeveritySignals { label, scores }
    }

    /// `ADVISORY` reference first, then `WEB`, then anything.
    fn reference_url(&self) -> String {
        let refs = &self.vuln.references;
        ["ADVISORY", "WEB"]
            .iter()
            .find_map(|kind| {
                refs.iter()
                    .find(|r| r.kind.as_deref() == Some(*kind))
                    .map(|r| r.url.clone())
            })
            .or_else(|| refs.first().map(|r| r.url.clone()))
            .unwrap_or_else(|| format!("{OSV_VULN_URL}/{}", self.vuln.id))
    }
}

impl VulnerabilityRecord for OsvRecord<'_> {
    fn id(&self) -> &str {
        &self.vuln.id
    }

    fn aliases(&self) -> Vec<String> {
        let url = self.reference_url();
        collect_aliases(&self.vuln.id, self.vuln.aliases.iter().cloned(), Some(&url))
    }

    fn targets(&self, name: &str) -> bool {
        self.affected_for(name).next().is_some()
    }

    fn affects(&self, package: &Package) -> bool {
        self.affected_for(&package.name).any(|affected| {
            if is_affected(&package.version, &AffectedSpec::Versions(&affected.versions)) {
                return true;
            }
            affected
                .ranges
                .iter()
                .filter(|r| matches!(r.kind.as_str(), "SEMVER" | "ECOSYSTEM"))
                .any(|r| is_affected(&package.version, &AffectedSpec::Events(&r.events)))
        })
    }

    fn to_advisory(&self, package: &Package, aliases: Vec<String>) -> Advisory {
        let vuln = self.vuln;
        let message = vuln
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&vuln.id)
            .to_string();

        Advisory {
            id: vuln.id.clone(),
            message,
            level: classify(&self.severity_signals(&package.name)),
            package: package.name.clone(),
            url: Some(self.reference_url()),
            description: select_description(vuln.summary.as_deref(), vuln.details.as_deref()),
            aliases,
        }
    }
}
