use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OsvSettings;
use crate::error::SourceError;
use crate::http::{build_client, read_json};
use crate::matcher::RangeEvent;
use crate::model::Package;
use crate::retry::{Retrier, RetryConfig};

/// Maximum number of queries in one `querybatch` request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// How many vulnerability details are fetched concurrently.
pub const DETAIL_CONCURRENCY: usize = 10;

/// Client for the OSV.dev API.
pub struct OsvClient {
    client: Client,
    base_url: String,
    ecosystem: String,
    batch: bool,
    batch_retry: RetryConfig,
    detail_retry: RetryConfig,
    retrier: Retrier,
}

impl OsvClient {
    pub fn new(settings: &OsvSettings, retrier: Retrier) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(Duration::from_secs(settings.timeout_secs))?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            ecosystem: settings.ecosystem.clone(),
            batch: settings.batch,
            batch_retry: settings.batch_retry.into(),
            detail_retry: settings.detail_retry.into(),
            retrier,
        })
    }

    pub fn ecosystem(&self) -> &str {
        &self.ecosystem
    }

    /// Fetches full records for every vulnerability affecting `packages`.
    ///
    /// `packages` is expected to be deduplicated already. Failed batches,
    /// queries and detail fetches are logged and skipped.
    pub async fn fetch(&self, packages: &[Package]) -> Vec<OsvVulnerability> {
        if packages.is_empty() {
            return Vec::new();
        }
        if self.batch {
            self.fetch_batched(packages).await
        } else {
            self.fetch_per_package(packages).await
        }
    }

    async fn fetch_batched(&self, packages: &[Package]) -> Vec<OsvVulnerability> {
        let mut ids = UniqueIds::default();

        for (index, chunk) in packages.chunks(MAX_BATCH_SIZE).enumerate() {
            let results = match self.query_batch(chunk).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(batch = index, size = chunk.len(), error = %e, "OSV batch failed, skipping");
                    continue;
                }
            };

            if results.len() != chunk.len() {
                warn!(
                    batch = index,
                    expected = chunk.len(),
                    received = results.len(),
                    "OSV batch returned unexpected result count"
                );
            }

            for (package, result) in chunk.iter().zip(results) {
                if result.next_page_token.is_some() {
                    // Batch results are truncated; the single query walks every page.
                    match self.query_package(package).await {
                        Ok(vulns) => ids.extend(vulns.into_iter().map(|v| v.id)),
                        Err(e) => {
                            warn!(package = %package, error = %e, "OSV pagination failed");
                            ids.extend(result.vulns.into_iter().map(|v| v.id));
                        }
                    }
                } else {
                    ids.extend(result.vulns.into_iter().map(|v| v.id));
                }
            }
        }

        debug!(count = ids.len(), "OSV batch queries returned vulnerability ids");
        self.fetch_details(&ids.into_vec()).await
    }

    async fn query_batch(&self, chunk: &[Package]) -> Result<Vec<OsvBatchResult>, SourceError> {
        let url = format!("{}/v1/querybatch", self.base_url);
        let body = OsvBatchQuery {
            queries: chunk.iter().map(|p| self.query_for(p, None)).collect(),
        };

        let response: OsvBatchResponse = self
            .retrier
            .run("osv querybatch", &self.batch_retry, || async {
                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| SourceError::from_reqwest(&url, e))?;
                read_json(&url, response).await
            })
            .await?;

        Ok(response.results)
    }

    /// Fetches details with bounded fan-out; failed IDs are dropped.
    async fn fetch_details(&self, ids: &[String]) -> Vec<OsvVulnerability> {
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(DETAIL_CONCURRENCY) {
            let results = join_all(chunk.iter().map(|id| self.get_vulnerability(id))).await;
            for (id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(id = %id, error = %e, "failed to fetch OSV vulnerability"),
                }
            }
        }

        records
    }

    /// `GET /v1/vulns/{id}`.
    pub async fn get_vulnerability(&self, id: &str) -> Result<OsvVulnerability, SourceError> {
        let url = format!("{}/v1/vulns/{}", self.base_url, id);
        self.retrier
            .run("osv vuln detail", &self.detail_retry, || async {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| SourceError::from_reqwest(&url, e))?;
                read_json(&url, response).await
            })
            .await
    }

    async fn fetch_per_package(&self, packages: &[Package]) -> Vec<OsvVulnerability> {
        let results = join_all(packages.iter().map(|p| self.query_package(p))).await;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (package, result) in packages.iter().zip(results) {
            match result {
                Ok(vulns) => records.extend(vulns.into_iter().filter(|v| seen.insert(v.id.clone()))),
                Err(e) => warn!(package = %package, error = %e, "OSV query failed, skipping package"),
            }
        }
        records
    }

    /// `POST /v1/query`, following `next_page_token` until exhausted.
    pub async fn query_package(&self, package: &Package) -> Result<Vec<OsvVulnerability>, SourceError> {
        let url = format!("{}/v1/query", self.base_url);
        let mut vulns = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let body = self.query_for(package, page_token.as_deref());
            let page: OsvQueryResponse = self
                .retrier
                .run("osv query", &self.batch_retry, || async {
                    let response = self
                        .client
                        .post(&url)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| SourceError::from_reqwest(&url, e))?;
                    read_json(&url, response).await
                })
                .await?;

            vulns.extend(page.vulns);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    debug!(package = %package, "following OSV page token");
                    page_token = Some(token);
                }
                None => break,
            }
        }

        Ok(vulns)
    }

    fn query_for<'a>(&'a self, package: &'a Package, page_token: Option<&'a str>) -> OsvQuery<'a> {
        OsvQuery {
            package: OsvPackageRef {
                name: &package.name,
                ecosystem: &self.ecosystem,
            },
            version: &package.version,
            page_token,
        }
    }
}

/// Insertion-ordered set of vulnerability IDs.
#[derive(Default)]
struct UniqueIds {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl UniqueIds {
    fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ordered.push(id);
            }
        }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

#[derive(Debug, Serialize)]
struct OsvPackageRef<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Serialize)]
struct OsvQuery<'a> {
    package: OsvPackageRef<'a>,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OsvBatchQuery<'a> {
    queries: Vec<OsvQuery<'a>>,
}

#[derive(Debug, Deserialize)]
struct OsvBatchResponse {
    #[serde(default)]
    results: Vec<OsvBatchResult>,
}

#[derive(Debug, Deserialize)]
struct OsvBatchResult {
    #[serde(default)]
    vulns: Vec<OsvVulnStub>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvVulnStub {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OsvQueryResponse {
    #[serde(default)]
    vulns: Vec<OsvVulnerability>,
    next_page_token: Option<String>,
}

/// A full OSV vulnerability record.
#[derive(Debug, Clone, Deserialize)]
pub struct OsvVulnerability {
    pub id: String,
    pub summary: Option<String>,
    pub details: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub severity: Vec<OsvSeverity>,
    #[serde(default)]
    pub affected: Vec<OsvAffected>,
    #[serde(default)]
    pub references: Vec<OsvReference>,
    pub database_specific: Option<OsvDatabaseSpecific>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvSeverity {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub score: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvAffected {
    pub package: Option<OsvAffectedPackage>,
    #[serde(default)]
    pub ranges: Vec<OsvRange>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub severity: Vec<OsvSeverity>,
    pub database_specific: Option<OsvDatabaseSpecific>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvAffectedPackage {
    pub name: String,
    pub ecosystem: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvRange {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub events: Vec<RangeEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvReference {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvDatabaseSpecific {
    pub severity: Option<String>,
}
