//! OSV.dev source.
//!
//! With batching enabled, packages are submitted to `querybatch` in chunks
//! of [`MAX_BATCH_SIZE`] and the returned IDs are resolved through
//! `/v1/vulns/{id}` with at most [`DETAIL_CONCURRENCY`] requests in flight.
//! Without batching each package goes through the paginated `/v1/query`.

mod client;
mod processor;

pub use client::{
    OsvAffected, OsvAffectedPackage, OsvClient, OsvDatabaseSpecific, OsvRange, OsvReference,
    OsvSeverity, OsvVulnerability, DETAIL_CONCURRENCY, MAX_BATCH_SIZE,
};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{dedupe_packages, Source};
use crate::config::OsvSettings;
use crate::error::SourceError;
use crate::ignore::IgnorePolicy;
use crate::model::{Advisory, Package};
use crate::retry::Retrier;

pub struct OsvSource {
    client: OsvClient,
    policy: Arc<IgnorePolicy>,
}

impl OsvSource {
    pub fn new(
        settings: &OsvSettings,
        policy: Arc<IgnorePolicy>,
        retrier: Retrier,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: OsvClient::new(settings, retrier)?,
            policy,
        })
    }
}

#[async_trait]
impl Source for OsvSource {
    fn name(&self) -> &str {
        "osv"
    }

    async fn scan(&self, packages: &[Package]) -> Result<Vec<Advisory>, SourceError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let unique = dedupe_packages(packages);
        let vulns = self.client.fetch(&unique).await;
        let outcome = processor::process(&vulns, packages, &self.policy, self.client.ecosystem());

        debug!(
            records = vulns.len(),
            advisories = outcome.advisories.len(),
            ignored = outcome.ignored,
            "OSV scan finished"
        );
        Ok(outcome.advisories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::retry::tests::instant_retrier;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn source(server: &MockServer) -> OsvSource {
        let settings = OsvSettings {
            base_url: server.uri(),
            batch_retry: RetrySettings {
                max_attempts: 1,
                delay_ms: 0,
            },
            ..OsvSettings::default()
        };
        OsvSource::new(&settings, Arc::new(IgnorePolicy::default()), instant_retrier()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_scan_no_requests() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        assert!(source(&server).scan(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_packages_queried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/querybatch"))
            .respond_with(|req: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let count = body["queries"].as_array().map(Vec::len).unwrap_or(0);
                assert_eq!(count, 1, "duplicate packages must be coalesced");
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": [{"vulns": [{"id": "GHSA-1"}]}]}))
            })
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vulns/GHSA-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "GHSA-1",
                "summary": "Bad thing",
                "affected": [{
                    "package": {"name": "lodash", "ecosystem": "npm"},
                    "ranges": [{"type": "SEMVER", "events": [{"introduced": "0"}, {"fixed": "4.17.21"}]}]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let packages = vec![
            Package::new("lodash", "4.17.20"),
            Package::new("lodash", "4.17.20"),
        ];
        let advisories = source(&server).scan(&packages).await.unwrap();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].id, "GHSA-1");
    }
}
