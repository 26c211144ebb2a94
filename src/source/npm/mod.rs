//! npm registry source.
//!
//! Sends one gzip-compressed `{name: [versions]}` map per chunk of up to
//! [`MAX_PACKAGES_PER_REQUEST`] package names and matches the returned
//! `vulnerable_versions` ranges locally.

mod client;
mod processor;

pub use client::{AdvisoryId, NpmAdvisory, NpmClient, NpmCvss, NpmSeverity, MAX_PACKAGES_PER_REQUEST};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{dedupe_packages, Source};
use crate::config::NpmSettings;
use crate::error::SourceError;
use crate::ignore::IgnorePolicy;
use crate::model::{Advisory, Package};
use crate::retry::Retrier;

pub struct NpmSource {
    client: NpmClient,
    policy: Arc<IgnorePolicy>,
}

impl NpmSource {
    pub fn new(
        settings: &NpmSettings,
        policy: Arc<IgnorePolicy>,
        retrier: Retrier,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: NpmClient::new(settings, retrier)?,
            policy,
        })
    }
}

#[async_trait]
impl Source for NpmSource {
    fn name(&self) -> &str {
        "npm"
    }

    async fn scan(&self, packages: &[Package]) -> Result<Vec<Advisory>, SourceError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let unique = dedupe_packages(packages);
        let records = self.client.fetch(&unique).await;
        let outcome = processor::process(&records, packages, &self.policy);

        debug!(
            records = records.len(),
            advisories = outcome.advisories.len(),
            ignored = outcome.ignored,
            "npm scan finished"
        );
        Ok(outcome.advisories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::ignore::{IgnoreConfig, PackageIgnore};
    use crate::model::Level;
    use crate::retry::tests::instant_retrier;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, ignore: &IgnoreConfig) -> NpmSource {
        let settings = NpmSettings {
            base_url: server.uri(),
            retry: RetrySettings {
                max_attempts: 1,
                delay_ms: 0,
            },
            ..NpmSettings::default()
        };
        NpmSource::new(
            &settings,
            Arc::new(IgnorePolicy::compile(ignore)),
            instant_retrier(),
        )
        .unwrap()
    }

    async fn mount_lodash(server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lodash": [{
                    "id": 1096470,
                    "title": "Command Injection in lodash",
                    "severity": "high",
                    "url": "https://github.com/advisories/GHSA-35jh-r3h4-6jhm",
                    "vulnerable_versions": "<4.17.21"
                }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_scan_end_to_end() {
        let server = MockServer::start().await;
        mount_lodash(&server).await;

        let advisories = source(&server, &IgnoreConfig::default())
            .scan(&[Package::new("lodash", "4.17.20")])
            .await
            .unwrap();

        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].level, Level::Fatal);
        assert_eq!(advisories[0].message, "Command Injection in lodash");
    }

    #[tokio::test]
    async fn test_expired_package_rule_does_not_suppress() {
        let server = MockServer::start().await;
        mount_lodash(&server).await;

        let mut ignore = IgnoreConfig::default();
        ignore.packages.insert(
            "lodash".to_string(),
            PackageIgnore {
                ids: vec!["1096470".to_string()],
                until: Some("2000-01-01".to_string()),
                reason: None,
            },
        );

        let advisories = source(&server, &ignore)
            .scan(&[Package::new("lodash", "4.17.20")])
            .await
            .unwrap();
        assert_eq!(advisories.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_scan() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let advisories = source(&server, &IgnoreConfig::default())
            .scan(&[])
            .await
            .unwrap();
        assert!(advisories.is_empty());
    }
}
