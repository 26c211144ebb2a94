use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NpmSettings;
use crate::error::SourceError;
use crate::http::{build_client, read_json};
use crate::model::Package;
use crate::retry::{Retrier, RetryConfig};

/// Maximum number of distinct package names per bulk request.
pub const MAX_PACKAGES_PER_REQUEST: usize = 500;

const BULK_PATH: &str = "/-/npm/v1/security/advisories/bulk";

/// Client for the npm registry bulk advisory endpoint.
pub struct NpmClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
    retrier: Retrier,
}

impl NpmClient {
    pub fn new(settings: &NpmSettings, retrier: Retrier) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(Duration::from_secs(settings.timeout_secs))?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retry: settings.retry.into(),
            retrier,
        })
    }

    /// Fetches advisories for `packages`, flattened and tagged with the
    /// package name they were reported under. Failed chunks are skipped.
    pub async fn fetch(&self, packages: &[Package]) -> Vec<NpmAdvisory> {
        let grouped = group_versions(packages);
        if grouped.is_empty() {
            return Vec::new();
        }

        let mut advisories = Vec::new();
        for (index, chunk) in grouped.chunks(MAX_PACKAGES_PER_REQUEST).enumerate() {
            match self.query_bulk(chunk).await {
                Ok(found) => advisories.extend(found),
                Err(e) => {
                    warn!(chunk = index, size = chunk.len(), error = %e, "npm bulk request failed, skipping");
                }
            }
        }

        debug!(count = advisories.len(), "npm bulk requests returned advisories");
        advisories
    }

    async fn query_bulk(&self, chunk: &[(String, Vec<String>)]) -> Result<Vec<NpmAdvisory>, SourceError> {
        let url = format!("{}{}", self.base_url, BULK_PATH);
        let body = encode_body(chunk)?;

        let response: HashMap<String, Vec<NpmAdvisory>> = self
            .retrier
            .run("npm bulk advisories", &self.retry, || async {
                let response = self
                    .client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(CONTENT_ENCODING, "gzip")
                    .body(body.clone())
                    .send()
                    .await
                    .map_err(|e| SourceError::from_reqwest(&url, e))?;
                read_json(&url, response).await
            })
            .await?;

        Ok(flatten(response))
    }
}

/// Groups versions by package name, keeping first-seen name order.
fn group_versions(packages: &[Package]) -> Vec<(String, Vec<String>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();

    for package in packages {
        let slot = *index.entry(package.name.as_str()).or_insert_with(|| {
            grouped.push((package.name.clone(), Vec::new()));
            grouped.len() - 1
        });
        let versions = &mut grouped[slot].1;
        if !versions.contains(&package.version) {
            versions.push(package.version.clone());
        }
    }
    grouped
}

/// Serializes `{name: [versions]}` and gzips it.
fn encode_body(chunk: &[(String, Vec<String>)]) -> Result<Vec<u8>, SourceError> {
    let map: BTreeMap<&str, &[String]> = chunk
        .iter()
        .map(|(name, versions)| (name.as_str(), versions.as_slice()))
        .collect();
    let json = serde_json::to_vec(&map).map_err(std::io::Error::from)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// The response is keyed by package name, not advisory ID.
fn flatten(response: HashMap<String, Vec<NpmAdvisory>>) -> Vec<NpmAdvisory> {
    let mut names: Vec<_> = response.into_iter().collect();
    names.sort_by(|a, b| a.0.cmp(&b.0));

    names
        .into_iter()
        .flat_map(|(name, advisories)| {
            advisories.into_iter().map(move |mut advisory| {
                if advisory.name.as_deref().is_none_or(str::is_empty) {
                    advisory.name = Some(name.clone());
                }
                advisory
            })
        })
        .collect()
}

/// Advisory IDs arrive as numbers from the registry and as strings from mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AdvisoryId {
    Number(u64),
    Text(String),
}

impl fmt::Display for AdvisoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisoryId::Number(n) => write!(f, "{n}"),
            AdvisoryId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpmSeverity {
    Critical,
    High,
    Moderate,
    Low,
    Info,
    #[serde(other)]
    Unknown,
}

impl NpmSeverity {
    pub fn label(&self) -> Option<&'static str> {
        match self {
            NpmSeverity::Critical => Some("critical"),
            NpmSeverity::High => Some("high"),
            NpmSeverity::Moderate => Some("moderate"),
            NpmSeverity::Low => Some("low"),
            NpmSeverity::Info => Some("info"),
            NpmSeverity::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpmCvss {
    pub score: Option<f64>,
    #[serde(rename = "vectorString")]
    pub vector_string: Option<String>,
}

/// One advisory from the bulk endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NpmAdvisory {
    pub id: AdvisoryId,
    pub title: Option<String>,
    pub name: Option<String>,
    pub severity: Option<NpmSeverity>,
    pub url: Option<String>,
    pub vulnerable_versions: Option<String>,
    pub cves: Option<Vec<String>>,
    pub github_advisory_id: Option<String>,
    pub cvss: Option<NpmCvss>,
    pub overview: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::retry::tests::instant_retrier;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client(server: &MockServer) -> NpmClient {
        let settings = NpmSettings {
            base_url: server.uri(),
            retry: RetrySettings {
                max_attempts: 2,
                delay_ms: 1,
            },
            ..NpmSettings::default()
        };
        NpmClient::new(&settings, instant_retrier()).unwrap()
    }

    fn decode(req: &Request) -> serde_json::Value {
        let mut decoder = GzDecoder::new(req.body.as_slice());
        let mut raw = String::new();
        decoder.read_to_string(&mut raw).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_group_versions() {
        let grouped = group_versions(&[
            Package::new("lodash", "4.17.20"),
            Package::new("express", "4.0.0"),
            Package::new("lodash", "4.17.20"),
            Package::new("lodash", "3.10.1"),
        ]);
        assert_eq!(
            grouped,
            vec![
                ("lodash".to_string(), vec!["4.17.20".to_string(), "3.10.1".to_string()]),
                ("express".to_string(), vec!["4.0.0".to_string()]),
            ]
        );
    }

    #[test]
    fn test_encode_body_is_gzip_json() {
        let body = encode_body(&[("lodash".to_string(), vec!["4.17.20".to_string()])]).unwrap();
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut raw = String::new();
        decoder.read_to_string(&mut raw).unwrap();
        assert_eq!(raw, r#"{"lodash":["4.17.20"]}"#);
    }

    #[test]
    fn test_advisory_id_forms() {
        let numeric: NpmAdvisory = serde_json::from_value(json!({"id": 1096470})).unwrap();
        let text: NpmAdvisory = serde_json::from_value(json!({"id": "GHSA-abc"})).unwrap();
        assert_eq!(numeric.id.to_string(), "1096470");
        assert_eq!(text.id.to_string(), "GHSA-abc");
    }

    #[test]
    fn test_unknown_severity() {
        let advisory: NpmAdvisory =
            serde_json::from_value(json!({"id": 1, "severity": "catastrophic"})).unwrap();
        assert_eq!(advisory.severity, Some(NpmSeverity::Unknown));
        assert_eq!(NpmSeverity::Unknown.label(), None);
    }

    #[tokio::test]
    async fn test_bulk_request_and_flatten() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BULK_PATH))
            .and(header("content-encoding", "gzip"))
            .respond_with(|req: &Request| {
                let body = decode(req);
                assert_eq!(body, json!({"lodash": ["4.17.20"], "minimist": ["1.2.0"]}));
                ResponseTemplate::new(200).set_body_json(json!({
                    "lodash": [{
                        "id": 1096470,
                        "title": "Command Injection in lodash",
                        "severity": "high",
                        "url": "https://github.com/advisories/GHSA-35jh-r3h4-6jhm",
                        "vulnerable_versions": "<4.17.21",
                        "cwe": ["CWE-77"],
                        "cvss": {"score": 7.2, "vectorString": "CVSS:3.1/AV:N/AC:L/PR:H/UI:N/S:U/C:H/I:H/A:H"}
                    }],
                    "minimist": [{
                        "id": 1097677,
                        "name": "minimist",
                        "title": "Prototype Pollution in minimist",
                        "severity": "critical",
                        "vulnerable_versions": "<0.2.4"
                    }]
                }))
            })
            .expect(1)
            .mount(&server)
            .await;

        let advisories = client(&server)
            .fetch(&[
                Package::new("lodash", "4.17.20"),
                Package::new("minimist", "1.2.0"),
                Package::new("lodash", "4.17.20"),
            ])
            .await;

        assert_eq!(advisories.len(), 2);
        assert_eq!(advisories[0].name.as_deref(), Some("lodash"));
        assert_eq!(advisories[0].id, AdvisoryId::Number(1096470));
        assert_eq!(advisories[1].name.as_deref(), Some("minimist"));
    }

    #[tokio::test]
    async fn test_id_keyed_response_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BULK_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "1096470": {"id": 1096470, "title": "misparse bait"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let advisories = client(&server)
            .fetch(&[Package::new("lodash", "4.17.20")])
            .await;
        assert!(advisories.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(BULK_PATH))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let advisories = client(&server)
            .fetch(&[Package::new("lodash", "4.17.20")])
            .await;
        assert!(advisories.is_empty());
    }

    #[tokio::test]
    async fn test_names_split_across_requests() {
        let server = MockServer::start().await;
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&sizes);
        Mock::given(method("POST"))
            .and(path(BULK_PATH))
            .respond_with(move |req: &Request| {
                let body = decode(req);
                let names = body.as_object().unwrap();
                recorded.lock().unwrap().push(names.len());
                if names.len() == MAX_PACKAGES_PER_REQUEST {
                    return ResponseTemplate::new(502);
                }
                let name = names.keys().next().unwrap().clone();
                let mut response = serde_json::Map::new();
                response.insert(
                    name.clone(),
                    json!([{"id": 1, "name": name, "severity": "low", "vulnerable_versions": "*"}]),
                );
                ResponseTemplate::new(200).set_body_json(response)
            })
            .mount(&server)
            .await;

        let packages: Vec<Package> = (0..=MAX_PACKAGES_PER_REQUEST)
            .map(|i| Package::new(format!("pkg-{i}"), "1.0.0"))
            .collect();
        let advisories = client(&server).fetch(&packages).await;

        // The full chunk failed on both attempts; the remainder still went out.
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].name.as_deref(), Some("pkg-500"));
        let sizes = sizes.lock().unwrap();
        assert_eq!(*sizes, vec![MAX_PACKAGES_PER_REQUEST, MAX_PACKAGES_PER_REQUEST, 1]);
    }

    #[tokio::test]
    async fn test_empty_input_no_request() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client(&server).fetch(&[]).await.is_empty());
    }
}
