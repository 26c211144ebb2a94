//! Shared HTTP plumbing for source clients.
//!
//! Every outbound call carries a fixed timeout so a stalled database
//! surfaces as a retryable [`SourceError::Timeout`] instead of a hang.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::SourceError;

const USER_AGENT: &str = concat!("vulngate/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| SourceError::from_reqwest("client", e))
}

/// Turns non-2xx responses into [`SourceError::Status`] and decodes the body.
pub async fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| SourceError::from_reqwest(url, e))?;

    serde_json::from_slice(&body).map_err(|e| SourceError::decode(url, e.to_string()))
}
