//! HTTP client for the simulation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use tracing::debug;

use simflow_core::{JobDescriptor, JobHandle, PollResult, RemoteId, ResultFields};

use super::{RemoteError, RemoteResult, RemoteService};
use crate::config::{Credentials, RemoteConfig};

const ERROR_STATUS: &str = "ERROR";

/// Longest wait honoured from a `Retry-After` header.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Cookie-session client; the session cookie set by `/authentication`
/// is replayed on every later call.
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpRemoteService {
    pub fn new(config: &RemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;

        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| RemoteError::Url(format!("{base}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            credentials: config.credentials.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> RemoteResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Url(format!("{path}: {e}")))
    }

    /// Handles are absolute URLs; relative ones resolve against the base.
    fn handle_url(&self, handle: &JobHandle) -> RemoteResult<Url> {
        self.endpoint(handle.as_str())
    }

    async fn get_json(&self, url: Url) -> RemoteResult<(HeaderMap, Value)> {
        let response = ensure_success(self.client.get(url).send().await?)?;
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok((headers, Value::Null));
        }
        let body = serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok((headers, body))
    }
}

fn ensure_success(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RemoteError::Status {
            status: status.as_u16(),
            endpoint: response.url().to_string(),
        })
    }
}

/// Positive `Retry-After` in seconds, if present, capped at
/// [`MAX_RETRY_AFTER`].
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    if secs.is_nan() || secs <= 0.0 {
        return None;
    }
    let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
    Some(wait.min(MAX_RETRY_AFTER))
}

fn string_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn remote_id_of(body: &Value) -> RemoteId {
    string_field(body, "id")
        .and_then(|id| RemoteId::new(id).ok())
        .unwrap_or_else(RemoteId::unknown)
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn authenticate(&self) -> RemoteResult<()> {
        let url = self.endpoint("authentication")?;
        let response = self
            .client
            .post(url)
            .basic_auth(self.credentials.username(), Some(self.credentials.password()))
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    async fn submit(&self, descriptor: &JobDescriptor) -> RemoteResult<JobHandle> {
        let url = self.endpoint("simulations")?;
        let response = self
            .client
            .post(url)
            .json(&descriptor.request_body())
            .send()
            .await?;
        let response = ensure_success(response)?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(RemoteError::MissingHandle)?;
        let absolute = self.endpoint(location)?;
        debug!(handle = %absolute, payload = descriptor.payload(), "submission accepted");
        JobHandle::new(absolute.as_str()).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn poll(&self, handle: &JobHandle) -> RemoteResult<PollResult> {
        let (headers, body) = self.get_json(self.handle_url(handle)?).await?;

        if let Some(wait) = retry_after(&headers) {
            return Ok(PollResult::StillRunning {
                retry_after: Some(wait),
            });
        }

        if let Some(alpha) = string_field(&body, "alpha") {
            let url = self.endpoint(&format!("alphas/{alpha}"))?;
            let (_, record) = self.get_json(url).await?;
            return match record {
                Value::Object(fields) => Ok(PollResult::Completed(fields)),
                Value::Null => Ok(PollResult::Completed(ResultFields::new())),
                other => Err(RemoteError::Decode(format!(
                    "result record for {alpha} is not an object: {other}"
                ))),
            };
        }

        if string_field(&body, "status") == Some(ERROR_STATUS) {
            return Ok(PollResult::RunFailed(remote_id_of(&body)));
        }

        Ok(PollResult::StillRunning { retry_after: None })
    }

    async fn fetch_remote_id(&self, handle: &JobHandle) -> RemoteResult<RemoteId> {
        let (_, body) = self.get_json(self.handle_url(handle)?).await?;
        Ok(remote_id_of(&body))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use serde_json::json;

    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let config = RemoteConfig::new("http://127.0.0.1:9/api", Credentials::new("u", "p"));
        let service = HttpRemoteService::new(&config).unwrap();
        assert_eq!(
            service.endpoint("simulations").unwrap().as_str(),
            "http://127.0.0.1:9/api/simulations"
        );
    }

    #[test]
    fn absolute_handles_are_kept() {
        let config = RemoteConfig::new("http://127.0.0.1:9", Credentials::new("u", "p"));
        let service = HttpRemoteService::new(&config).unwrap();
        let handle = JobHandle::new("https://other.example/simulations/abc").unwrap();
        assert_eq!(
            service.handle_url(&handle).unwrap().as_str(),
            "https://other.example/simulations/abc"
        );
    }

    #[test]
    fn retry_after_must_be_positive() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("0"));
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.5"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(2500)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("NaN"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        for value in ["1e30", "inf", "86400"] {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
            assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER), "{value}");
        }
    }

    #[test]
    fn remote_id_defaults_to_unknown() {
        assert_eq!(remote_id_of(&json!({"id": "sim-1"})).as_str(), "sim-1");
        assert!(remote_id_of(&json!({"status": "ERROR"})).is_unknown());
        assert!(remote_id_of(&Value::Null).is_unknown());
    }
}
