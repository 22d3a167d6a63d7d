//! HTTP client with per-attempt timeout and status-driven retries

use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::policy::{ErrorClassification, RetryPolicy, parse_retry_after};

/// Request executor shared by every identity-provider call.
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    policy: RetryPolicy,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl HttpTransport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_client(Client::new(), policy)
    }

    /// Reuse an existing `reqwest::Client` (connection pool, proxies, TLS config).
    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a request against the underlying client.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send with the transport's default policy.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.send_with(builder, &self.policy).await
    }

    /// Send with an explicit policy.
    ///
    /// Makes at most `max_retries + 1` attempts. Each attempt is aborted after
    /// `policy.timeout`. Retryable statuses sleep for the `Retry-After` delay
    /// when the server provides one, otherwise for the jittered exponential
    /// backoff. The response of the last attempt is returned as-is.
    pub async fn send_with(&self, builder: RequestBuilder, policy: &RetryPolicy) -> Result<Response> {
        for attempt in 0..=policy.max_retries {
            let request = builder
                .try_clone()
                .ok_or_else(|| Error::Build("request body cannot be cloned for retries".into()))?
                .build()
                .map_err(|e| Error::Build(e.to_string()))?;

            let method = request.method().clone();
            let url = request.url().clone();
            debug!(attempt = attempt + 1, %method, %url, "sending request");

            let response = match tokio::time::timeout(policy.timeout, self.client.execute(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(attempt = attempt + 1, %method, %url, error = %e, "request failed");
                    return Err(Error::Http(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        attempt = attempt + 1,
                        %method,
                        %url,
                        timeout_ms = policy.timeout.as_millis() as u64,
                        "request timed out"
                    );
                    return Err(Error::Timeout(policy.timeout));
                }
            };

            let status = response.status().as_u16();
            if policy.classify(status) == ErrorClassification::Transient && attempt < policy.max_retries {
                let delay = match response.headers().get(RETRY_AFTER) {
                    Some(value) => parse_retry_after(value.to_str().unwrap_or_default(), Utc::now()),
                    None => policy.backoff_delay(attempt),
                };
                warn!(
                    attempt = attempt + 1,
                    status,
                    %url,
                    delay_ms = delay.as_millis() as u64,
                    "retryable status, backing off"
                );
                metrics::counter!("idp_http_retries_total", "status" => status.to_string()).increment(1);
                tokio::time::sleep(delay).await;
                continue;
            }

            debug!(attempt = attempt + 1, status, %url, "received response");
            return Ok(response);
        }

        // The final attempt always returns above
        Err(Error::Http("retries exhausted without a response".into()))
    }
}
