use crate::error::{IsRetryable, StackInitError};
use crate::types::CustomResourceResponse;
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Delivers custom-resource responses to their pre-signed `ResponseURL`.
#[derive(Clone)]
pub struct ResponseSender {
    client: reqwest::Client,
    min_delay: Duration,
    max_delay: Duration,
    max_times: usize,
}

impl ResponseSender {
    pub fn new() -> Result<Self, StackInitError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("clay-stack-init/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            max_times: 3,
        })
    }

    /// Override backoff bounds; mostly useful to keep tests fast.
    pub fn with_backoff(mut self, min_delay: Duration, max_delay: Duration, max_times: usize) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self.max_times = max_times;
        self
    }

    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
            .with_jitter()
    }

    pub async fn send(
        &self,
        url: &Url,
        response: &CustomResourceResponse,
    ) -> Result<(), StackInitError> {
        let body = serde_json::to_vec(response)?;

        (|| async { self.put_once(url, body.clone()).await })
            .retry(self.retry_policy())
            .when(|e: &StackInitError| e.is_retryable())
            .notify(|e: &StackInitError, dur: Duration| {
                warn!(error = %e, retry_in = ?dur, "response delivery failed; retrying");
            })
            .await
    }

    async fn put_once(&self, url: &Url, body: Vec<u8>) -> Result<(), StackInitError> {
        // Pre-signed S3 URLs are signed without a content type.
        let resp = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StackInitError::ResponseStatus(status));
        }
        debug!(status = %status, "response accepted");
        Ok(())
    }
}
