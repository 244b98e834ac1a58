//! Batch upload of events.

use crate::config::Config;
use crate::types::{Event, EventsPayload};
use crate::Error;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Path of the bulk ingest endpoint, relative to the API host.
pub const BULK_PATH: &str = "/bulk/t";

/// Submits one batch of events.
///
/// Any `Ok` counts as delivered; the status code is only reported.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Post `events` in order as one batch and return the response status.
    async fn post_events(&self, events: &[Event]) -> Result<u16, Error>;
}

/// HTTP transport for sending events to the ECDMP API.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let endpoint = format!("{}{}", config.api_host().trim_end_matches('/'), BULK_PATH);

        Ok(Self { client, endpoint })
    }

    /// Endpoint batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Uploader for HttpTransport {
    async fn post_events(&self, events: &[Event]) -> Result<u16, Error> {
        debug!(
            endpoint = %self.endpoint,
            event_count = events.len(),
            "sending events"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EventsPayload { events })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".into());
            warn!(status = %status, body = %body, "API request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "events sent successfully");

        Ok(status.as_u16())
    }
}
