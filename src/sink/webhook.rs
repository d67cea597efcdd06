//! Generic webhook sink.

use super::{DEFAULT_HTTP_TIMEOUT, Sink, SinkError, SinkFuture, http_client};
use crate::reading::Reading;
use reqwest::Url;
use serde::Serialize;
use tracing::{Instrument, debug_span};

/// Body posted to a webhook: the reading plus the host that relayed it.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    #[serde(flatten)]
    pub reading: &'a Reading,
    pub hostname: &'a str,
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// POSTs every reading as JSON to a user supplied URL.
pub struct WebhookSink {
    name: String,
    url: Url,
    hostname: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, SinkError> {
        let parsed = Url::parse(url)
            .map_err(|e| SinkError::Setup(format!("invalid webhook url '{url}': {e}")))?;
        Ok(Self {
            name: format!("Webhook ({url})"),
            url: parsed,
            hostname: local_hostname(),
            client: http_client(DEFAULT_HTTP_TIMEOUT)?,
        })
    }

    pub fn payload<'a>(&'a self, reading: &'a Reading) -> WebhookPayload<'a> {
        WebhookPayload {
            reading,
            hostname: &self.hostname,
        }
    }
}

impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        let span = debug_span!("webhook_write", sink = %self.name, color = %reading.color);
        Box::pin(
            async move {
                self.client
                    .post(self.url.clone())
                    .json(&self.payload(reading))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
            .instrument(span),
        )
    }
}
