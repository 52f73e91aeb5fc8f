use crate::check::{self, CheckResultEvent};
use crate::dispatch::Notifier;
use anyhow::Context;
use tokio::sync::mpsc;

// Payload is a queued webhook delivery.
#[derive(Debug)]
pub struct Payload {
    // Destinations which receive the payload.
    pub urls: Vec<url::Url>,
    // JSON-encoded CheckResultEvent.
    pub body: Vec<u8>,
}

/// WebhookNotifier POSTs each notified CheckResultEvent as JSON.
///
/// Notifications are queued rather than delivered in-line. Delivery of the
/// queue happens in `serve_deliveries`, and a notification which finds the
/// queue full is failed rather than waiting for room.
pub struct WebhookNotifier {
    urls: Vec<url::Url>,
    tx: mpsc::Sender<Payload>,
}

impl WebhookNotifier {
    pub const NAME: &'static str = "webhook";

    /// Build a WebhookNotifier which delivers to `urls` by default,
    /// returning it with the receiver of its queued Payloads.
    pub fn new(urls: Vec<url::Url>, queue: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(queue);
        (Self { urls, tx }, rx)
    }

    // Destinations of the event, which the application may override
    // with a comma-separated list of URLs.
    fn destinations(&self, event: &CheckResultEvent) -> anyhow::Result<Vec<url::Url>> {
        let urls = match event.label(check::ALERTS_WEBHOOK_URLS) {
            Some(urls) => urls
                .split(',')
                .map(str::trim)
                .filter(|raw| !raw.is_empty())
                .map(|raw| {
                    url::Url::parse(raw).with_context(|| {
                        format!("parsing {} label URL {raw:?}", check::ALERTS_WEBHOOK_URLS)
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => self.urls.clone(),
        };

        if urls.is_empty() {
            anyhow::bail!("there are no webhook destinations for app {}", event.app_id);
        }
        Ok(urls)
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn notify(&self, event: &CheckResultEvent) -> anyhow::Result<()> {
        let urls = self.destinations(event)?;
        let body = serde_json::to_vec(event).context("encoding webhook payload")?;

        self.tx
            .try_send(Payload { urls, body })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("webhook queue is full"),
                mpsc::error::TrySendError::Closed(_) => {
                    anyhow::anyhow!("webhook delivery has stopped")
                }
            })
    }
}

/// Build the HTTP client used by `serve_deliveries`.
/// Each delivery attempt fails after `timeout`.
pub fn client(timeout: std::time::Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building webhook HTTP client")
}

/// Deliver queued Payloads until all WebhookNotifier senders are dropped.
/// Failed deliveries are logged and not retried.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn serve_deliveries(client: reqwest::Client, mut rx: mpsc::Receiver<Payload>) {
    while let Some(Payload { urls, body }) = rx.recv().await {
        for url in urls {
            let result = client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(response) => {
                    tracing::trace!(%url, status = %response.status(), "delivered webhook")
                }
                Err(err) => tracing::warn!(%url, ?err, "failed to deliver webhook (will not retry)"),
            }
        }
    }
    tracing::debug!("webhook queue closed");
}
