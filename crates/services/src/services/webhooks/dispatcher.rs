use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinSet;

use super::WebhookPayload;

/// Workers per dispatch; fewer when there are fewer URLs.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Per-request budget. Subscribers are expected to accept fast and
/// process out of band.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// POSTs a payload to a set of resolved URLs through a bounded worker
/// pool. Delivery is best-effort: no retries, failures are logged and
/// dropped. `dispatch` returns once every worker has drained the queue.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn dispatch(&self, urls: Vec<String>, payload: &WebhookPayload) {
        if urls.is_empty() {
            return;
        }
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!("failed to encode webhook payload: {err}");
                return;
            }
        };

        let (job_tx, job_rx) = async_channel::bounded::<String>(1);
        let mut workers = JoinSet::new();
        for _ in 0..DEFAULT_CONCURRENCY.min(urls.len()) {
            let jobs = job_rx.clone();
            let client = self.client.clone();
            let body = body.clone();
            workers.spawn(async move {
                while let Ok(url) = jobs.recv().await {
                    match client
                        .post(&url)
                        .header(CONTENT_TYPE, "application/json")
                        .timeout(REQUEST_TIMEOUT)
                        .body(body.clone())
                        .send()
                        .await
                    {
                        Ok(response) => {
                            tracing::debug!(%url, status = %response.status(), "webhook delivered");
                        }
                        Err(err) => {
                            tracing::warn!(%url, "webhook delivery failed: {err}");
                        }
                    }
                }
            });
        }
        drop(job_rx);

        for url in urls {
            if job_tx.send(url).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        while workers.join_next().await.is_some() {}
    }
}
