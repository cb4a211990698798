//! Webhook Module
//!
//! This module delivers the JSON export of a run to a remote webhook. It supports
//! retries with exponential backoff and properly handles timeouts.
use crate::render::SummaryExport;
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    report: &'a SummaryExport<'a>,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
}

/// WebhookHandler posts run summaries to a webhook URL.
#[derive(Debug)]
pub struct WebhookHandler {
    client: Client,
    url: Url,
    max_retries: u32,
}

impl WebhookHandler {
    /// Creates a new WebhookHandler with the given URL, timeout, and retry count.
    pub fn new(url: impl AsRef<str>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let url = Url::parse(url.as_ref()).context("Invalid webhook URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url,
            max_retries,
        })
    }

    /// Posts `export`, retrying with exponential backoff (1s, 2s, 4s, ...).
    pub async fn send(&self, export: &SummaryExport<'_>) -> Result<()> {
        let payload = WebhookPayload {
            report: export,
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        };
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = Duration::from_secs(1 << (attempt - 2).min(6));
                log::info!("Retrying webhook in {:?}", delay);
                sleep(delay).await;
            }
            match self.post(&payload).await {
                Ok(()) => {
                    log::info!("Webhook delivered (attempt {}/{})", attempt, attempts);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Webhook attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }
        Err(anyhow::anyhow!(
            "Webhook failed after {} attempts: {}",
            attempts,
            last_error
        ))
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> std::result::Result<(), String> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { "timeout".to_string() } else { e.to_string() })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("HTTP {} {}", status, body.trim()))
    }
}
