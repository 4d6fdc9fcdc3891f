use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::types::{DelayBatch, DelayRecord, RawBatch};
use crate::fetch::{HttpClient, decode_each, fetch_bytes_retrying};

/// Public ZTM Gdańsk open-data host.
pub const DEFAULT_BASE_URL: &str = "https://ckan2.multimediagdansk.pl";

/// Anything able to produce the current delay batch for a stop.
#[async_trait]
pub trait DelaySource: Send + Sync {
    async fn delays_for_stop(&self, stop_id: u32) -> Result<DelayBatch>;
}

/// Decodes a delay feed response body.
///
/// Only a body that is not a delay response at all is an error. Records that
/// fail to decode are dropped one by one and counted in
/// [`DelayBatch::skipped`].
pub fn parse_delays(bytes: &[u8]) -> Result<DelayBatch> {
    let raw: RawBatch = serde_json::from_slice(bytes).context("malformed delay feed response")?;

    let (delay, skipped) = decode_each::<DelayRecord>(raw.delay, "delay record");

    Ok(DelayBatch {
        last_update: raw.last_update,
        delay,
        skipped,
    })
}

/// [`DelaySource`] backed by the HTTP delay feed.
pub struct DelayFeedClient<C> {
    client: C,
    base_url: String,
    attempts: u32,
    backoff: Duration,
}

impl<C: HttpClient> DelayFeedClient<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }

    /// Sets how many times a timed-out request is tried and the pause between tries.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    pub fn stop_url(&self, stop_id: u32) -> String {
        format!("{}/delays?stopId={}", self.base_url, stop_id)
    }
}

#[async_trait]
impl<C: HttpClient> DelaySource for DelayFeedClient<C> {
    #[tracing::instrument(skip(self))]
    async fn delays_for_stop(&self, stop_id: u32) -> Result<DelayBatch> {
        let url = self.stop_url(stop_id);
        let bytes = fetch_bytes_retrying(&self.client, &url, self.attempts, self.backoff)
            .await
            .with_context(|| format!("fetching delays for stop {stop_id}"))?;

        let batch = parse_delays(&bytes).with_context(|| format!("stop {stop_id}"))?;
        debug!(
            records = batch.delay.len(),
            last_update = batch.last_update.as_deref().unwrap_or(""),
            "Delay batch received"
        );
        Ok(batch)
    }
}
