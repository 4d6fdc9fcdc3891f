//! ZTM Gdańsk service announcements (`bsk.json`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Europe::Warsaw;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::fetch::{HttpClient, decode_each, fetch_bytes_retrying};

pub const DEFAULT_ALERTS_URL: &str = "http://ztm.gda.pl/rozklady/download/opendata_out/bsk.json";

const PERIOD_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<br\s*/?>").unwrap());
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<p>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());

/// A service announcement ready to be published as a GTFS-RT alert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceAlert {
    pub header: String,
    /// Plain text, markup removed.
    pub description: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Deserialize)]
struct RawAlerts {
    #[serde(default)]
    komunikaty: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct RawAlert {
    tytul: String,
    #[serde(default)]
    tresc: Option<String>,
    #[serde(default)]
    data_rozpoczecia: Option<String>,
    #[serde(default)]
    data_zakonczenia: Option<String>,
}

impl From<RawAlert> for ServiceAlert {
    fn from(raw: RawAlert) -> Self {
        ServiceAlert {
            header: raw.tytul,
            description: strip_html(raw.tresc.as_deref().unwrap_or("")),
            start: raw.data_rozpoczecia.as_deref().and_then(local_timestamp),
            end: raw.data_zakonczenia.as_deref().and_then(local_timestamp),
        }
    }
}

/// Turns announcement markup into plain text, keeping line and paragraph breaks.
pub fn strip_html(text: &str) -> String {
    let text = LINE_BREAK.replace_all(text, "\n");
    let text = PARAGRAPH.replace_all(&text, "\n\n");
    TAG.replace_all(&text, "").into_owned()
}

fn local_timestamp(raw: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), PERIOD_FORMAT).ok()?;
    Warsaw
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Decodes a `bsk.json` body. Announcements without a title are dropped.
pub fn parse_alerts(bytes: &[u8]) -> Result<Vec<ServiceAlert>> {
    let raw: RawAlerts = serde_json::from_slice(bytes).context("malformed alerts response")?;
    let (alerts, _) = decode_each::<RawAlert>(raw.komunikaty.unwrap_or_default(), "alert");
    Ok(alerts.into_iter().map(ServiceAlert::from).collect())
}

#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn current_alerts(&self) -> Result<Vec<ServiceAlert>>;
}

/// [`AlertSource`] reading the announcements file over HTTP.
pub struct AlertFeedClient<C> {
    client: C,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl<C: HttpClient> AlertFeedClient<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl<C: HttpClient> AlertSource for AlertFeedClient<C> {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn current_alerts(&self) -> Result<Vec<ServiceAlert>> {
        let bytes = fetch_bytes_retrying(&self.client, &self.url, self.attempts, self.backoff)
            .await
            .context("fetching alerts")?;

        let alerts = parse_alerts(&bytes)?;
        debug!(alerts = alerts.len(), "Alerts received");
        Ok(alerts)
    }
}
