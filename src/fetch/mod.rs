mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Performs a GET request and returns the body of a successful response.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid URL '{url}'"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Like [`fetch_bytes`], retrying requests that time out.
///
/// At most `attempts` requests are made (at least one); other failures are
/// returned immediately.
pub async fn fetch_bytes_retrying<C: HttpClient>(
    client: &C,
    url: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<Vec<u8>> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match fetch_bytes(client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < attempts && is_timeout(&e) => {
                warn!(url, attempt, attempts, "Request timed out, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decodes each element of an upstream JSON array on its own.
///
/// Elements that do not decode as `T` are dropped; the second value is how
/// many were.
pub fn decode_each<T: DeserializeOwned>(values: Vec<serde_json::Value>, what: &str) -> (Vec<T>, usize) {
    let mut decoded = Vec::with_capacity(values.len());
    let mut skipped = 0;

    for value in values {
        match serde_json::from_value::<T>(value) {
            Ok(item) => decoded.push(item),
            Err(e) => {
                skipped += 1;
                debug!(what, error = %e, "Skipping undecodable element");
            }
        }
    }

    if skipped > 0 {
        warn!(what, skipped, kept = decoded.len(), "Upstream response had undecodable elements");
    }
    (decoded, skipped)
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(reqwest::Error::is_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let client = BasicClient::new();
        let err = fetch_bytes(&client, "not a url").await.unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let client = BasicClient::new();
        let started = std::time::Instant::now();
        let result = fetch_bytes_retrying(&client, "::", 5, Duration::from_secs(10)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_up_to_attempts() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                open.push(socket);
            }
        });

        let client = BasicClient::with_timeout(Duration::from_millis(100)).unwrap();
        let url = format!("http://{addr}/delays?stopId=2002");
        let err = fetch_bytes_retrying(&client, &url, 3, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(is_timeout(&err), "expected a timeout, got {err:#}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 3);

        server.abort();
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = BasicClient::with_timeout(Duration::from_secs(5)).unwrap();
        let url = format!("http://{addr}/delays?stopId=2002");

        let started = std::time::Instant::now();
        let err = fetch_bytes_retrying(&client, &url, 3, Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(!is_timeout(&err));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_non_http_errors_are_not_timeouts() {
        assert!(!is_timeout(&anyhow::anyhow!("boom")));
    }
}
