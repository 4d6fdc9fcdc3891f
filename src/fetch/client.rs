use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport seam for the delay feed; tests and wrappers substitute their own.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
