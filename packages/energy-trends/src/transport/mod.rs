//! HTTP transport seam.
//!
//! The locator and fetcher talk to the network only through [`Transport`], so
//! tests can script responses with [`crate::testing::MockTransport`].
//!
//! Non-2xx responses are returned as values, not errors: the locator treats
//! any failure status as fatal while the fetcher retries some of them.

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::error::TransportResult;

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, final_url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            final_url: final_url.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET request and buffer the body.
    async fn get(&self, url: &str) -> TransportResult<TransportResponse>;
}
