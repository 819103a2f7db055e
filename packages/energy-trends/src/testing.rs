//! Testing utilities including mock implementations.
//!
//! These let applications and tests drive the pipeline without network access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::error::{TransportError, TransportResult};
use crate::transport::{Transport, TransportResponse};

#[derive(Debug, Clone)]
enum Scripted {
    Response(TransportResponse),
    Error(TransportError),
}

/// A scripted transport.
///
/// Each URL has a queue of outcomes. Outcomes are consumed in order; the last
/// one repeats forever. Unknown URLs answer 404.
///
/// # Example
///
/// ```rust
/// use energy_trends::testing::MockTransport;
/// use energy_trends::TransportError;
///
/// let url = "https://example.com/file.xlsx";
/// let mock = MockTransport::new()
///     .with_error(url, TransportError::Timeout { url: url.to_string() })
///     .with_bytes(url, b"spreadsheet".to_vec());
/// ```
#[derive(Default, Clone)]
pub struct MockTransport {
    scripts: Arc<RwLock<HashMap<String, VecDeque<Scripted>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, url: &str, outcome: Scripted) -> Self {
        self.scripts
            .write()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Queue an arbitrary response.
    pub fn with_response(self, url: &str, response: TransportResponse) -> Self {
        self.push(url, Scripted::Response(response))
    }

    /// Queue a 200 response with an HTML body.
    pub fn with_html(self, url: &str, html: &str) -> Self {
        let response = TransportResponse::new(200, url, html.as_bytes().to_vec());
        self.with_response(url, response)
    }

    /// Queue a 200 response with a binary body.
    pub fn with_bytes(self, url: &str, body: Vec<u8>) -> Self {
        let response = TransportResponse::new(200, url, body);
        self.with_response(url, response)
    }

    /// Queue an empty response with the given status.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        let response = TransportResponse::new(status, url, Vec::new());
        self.with_response(url, response)
    }

    /// Queue a network failure.
    pub fn with_error(self, url: &str, error: TransportError) -> Self {
        self.push(url, Scripted::Error(error))
    }

    /// Every URL requested, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    /// Number of requests made for one URL.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls.read().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn reset_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> TransportResult<TransportResponse> {
        self.calls.write().unwrap().push(url.to_string());

        let outcome = {
            let mut scripts = self.scripts.write().unwrap();
            match scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match outcome {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Error(error)) => Err(error),
            None => Ok(TransportResponse::new(404, url, Vec::new())),
        }
    }
}
