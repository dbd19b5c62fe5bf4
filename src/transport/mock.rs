//! # Mock Transport
//!
//! Utilities for testing models in isolation.
//!
//! [`MockTransport`] answers requests from a queue of expectations registered with a
//! fluent builder, and records every request it saw:
//!
//! ```rust,ignore
//! let mock = MockTransport::new();
//! mock.expect_get("/bikes/1").return_ok(json!({"id": 1, "brand": "Trek"}));
//! mock.expect_put("/bikes/1").return_status(422, json!({"error": "invalid"}));
//!
//! let models = ModelRegistry::new(mock.clone());
//! // use models in tests...
//! mock.verify(); // all expectations met, no unexpected requests
//! ```
//!
//! When a test needs to control *when* a response arrives, use
//! [`create_channel_transport`] and answer each request with [`expect_request`].

use crate::error::RequestError;
use crate::transport::channel::{ChannelTransport, PendingRequest};
use crate::transport::{HttpMethod, Request, Response, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

struct Expectation {
    method: HttpMethod,
    url: String,
    response: Result<Response, RequestError>,
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    requests: Vec<Request>,
    unexpected: Vec<String>,
}

/// A transport with expectation tracking for fluent testing.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, method: HttpMethod, url: impl Into<String>) -> ExpectationBuilder {
        ExpectationBuilder {
            method,
            url: url.into(),
            state: self.state.clone(),
        }
    }

    pub fn expect_get(&self, url: impl Into<String>) -> ExpectationBuilder {
        self.expect(HttpMethod::Get, url)
    }

    pub fn expect_post(&self, url: impl Into<String>) -> ExpectationBuilder {
        self.expect(HttpMethod::Post, url)
    }

    pub fn expect_put(&self, url: impl Into<String>) -> ExpectationBuilder {
        self.expect(HttpMethod::Put, url)
    }

    pub fn expect_delete(&self, url: impl Into<String>) -> ExpectationBuilder {
        self.expect(HttpMethod::Delete, url)
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Verifies that all expectations were met and nothing unexpected was sent.
    pub fn verify(&self) {
        let state = self.lock();
        if !state.unexpected.is_empty() {
            panic!("Unexpected requests: {:?}", state.unexpected);
        }
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                state.expectations.len()
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, request: Request) -> Result<Response, RequestError> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        match state.expectations.pop_front() {
            Some(expectation)
                if expectation.method == request.method && expectation.url == request.url =>
            {
                expectation.response.and_then(Response::into_result)
            }
            Some(expectation) => {
                let message = format!(
                    "expected {} {}, got {} {}",
                    expectation.method, expectation.url, request.method, request.url
                );
                state.unexpected.push(message.clone());
                Err(RequestError::Transport(message))
            }
            None => {
                let message = format!("unexpected {} {}", request.method, request.url);
                state.unexpected.push(message.clone());
                Err(RequestError::Transport(message))
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response, RequestError> {
        self.answer(request)
    }
}

/// Builder for a single expectation.
pub struct ExpectationBuilder {
    method: HttpMethod,
    url: String,
    state: Arc<Mutex<MockState>>,
}

impl ExpectationBuilder {
    pub fn return_ok(self, data: Value) {
        self.push(Ok(Response::ok(data)));
    }

    /// Non-2xx statuses fail the request, as a real transport would.
    pub fn return_status(self, status: u16, data: Value) {
        self.push(Ok(Response::new(status, data)));
    }

    pub fn return_err(self, error: RequestError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Response, RequestError>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expectations
            .push_back(Expectation {
                method: self.method,
                url: self.url,
                response,
            });
    }
}

// =============================================================================
// CHANNEL HELPERS
// =============================================================================

/// Creates a channel transport plus the receiver that sees its requests.
pub fn create_channel_transport(buffer: usize) -> (ChannelTransport, mpsc::Receiver<PendingRequest>) {
    let (sender, receiver) = mpsc::channel(buffer);
    (ChannelTransport::new(sender), receiver)
}

/// Waits for the next request sent through a channel transport.
pub async fn expect_request(receiver: &mut mpsc::Receiver<PendingRequest>) -> Option<PendingRequest> {
    receiver.recv().await
}
