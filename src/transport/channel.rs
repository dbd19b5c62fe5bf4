//! Channel-backed transport.
//!
//! Each request travels as a [`PendingRequest`] carrying a oneshot reply channel, the
//! same request/response pairing the memory server's actor loop is built on.

use crate::error::RequestError;
use crate::transport::{Request, Response, Transport};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

pub type Reply = oneshot::Sender<Result<Response, RequestError>>;

/// A request waiting for its answer.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: Request,
    pub respond_to: Reply,
}

impl PendingRequest {
    pub fn respond(self, result: Result<Response, RequestError>) {
        let _ = self.respond_to.send(result);
    }

    pub fn respond_ok(self, data: Value) {
        self.respond(Ok(Response::ok(data)));
    }

    pub fn respond_status(self, status: u16, data: Value) {
        self.respond(Ok(Response::new(status, data)));
    }
}

#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<PendingRequest>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<PendingRequest>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, request: Request) -> Result<Response, RequestError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(PendingRequest { request, respond_to })
            .await
            .map_err(|_| RequestError::TransportClosed)?;
        response
            .await
            .map_err(|_| RequestError::TransportDropped)?
            .and_then(Response::into_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpMethod;
    use serde_json::json;

    #[tokio::test]
    async fn replies_travel_back_to_the_sender() {
        let (sender, mut receiver) = mpsc::channel(4);
        let transport = ChannelTransport::new(sender);

        let server = tokio::spawn(async move {
            let pending = receiver.recv().await.unwrap();
            assert_eq!(pending.request.url, "/bikes/1");
            pending.respond_ok(json!({"id": 1}));
        });

        let response = transport.send(Request::new(HttpMethod::Get, "/bikes/1")).await.unwrap();
        assert_eq!(response.data, json!({"id": 1}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_and_dropped_channels_are_reported() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let closed = ChannelTransport::new(sender)
            .send(Request::new(HttpMethod::Get, "/bikes"))
            .await;
        assert_eq!(closed, Err(RequestError::TransportClosed));

        let (sender, mut receiver) = mpsc::channel(1);
        let server = tokio::spawn(async move {
            drop(receiver.recv().await);
        });
        let dropped = ChannelTransport::new(sender)
            .send(Request::new(HttpMethod::Get, "/bikes"))
            .await;
        assert_eq!(dropped, Err(RequestError::TransportDropped));
        server.await.unwrap();
    }
}
