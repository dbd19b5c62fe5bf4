//! # Memory Server
//!
//! An in-memory REST backend running as an actor.
//!
//! The server owns its store and the receiving end of a channel; a
//! [`ChannelTransport`] is the client half. Requests are processed one at a time in
//! the run loop, so the store needs no locking.
//!
//! Routing is purely by url shape:
//!
//! | request | effect |
//! |---|---|
//! | `GET /things` | every stored item, filtered by query params (`?id=1,2` matches either) |
//! | `GET /things/7` | one item or 404 |
//! | `POST /things` | stores the body under a fresh numeric key, returns it (201) |
//! | `PUT`/`PATCH /things/7` | merges the body into the item, returns it |
//! | `DELETE /things/7` | removes the item (204) |
//!
//! Nested urls such as `/bikes/1/parts` are just another collection.

use crate::transport::channel::{ChannelTransport, PendingRequest};
use crate::transport::{HttpMethod, Params, Request, Response};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct MemoryServer {
    receiver: mpsc::Receiver<PendingRequest>,
    store: HashMap<String, BTreeMap<u64, Value>>,
    next_id: u64,
    primary_key: String,
}

impl MemoryServer {
    pub fn new(buffer_size: usize) -> (Self, ChannelTransport) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let server = Self {
            receiver,
            store: HashMap::new(),
            next_id: 1,
            primary_key: "id".to_string(),
        };
        (server, ChannelTransport::new(sender))
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Preloads a collection. Items without a numeric key get a fresh one.
    pub fn seed(&mut self, collection: &str, items: impl IntoIterator<Item = Value>) {
        for item in items {
            self.insert(collection, item);
        }
    }

    /// Processes requests until every transport clone is dropped.
    pub async fn run(mut self) {
        info!(collections = self.store.len(), "Memory server started");
        while let Some(PendingRequest { request, respond_to }) = self.receiver.recv().await {
            let response = self.handle(request);
            let _ = respond_to.send(Ok(response));
        }
        info!(collections = self.store.len(), "Shutdown");
    }

    fn handle(&mut self, request: Request) -> Response {
        let (collection, id) = split_url(&request.url);
        debug!(method = %request.method, url = %request.url, "Request");
        let response = match (request.method, id) {
            (HttpMethod::Get, None) => self.list(&collection, &request.params),
            (HttpMethod::Get, Some(id)) => self.get(&collection, id),
            (HttpMethod::Post, None) => match request.body {
                Some(Value::Object(_)) => {
                    let stored = self.insert(&collection, request.body.unwrap_or(Value::Null));
                    Response::new(201, stored)
                }
                _ => Response::new(400, json!({"error": "expected an object body"})),
            },
            (HttpMethod::Put | HttpMethod::Patch, Some(id)) => {
                self.update(&collection, id, request.body.unwrap_or(Value::Null))
            }
            (HttpMethod::Delete, Some(id)) => self.delete(&collection, id),
            _ => Response::new(405, json!({"error": "method not allowed"})),
        };
        if !response.is_success() {
            warn!(url = %request.url, status = response.status, "Request rejected");
        }
        response
    }

    fn list(&self, collection: &str, params: &Params) -> Response {
        let items: Vec<Value> = self
            .store
            .get(collection)
            .map(|items| {
                items
                    .values()
                    .filter(|item| matches_params(item, params))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Response::ok(Value::Array(items))
    }

    fn get(&self, collection: &str, id: u64) -> Response {
        match self.store.get(collection).and_then(|items| items.get(&id)) {
            Some(item) => Response::ok(item.clone()),
            None => not_found(collection, id),
        }
    }

    fn insert(&mut self, collection: &str, mut item: Value) -> Value {
        let id = match item.get(&self.primary_key).and_then(Value::as_u64) {
            Some(id) => {
                self.next_id = self.next_id.max(id.saturating_add(1));
                id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        if let Value::Object(fields) = &mut item {
            fields.insert(self.primary_key.clone(), json!(id));
        }
        let items = self.store.entry(collection.to_string()).or_default();
        items.insert(id, item.clone());
        info!(collection, id, size = items.len(), "Created");
        item
    }

    fn update(&mut self, collection: &str, id: u64, body: Value) -> Response {
        let Some(item) = self.store.get_mut(collection).and_then(|items| items.get_mut(&id)) else {
            return not_found(collection, id);
        };
        if let (Value::Object(stored), Value::Object(changes)) = (&mut *item, body) {
            for (key, value) in changes {
                stored.insert(key, value);
            }
        }
        info!(collection, id, "Updated");
        Response::ok(item.clone())
    }

    fn delete(&mut self, collection: &str, id: u64) -> Response {
        match self.store.get_mut(collection).and_then(|items| items.remove(&id)) {
            Some(_) => {
                info!(collection, id, "Deleted");
                Response::new(204, Value::Null)
            }
            None => not_found(collection, id),
        }
    }
}

fn not_found(collection: &str, id: u64) -> Response {
    Response::new(404, json!({"error": format!("{collection}/{id} not found")}))
}

/// Splits `/bikes/7` into (`/bikes`, 7). Urls not ending in a number address a collection.
fn split_url(url: &str) -> (String, Option<u64>) {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((collection, last)) if !collection.is_empty() => match last.parse::<u64>() {
            Ok(id) => (collection.to_string(), Some(id)),
            Err(_) => (trimmed.to_string(), None),
        },
        _ => (trimmed.to_string(), None),
    }
}

/// Field equality against string-rendered params. A comma-separated param matches any
/// of its values. `page` is ignored.
fn matches_params(item: &Value, params: &Params) -> bool {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != "page")
        .all(|(key, expected)| match item.get(key) {
            Some(actual) => {
                let actual = render(actual);
                render(expected).split(',').any(|option| option == actual)
            }
            None => false,
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
