//! # Lifecycle Event Bus
//!
//! Named hooks registered at three levels:
//!
//! - **type** hooks, registered by mixins through the builder,
//! - **scope** hooks, registered on a collection and fired for its members too,
//! - **instance** hooks, registered on a single record or collection.
//!
//! A record dispatches to its own hooks first, then to its collection scope, then to
//! the type. Inside each level, hooks run in registration order.
//!
//! ## Completion futures
//!
//! Every action owns a [`Completion`]: a shared, cloneable future backed by a tokio
//! `watch` channel. The action holds the only [`Settle`] handle and consumes it when
//! the action ends, so a completion settles exactly once. Continuations attached after
//! settlement still observe the outcome.
//!
//! ```rust,ignore
//! record.fetch()?;
//! record.completion().await?;
//! ```

use crate::error::{ModelResult, RequestError};
use crate::runtime::{Record, Target};
use crate::transport::{Request, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const AFTER_INIT: &str = "after-init";
pub const BEFORE_FEED: &str = "before-feed";
pub const AFTER_FEED: &str = "after-feed";
pub const BEFORE_RENDER: &str = "before-render";

pub const BEFORE_REQUEST: &str = "before-request";
pub const AFTER_REQUEST: &str = "after-request";
pub const AFTER_REQUEST_ERROR: &str = "after-request-error";

pub const BEFORE_FETCH: &str = "before-fetch";
pub const AFTER_FETCH: &str = "after-fetch";
pub const AFTER_FETCH_ERROR: &str = "after-fetch-error";

pub const BEFORE_FETCH_MANY: &str = "before-fetch-many";
pub const AFTER_FETCH_MANY: &str = "after-fetch-many";
pub const AFTER_FETCH_MANY_ERROR: &str = "after-fetch-many-error";

pub const BEFORE_SAVE: &str = "before-save";
pub const AFTER_SAVE: &str = "after-save";
pub const AFTER_SAVE_ERROR: &str = "after-save-error";

pub const BEFORE_CREATE: &str = "before-create";
pub const AFTER_CREATE: &str = "after-create";
pub const AFTER_CREATE_ERROR: &str = "after-create-error";

pub const BEFORE_UPDATE: &str = "before-update";
pub const AFTER_UPDATE: &str = "after-update";
pub const AFTER_UPDATE_ERROR: &str = "after-update-error";

pub const BEFORE_DESTROY: &str = "before-destroy";
pub const AFTER_DESTROY: &str = "after-destroy";
pub const AFTER_DESTROY_ERROR: &str = "after-destroy-error";

pub const AFTER_ADD: &str = "after-add";
pub const AFTER_REMOVE: &str = "after-remove";

// =============================================================================
// HOOKS
// =============================================================================

/// Payload handed to every hook.
///
/// Hooks receive it mutably: `before-request` hooks may rewrite the request,
/// `before-feed` and `before-render` hooks may rewrite `data`.
pub struct HookEvent {
    name: String,
    pub target: Target,
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub error: Option<RequestError>,
    /// The record added to or removed from a collection.
    pub record: Option<Record>,
    pub data: Value,
}

impl HookEvent {
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
            request: None,
            response: None,
            error: None,
            record: None,
            data: Value::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_error(mut self, error: RequestError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }
}

pub type HookFn = dyn Fn(&mut HookEvent) -> ModelResult<()> + Send + Sync;

#[derive(Clone)]
pub struct Hook(Arc<HookFn>);

impl Hook {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut HookEvent) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn call(&self, event: &mut HookEvent) -> ModelResult<()> {
        (self.0)(event)
    }
}

/// Hooks by event name, each list in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Hook>>,
}

impl HookRegistry {
    pub fn on(&mut self, event: &str, hook: Hook) {
        self.hooks.entry(event.to_string()).or_default().push(hook);
    }

    pub fn listeners(&self, event: &str) -> &[Hook] {
        self.hooks.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, event: &str) -> usize {
        self.listeners(event).len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<(&String, usize)> =
            self.hooks.iter().map(|(name, hooks)| (name, hooks.len())).collect();
        events.sort();
        f.debug_map().entries(events).finish()
    }
}

/// Runs `hooks` in order, stopping at the first error.
pub fn run_hooks(hooks: &[Hook], event: &mut HookEvent) -> ModelResult<()> {
    hooks.iter().try_for_each(|hook| hook.call(event))
}

// =============================================================================
// ACTION STATE & COMPLETION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Requesting,
    Succeeded,
    Failed,
}

pub type Outcome = Result<(), RequestError>;

/// Shared future of one action.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Completion {
    pub(crate) fn pending() -> (Settle, Completion) {
        let (tx, rx) = watch::channel(None);
        (Settle { tx }, Completion { rx })
    }

    /// A completion that is already settled.
    pub fn settled(outcome: Outcome) -> Self {
        let (_tx, rx) = watch::channel(Some(outcome));
        Self { rx }
    }

    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.rx.borrow().clone()
    }

    /// Waits for the action to settle.
    ///
    /// Resolves to [`RequestError::Dropped`] if the action was abandoned without settling.
    pub async fn wait(mut self) -> Outcome {
        let settled = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(RequestError::Dropped))
    }
}

impl IntoFuture for Completion {
    type Output = Outcome;
    type IntoFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("outcome", &self.outcome()).finish()
    }
}

/// Write side of a [`Completion`]. Consumed by settling.
pub(crate) struct Settle {
    tx: watch::Sender<Option<Outcome>>,
}

impl Settle {
    pub(crate) fn settle(self, outcome: Outcome) {
        self.tx.send_replace(Some(outcome));
    }
}
