//! # Collection
//!
//! An ordered, shared list of records of one type, bound either to the model url or to
//! a path under a parent record (has-many). Records built through a collection are
//! scoped to it: they see its hooks and take their base url from it.
//!
//! Fetching appends decoded items. Calling [`Collection::reset`] makes the next
//! successful fetch replace the items instead.

use crate::codec::url::join_url;
use crate::error::{ModelResult, ProgrammerError, RequestError};
use crate::framework::chain::ApiSlot;
use crate::framework::events::{
    run_hooks, ActionPhase, Completion, Hook, HookEvent, HookRegistry, AFTER_ADD, AFTER_REMOVE,
};
use crate::framework::factory::ModelType;
use crate::framework::properties::Mask;
use crate::runtime::actions::{self, perform, Action, ActionHost, ActionState};
use crate::runtime::record::{Record, RecordInner, Scope, StagedRecord};
use crate::runtime::relations::PendingRefs;
use crate::runtime::Target;
use crate::transport::{HttpMethod, Params, Request, Response};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

const PAGE_PARAM: &str = "page";

#[derive(Clone)]
pub(crate) enum CollectionScope {
    Model,
    Nested { parent: Weak<RecordInner>, path: String },
}

#[derive(Default)]
struct CollectionState {
    items: Vec<Record>,
    params: Params,
    metadata: Option<Value>,
    reset_pending: bool,
    resolved: bool,
    hooks: HookRegistry,
    action: ActionState,
}

pub(crate) struct CollectionInner {
    model: ModelType,
    scope: CollectionScope,
    state: Mutex<CollectionState>,
}

#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    pub(crate) fn create_in(model: &ModelType, scope: CollectionScope, params: Params) -> Collection {
        Collection {
            inner: Arc::new(CollectionInner {
                model: model.clone(),
                scope,
                state: Mutex::new(CollectionState {
                    params,
                    ..CollectionState::default()
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Collection {
        Collection { inner }
    }

    fn lock(&self) -> MutexGuard<'_, CollectionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &ModelType {
        &self.inner.model
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Items ---

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.lock().items.get(index).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().items.clone()
    }

    pub fn index_of(&self, record: &Record) -> Option<usize> {
        self.lock().items.iter().position(|item| item.ptr_eq(record))
    }

    /// Appends `record` unless it is already a member. Fires `after-add`.
    pub fn add(&self, record: &Record) -> &Self {
        {
            let mut state = self.lock();
            if state.items.iter().any(|item| item.ptr_eq(record)) {
                return self;
            }
            state.items.push(record.clone());
        }
        actions::notify(self, HookEvent::new(AFTER_ADD, self.target()).with_record(record.clone()));
        self
    }

    /// Removes `record` if it is a member. Fires `after-remove`.
    pub fn remove(&self, record: &Record) -> &Self {
        let removed = {
            let mut state = self.lock();
            let before = state.items.len();
            state.items.retain(|item| !item.ptr_eq(record));
            state.items.len() != before
        };
        if removed {
            actions::notify(self, HookEvent::new(AFTER_REMOVE, self.target()).with_record(record.clone()));
        }
        self
    }

    /// A new record scoped to this collection. Not added until created on the server.
    pub fn build(&self, attrs: Value) -> Record {
        let record = Record::create_in(self.model(), self.record_scope());
        record.assign(&attrs);
        record
    }

    /// A record decoded from raw data and appended.
    pub fn build_raw(&self, raw: &Value) -> ModelResult<Record> {
        let record = self.model().build_raw_in(raw, self.record_scope())?;
        self.add(&record);
        Ok(record)
    }

    /// Builds and saves a record; it joins the collection once created.
    pub fn create(&self, attrs: Value) -> ModelResult<Record> {
        let record = self.build(attrs);
        record.save()?;
        Ok(record)
    }

    /// Appends one record per element of a raw array. Nothing changes unless every
    /// element decodes.
    pub fn decode(&self, raw: &Value) -> ModelResult<()> {
        let Value::Array(items) = raw else {
            return Err(self.not_an_array().into());
        };
        let mut pending = PendingRefs::default();
        let staged = self.stage_items(items, &mut pending)?;
        self.commit_items(staged, false);
        pending.flush();
        Ok(())
    }

    /// Decodes `items` into records scoped to this collection without applying them.
    pub(crate) fn stage_items(&self, items: &[Value], pending: &mut PendingRefs) -> ModelResult<Vec<StagedRecord>> {
        items
            .iter()
            .map(|item| {
                self.model()
                    .shared_or_new(item, self.record_scope())
                    .stage(item, Mask::READ, pending)
            })
            .collect()
    }

    /// Applies staged records and appends them, or replaces the items with them.
    pub(crate) fn commit_items(&self, staged: Vec<StagedRecord>, replace: bool) {
        let records: Vec<Record> = staged.iter().map(|s| s.record().clone()).collect();
        for record in staged {
            record.commit(None);
        }
        merge_items(&mut self.lock(), records, replace);
        debug!(model = %self.model().label(), replace, "Decoded collection");
    }

    fn not_an_array(&self) -> RequestError {
        RequestError::Malformed(format!("expected an array for {}", self.model().label()))
    }

    pub fn encode(&self, mask: Mask) -> ModelResult<Value> {
        let encoded = self
            .records()
            .iter()
            .map(|record| record.encode(mask))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Value::Array(encoded))
    }

    // --- Params & paging ---

    pub fn params(&self) -> Params {
        self.lock().params.clone()
    }

    pub fn set_param(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.lock().params.insert(key.to_string(), value.into());
        self
    }

    /// Current page, 1 when unset.
    pub fn page(&self) -> u64 {
        self.lock()
            .params
            .get(PAGE_PARAM)
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    pub fn set_page(&self, page: u64) -> &Self {
        self.set_param(PAGE_PARAM, page)
    }

    /// Metadata unpacked from the last fetched response.
    pub fn metadata(&self) -> Option<Value> {
        self.lock().metadata.clone()
    }

    // --- Urls ---

    pub fn scope_url(&self) -> Option<String> {
        match &self.inner.scope {
            CollectionScope::Model => self.model().url().map(str::to_string),
            CollectionScope::Nested { parent, path } => {
                let parent = self.parent_from(parent)?;
                Some(join_url(&parent.url()?, path))
            }
        }
    }

    pub fn url(&self) -> Option<String> {
        self.model().url_builder().collection_url(self)
    }

    /// The record owning a has-many collection.
    pub fn parent(&self) -> Option<Record> {
        match &self.inner.scope {
            CollectionScope::Nested { parent, .. } => self.parent_from(parent),
            CollectionScope::Model => None,
        }
    }

    fn parent_from(&self, parent: &Weak<RecordInner>) -> Option<Record> {
        parent.upgrade().map(Record::from_inner)
    }

    fn record_scope(&self) -> Scope {
        Scope::Collection(Arc::downgrade(&self.inner))
    }

    // --- Actions ---

    /// Makes the next successful fetch replace the items.
    pub fn reset(&self) -> &Self {
        self.lock().reset_pending = true;
        self
    }

    pub fn refresh(&self) -> ModelResult<Completion> {
        self.reset();
        self.fetch()
    }

    pub fn fetch(&self) -> ModelResult<Completion> {
        self.fetch_with(Params::new())
    }

    /// Fetches with the collection params merged with `params`.
    pub fn fetch_with(&self, params: Params) -> ModelResult<Completion> {
        let url = match self.url() {
            Some(url) if !self.model().is_anonymous() => url,
            _ => return Err(ProgrammerError::Unroutable(self.model().label()).into()),
        };
        let mut merged = self.params();
        merged.extend(params);
        let request = Request::new(HttpMethod::Get, url).with_params(merged);
        perform(self, Action::FetchMany, request, |collection: &Collection, response: Response, generation| {
            collection.absorb(response.data, generation)
        })
    }

    /// Applies a fetched page for the action `generation`. Returns false when a newer
    /// action superseded this one. A failed decode keeps the items and a pending reset.
    fn absorb(&self, body: Value, generation: u64) -> Result<bool, RequestError> {
        let model = self.model().clone();
        let unpacked = model.packer().unpack(&model, true, body)?;
        let Value::Array(items) = &unpacked.data else {
            return Err(self.not_an_array());
        };
        let mut pending = PendingRefs::default();
        let staged = self.stage_items(items, &mut pending)?;
        let records: Vec<Record> = staged.iter().map(|s| s.record().clone()).collect();
        {
            let mut state = self.lock();
            if !state.action.is_current(generation) {
                return Ok(false);
            }
            let replace = std::mem::take(&mut state.reset_pending);
            merge_items(&mut state, records, replace);
            state.metadata = unpacked.metadata;
        }
        for record in staged {
            record.commit(None);
        }
        debug!(model = %model.label(), items = items.len(), "Decoded collection");
        pending.flush();
        Ok(true)
    }

    pub fn completion(&self) -> Completion {
        self.lock().action.completion()
    }

    pub fn phase(&self) -> ActionPhase {
        self.lock().action.phase()
    }

    pub fn is_pending(&self) -> bool {
        self.phase() == ActionPhase::Requesting
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().resolved
    }

    pub fn last_error(&self) -> Option<RequestError> {
        self.lock().action.last_error()
    }

    // --- Hooks & methods ---

    /// Registers a hook seen by the collection and by every record scoped to it.
    pub fn on<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&mut HookEvent) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.lock().hooks.on(event, Hook::new(callback));
        self
    }

    pub fn dispatch(&self, event: &str, data: Value) -> ModelResult<()> {
        let mut event = HookEvent::new(event, self.target()).with_data(data);
        self.dispatch_event(&mut event)
    }

    pub(crate) fn run_own_hooks(&self, event: &mut HookEvent) -> ModelResult<()> {
        let own = self.lock().hooks.listeners(event.name()).to_vec();
        run_hooks(&own, event)
    }

    pub(crate) fn dispatch_event(&self, event: &mut HookEvent) -> ModelResult<()> {
        self.run_own_hooks(event)?;
        let name = event.name().to_string();
        run_hooks(self.model().hooks().listeners(&name), event)
    }

    /// Calls a collection-level definition (Collection slot, then Scope slot).
    pub fn call(&self, name: &str, args: &[Value]) -> ModelResult<Value> {
        self.model().invoke(
            &[ApiSlot::Collection, ApiSlot::Scope],
            &self.target(),
            name,
            args,
        )
    }

    fn target(&self) -> Target {
        Target::Collection(self.clone())
    }
}

/// Appends `records` that are not members yet, after dropping the items on `replace`.
fn merge_items(state: &mut CollectionState, records: Vec<Record>, replace: bool) {
    if replace {
        state.items.clear();
    }
    for record in records {
        if !state.items.iter().any(|item| item.ptr_eq(&record)) {
            state.items.push(record);
        }
    }
    state.resolved = true;
}

impl ActionHost for Collection {
    fn model(&self) -> &ModelType {
        &self.inner.model
    }

    fn target(&self) -> Target {
        Target::Collection(self.clone())
    }

    fn with_action<R>(&self, f: impl FnOnce(&mut ActionState) -> R) -> R {
        f(&mut self.lock().action)
    }

    fn dispatch_event(&self, event: &mut HookEvent) -> ModelResult<()> {
        Collection::dispatch_event(self, event)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Collection")
            .field("model", &self.inner.model.label())
            .field("len", &state.items.len())
            .field("params", &state.params)
            .field("phase", &state.action.phase())
            .finish()
    }
}
