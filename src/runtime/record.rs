//! # Record
//!
//! A record is a shared handle (`Arc` + `Mutex`) to one resource instance. Clones see the
//! same state. Attribute values are stored by attribute name; raw server names only exist
//! at the decode/encode boundary.
//!
//! ## Scopes
//!
//! The scope decides a record's base url and which collection hooks it sees:
//!
//! | scope | base url | collection hooks |
//! |---|---|---|
//! | `Model` | model url | none |
//! | `Collection` | collection url | the collection's |
//! | `Nested` (has-one) | `<parent url>/<path>` | none |
//! | `Fixed` (`single`) | the given url | none |
//!
//! Nested and fixed records are singletons: their resource url is the scope url itself.

use crate::error::{ModelError, ModelResult, ProgrammerError, RequestError};
use crate::framework::chain::ApiSlot;
use crate::framework::events::{
    run_hooks, ActionPhase, Completion, Hook, HookEvent, HookRegistry, AFTER_FEED, AFTER_INIT,
    BEFORE_FEED, BEFORE_RENDER,
};
use crate::framework::factory::{Key, ModelType};
use crate::framework::properties::{Mask, PropertyDescriptor, RelationKind, RelationSpec};
use crate::codec::url::join_url;
use crate::runtime::actions::{self, perform, Action, ActionHost, ActionState};
use crate::runtime::collection::{Collection, CollectionInner, CollectionScope};
use crate::runtime::relations::{self, PendingRefs};
use crate::runtime::{RecordList, RelationValue, Target};
use crate::transport::{HttpMethod, Params, Request, Response};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

#[derive(Clone)]
pub(crate) enum Scope {
    Model,
    Collection(Weak<CollectionInner>),
    Nested { parent: Weak<RecordInner>, path: String },
    Fixed(String),
}

#[derive(Default)]
struct RecordState {
    attrs: Map<String, Value>,
    original: Map<String, Value>,
    relations: HashMap<String, RelationValue>,
    resolved: bool,
    destroyed: bool,
    hooks: HookRegistry,
    action: ActionState,
}

pub(crate) struct RecordInner {
    model: ModelType,
    scope: Scope,
    state: Mutex<RecordState>,
}

#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

impl Record {
    pub(crate) fn create_in(model: &ModelType, scope: Scope) -> Record {
        let mut attrs = Map::new();
        for descriptor in model.properties().iter() {
            if descriptor.is_computed() || descriptor.is_relation() {
                continue;
            }
            if let Some(init) = &descriptor.init {
                attrs.insert(descriptor.name.clone(), init.produce());
            }
        }
        let record = Record {
            inner: Arc::new(RecordInner {
                model: model.clone(),
                scope,
                state: Mutex::new(RecordState {
                    attrs,
                    ..RecordState::default()
                }),
            }),
        };
        actions::notify(&record, HookEvent::new(AFTER_INIT, record.target()));
        record
    }

    pub(crate) fn from_inner(inner: Arc<RecordInner>) -> Record {
        Record { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RecordInner> {
        Arc::downgrade(&self.inner)
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &ModelType {
        &self.inner.model
    }

    /// True when both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    pub fn pk(&self) -> Key {
        Key::from_value(self.lock().attrs.get(self.model().primary_key()))
    }

    /// Attribute value by name. Computed properties are evaluated on each call.
    pub fn get(&self, attr: &str) -> Option<Value> {
        if let Some(compute) = self.model().properties().lookup(attr).and_then(|d| d.computed.clone()) {
            return Some(compute(self));
        }
        self.lock().attrs.get(attr).cloned()
    }

    pub fn set(&self, attr: &str, value: impl Into<Value>) -> &Self {
        self.lock().attrs.insert(attr.to_string(), value.into());
        self
    }

    /// Sets every field of an object, keyed by attribute name. Relation and computed
    /// names are skipped.
    pub fn assign(&self, attrs: &Value) -> &Self {
        let Value::Object(fields) = attrs else {
            return self;
        };
        let properties = self.model().properties();
        let mut state = self.lock();
        for (name, value) in fields {
            let skipped = properties
                .lookup(name)
                .is_some_and(|d| d.is_relation() || d.is_computed());
            if !skipped {
                state.attrs.insert(name.clone(), value.clone());
            }
        }
        drop(state);
        self
    }

    /// Plain attributes plus computed values.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attrs = self.lock().attrs.clone();
        for descriptor in self.model().properties().iter() {
            if let Some(compute) = &descriptor.computed {
                attrs.insert(descriptor.name.clone(), compute(self));
            }
        }
        attrs
    }

    // =========================================================================
    // DIRTY TRACKING
    // =========================================================================

    /// Names of attributes that differ from the last decoded snapshot, sorted.
    pub fn changes(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .attrs
            .iter()
            .filter(|(name, value)| state.original.get(*name) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(
            state
                .original
                .keys()
                .filter(|name| !state.attrs.contains_key(*name))
                .cloned(),
        );
        names.sort();
        names
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Puts attributes back to the last decoded snapshot.
    pub fn restore(&self) -> &Self {
        let mut state = self.lock();
        state.attrs = state.original.clone();
        drop(state);
        self
    }

    // =========================================================================
    // DECODE / ENCODE
    // =========================================================================

    pub fn decode(&self, raw: &Value) -> ModelResult<()> {
        self.decode_with(raw, Mask::READ)
    }

    /// Feeds raw server data into the record, honoring property masks against `mask`.
    /// Nothing changes unless the whole payload decodes.
    pub fn decode_with(&self, raw: &Value, mask: Mask) -> ModelResult<()> {
        let mut pending = PendingRefs::default();
        self.stage(raw, mask, &mut pending)?.commit(None);
        pending.flush();
        Ok(())
    }

    /// Decodes `raw` into a [`StagedRecord`] without modifying any existing state.
    pub(crate) fn stage(&self, raw: &Value, mask: Mask, pending: &mut PendingRefs) -> ModelResult<StagedRecord> {
        let mut event = HookEvent::new(BEFORE_FEED, self.target()).with_data(raw.clone());
        self.dispatch_event(&mut event)?;
        let Value::Object(fields) = &event.data else {
            return Err(RequestError::Malformed(format!(
                "expected an object for {}",
                self.model().label()
            ))
            .into());
        };

        let model = self.model().clone();
        let mut consumed = HashSet::new();
        let mut attrs = Vec::new();
        let mut relations = Vec::new();
        for descriptor in model.properties().iter() {
            let raw_name = model.decoded_from(descriptor);
            consumed.insert(raw_name.clone());
            if let Some(spec) = &descriptor.relation {
                relations::consume_keys(&model, descriptor, spec, &mut consumed);
                if descriptor.mask.allows(mask) {
                    relations.extend(relations::stage_relation(self, descriptor, spec, fields, pending)?);
                }
                continue;
            }
            if descriptor.is_computed() || !descriptor.mask.allows(mask) {
                continue;
            }
            let Some(value) = fields.get(&raw_name) else {
                continue;
            };
            let value = match &descriptor.decoder {
                Some(decoder) => decoder(value.clone()),
                None => value.clone(),
            };
            attrs.push((descriptor.name.clone(), value));
        }
        if Mask::DEFAULT.allows(mask) {
            for (raw_name, value) in fields {
                if !consumed.contains(raw_name) {
                    attrs.push((model.naming().decode_name(raw_name), value.clone()));
                }
            }
        }

        Ok(StagedRecord {
            record: self.clone(),
            data: event.data,
            attrs,
            relations,
        })
    }

    /// Serializes the properties taking part in `mask`, keyed by raw name.
    pub fn encode(&self, mask: Mask) -> ModelResult<Value> {
        let model = self.model().clone();
        let attrs = self.lock().attrs.clone();
        let mut output = Map::new();
        let mut declared = HashSet::new();

        for descriptor in model.properties().iter() {
            declared.insert(descriptor.name.as_str());
            if descriptor.is_computed() || !descriptor.mask.allows(mask) {
                continue;
            }
            if let Some(spec) = &descriptor.relation {
                relations::encode_relation(self, descriptor, spec, mask, &mut output)?;
                continue;
            }
            let Some(value) = attrs.get(&descriptor.name) else {
                continue;
            };
            let value = match &descriptor.encoder {
                Some(encoder) => encoder(value.clone()),
                None => value.clone(),
            };
            output.insert(model.encoded_as(descriptor), value);
        }
        if Mask::DEFAULT.allows(mask) {
            for (name, value) in &attrs {
                if !declared.contains(name.as_str()) {
                    output.insert(model.naming().encode_name(name), value.clone());
                }
            }
        }

        let mut event = HookEvent::new(BEFORE_RENDER, self.target()).with_data(Value::Object(output));
        self.dispatch_event(&mut event)?;
        Ok(event.data)
    }

    // =========================================================================
    // URLS
    // =========================================================================

    pub fn scope_url(&self) -> Option<String> {
        match &self.inner.scope {
            Scope::Model => self.model().url().map(str::to_string),
            Scope::Collection(collection) => match collection.upgrade() {
                Some(inner) => Collection::from_inner(inner).url(),
                None => self.model().url().map(str::to_string),
            },
            Scope::Nested { parent, path } => {
                let parent = Record::from_inner(parent.upgrade()?);
                Some(join_url(&parent.url()?, path))
            }
            Scope::Fixed(url) => Some(url.clone()),
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self.inner.scope, Scope::Nested { .. } | Scope::Fixed(_))
    }

    pub fn url(&self) -> Option<String> {
        self.model().url_builder().resource_url(self)
    }

    /// The collection this record was built in, while it is alive.
    pub fn scope_collection(&self) -> Option<Collection> {
        match &self.inner.scope {
            Scope::Collection(collection) => collection.upgrade().map(Collection::from_inner),
            _ => None,
        }
    }

    fn routable(&self, url: Option<String>) -> ModelResult<String> {
        match url {
            Some(url) if !self.model().is_anonymous() => Ok(url),
            _ => Err(ProgrammerError::Unroutable(self.model().label()).into()),
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    pub fn fetch(&self) -> ModelResult<Completion> {
        self.fetch_with(Params::new())
    }

    pub fn fetch_with(&self, params: Params) -> ModelResult<Completion> {
        let url = self.routable(self.url())?;
        let request = Request::new(HttpMethod::Get, url).with_params(params);
        perform(self, Action::Fetch, request, |record: &Record, response: Response, generation| {
            record.absorb(response.data, generation)
        })
    }

    /// Fetches only if the record was never decoded.
    pub fn resolve(&self) -> ModelResult<Completion> {
        if self.is_resolved() {
            return Ok(Completion::settled(Ok(())));
        }
        self.fetch()
    }

    /// Creates the record when it has no key, updates it otherwise.
    pub fn save(&self) -> ModelResult<Completion> {
        let model = self.model().clone();
        let updating = self.pk().is_present() || self.is_singleton();
        let (action, method, url, mask) = if updating {
            let url = model.url_builder().update_url(self);
            (Action::Update, HttpMethod::Put, url, Mask::UPDATE)
        } else {
            let url = model.url_builder().create_url(self);
            (Action::Create, HttpMethod::Post, url, Mask::CREATE)
        };
        let url = self.routable(url)?;
        let body = model.packer().pack(&model, false, self.encode(mask)?);
        let request = Request::new(method, url).with_body(body);

        perform(self, action, request, move |record: &Record, response: Response, generation| {
            if !record.absorb(response.data, generation)? {
                return Ok(false);
            }
            if action == Action::Create {
                if let Some(collection) = record.scope_collection() {
                    collection.add(record);
                }
            }
            Ok(true)
        })
    }

    pub fn destroy(&self) -> ModelResult<Completion> {
        let url = self.routable(self.model().url_builder().destroy_url(self))?;
        let request = Request::new(HttpMethod::Delete, url);
        perform(self, Action::Destroy, request, |record: &Record, _response: Response, generation| {
            {
                let mut state = record.lock();
                if !state.action.is_current(generation) {
                    return Ok(false);
                }
                state.destroyed = true;
            }
            if let Some(collection) = record.scope_collection() {
                collection.remove(record);
            }
            if let (Some(map), Key::Present(key)) = (record.model().identity_map(), record.pk()) {
                map.remove(&key);
            }
            Ok(true)
        })
    }

    /// Decodes a response body for the action `generation`. Empty bodies leave the
    /// record untouched. Returns false when a newer action superseded this one.
    fn absorb(&self, body: Value, generation: u64) -> Result<bool, RequestError> {
        if body.is_null() {
            return Ok(self.is_current(generation));
        }
        let model = self.model().clone();
        let unpacked = model.packer().unpack(&model, false, body)?;
        let mut pending = PendingRefs::default();
        let staged = self.stage(&unpacked.data, Mask::READ, &mut pending)?;
        if !staged.commit(Some(generation)) {
            return Ok(false);
        }
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

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn last_error(&self) -> Option<RequestError> {
        self.lock().action.last_error()
    }

    // =========================================================================
    // HOOKS & METHODS
    // =========================================================================

    /// Registers an instance-level hook.
    pub fn on<F>(&self, event: &str, callback: F) -> &Self
    where
        F: Fn(&mut HookEvent) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.lock().hooks.on(event, Hook::new(callback));
        self
    }

    /// Fires `event` through instance, scope collection and type hooks.
    pub fn dispatch(&self, event: &str, data: Value) -> ModelResult<()> {
        let mut event = HookEvent::new(event, self.target()).with_data(data);
        self.dispatch_event(&mut event)
    }

    pub(crate) fn dispatch_event(&self, event: &mut HookEvent) -> ModelResult<()> {
        let own = self.lock().hooks.listeners(event.name()).to_vec();
        run_hooks(&own, event)?;
        if let Some(collection) = self.scope_collection() {
            collection.run_own_hooks(event)?;
        }
        let name = event.name().to_string();
        run_hooks(self.model().hooks().listeners(&name), event)
    }

    /// Calls a record-level definition.
    pub fn call(&self, name: &str, args: &[Value]) -> ModelResult<Value> {
        self.model()
            .invoke(&[ApiSlot::Record], &self.target(), name, args)
    }

    // =========================================================================
    // RELATIONS
    // =========================================================================

    fn relation_descriptor(&self, name: &str) -> ModelResult<(&PropertyDescriptor, &RelationSpec)> {
        self.model()
            .properties()
            .lookup(name)
            .and_then(|d| d.relation.as_ref().map(|spec| (d, spec)))
            .ok_or_else(|| ProgrammerError::UnknownRelation(name.to_string()).into())
    }

    fn expect_kind(name: &str, spec: &RelationSpec, expected: &[RelationKind]) -> ModelResult<()> {
        if expected.contains(&spec.kind) {
            return Ok(());
        }
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        Err(ProgrammerError::RelationKind {
            name: name.to_string(),
            actual: spec.kind.to_string(),
            expected: expected.join(" or "),
        }
        .into())
    }

    pub(crate) fn relation(&self, name: &str) -> Option<RelationValue> {
        self.lock().relations.get(name).cloned()
    }

    pub(crate) fn set_relation(&self, name: &str, value: Option<RelationValue>) {
        let mut state = self.lock();
        match value {
            Some(value) => state.relations.insert(name.to_string(), value),
            None => state.relations.remove(name),
        };
    }

    /// The current value of any relation. Has-many and has-one values are created on
    /// first access.
    pub fn related(&self, name: &str) -> ModelResult<Option<RelationValue>> {
        let (_, spec) = self.relation_descriptor(name)?;
        match spec.kind {
            RelationKind::HasMany => self.many(name).map(|c| Some(RelationValue::Many(c))),
            RelationKind::HasOne => self.one(name).map(|r| r.map(RelationValue::One)),
            RelationKind::BelongsTo | RelationKind::BelongsToMany => Ok(self.relation(name)),
        }
    }

    /// A has-one or belongs-to relation.
    pub fn one(&self, name: &str) -> ModelResult<Option<Record>> {
        let (descriptor, spec) = self.relation_descriptor(name)?;
        Self::expect_kind(name, spec, &[RelationKind::HasOne, RelationKind::BelongsTo])?;
        if let Some(RelationValue::One(record)) = self.relation(name) {
            return Ok(Some(record));
        }
        if spec.kind == RelationKind::BelongsTo {
            return Ok(None);
        }

        let target = self.model().relation_target(name, spec)?;
        let path = spec
            .path
            .clone()
            .unwrap_or_else(|| self.model().encoded_as(descriptor));
        let created = Record::create_in(
            &target,
            Scope::Nested {
                parent: self.downgrade(),
                path,
            },
        );
        let mut state = self.lock();
        let value = state
            .relations
            .entry(name.to_string())
            .or_insert(RelationValue::One(created));
        match value {
            RelationValue::One(record) => Ok(Some(record.clone())),
            _ => Ok(None),
        }
    }

    /// A has-many relation: a collection nested under this record's url.
    pub fn many(&self, name: &str) -> ModelResult<Collection> {
        let (descriptor, spec) = self.relation_descriptor(name)?;
        Self::expect_kind(name, spec, &[RelationKind::HasMany])?;
        if let Some(RelationValue::Many(collection)) = self.relation(name) {
            return Ok(collection);
        }

        let target = self.model().relation_target(name, spec)?;
        let path = spec
            .path
            .clone()
            .unwrap_or_else(|| self.model().encoded_as(descriptor));
        let created = Collection::create_in(
            &target,
            CollectionScope::Nested {
                parent: self.downgrade(),
                path,
            },
            Params::new(),
        );
        let mut state = self.lock();
        let value = state
            .relations
            .entry(name.to_string())
            .or_insert_with(|| RelationValue::Many(created));
        match value {
            RelationValue::Many(collection) => Ok(collection.clone()),
            _ => Err(ModelError::custom(format!("relation `{name}` holds a different value"))),
        }
    }

    /// A belongs-to-many relation. Empty until decoded or set.
    pub fn list(&self, name: &str) -> ModelResult<RecordList> {
        let (_, spec) = self.relation_descriptor(name)?;
        Self::expect_kind(name, spec, &[RelationKind::BelongsToMany])?;
        if let Some(RelationValue::List(list)) = self.relation(name) {
            return Ok(list);
        }
        let target = self.model().relation_target(name, spec)?;
        Ok(target.list(Vec::new()))
    }

    /// Points a belongs-to relation at `record`, or clears it.
    pub fn set_one(&self, name: &str, record: Option<Record>) -> ModelResult<()> {
        let (_, spec) = self.relation_descriptor(name)?;
        Self::expect_kind(name, spec, &[RelationKind::BelongsTo])?;
        self.set_relation(name, record.map(RelationValue::One));
        Ok(())
    }

    pub fn set_list(&self, name: &str, list: RecordList) -> ModelResult<()> {
        let (_, spec) = self.relation_descriptor(name)?;
        Self::expect_kind(name, spec, &[RelationKind::BelongsToMany])?;
        self.set_relation(name, Some(RelationValue::List(list)));
        Ok(())
    }

    pub(crate) fn adopt_action(&self, completion: Completion) -> u64 {
        self.lock().action.adopt(completion)
    }

    pub(crate) fn finish_action(&self, generation: u64, outcome: &crate::framework::events::Outcome) -> bool {
        self.lock().action.finish(generation, outcome)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.lock().action.is_current(generation)
    }

    fn target(&self) -> Target {
        Target::Record(self.clone())
    }
}

// =============================================================================
// STAGED DECODE
// =============================================================================

/// A decoded payload that has not been applied yet.
///
/// Staging runs every step that can fail. Committing is infallible, so a payload either
/// lands completely or leaves the record, its relations and its collections as they were.
pub(crate) struct StagedRecord {
    record: Record,
    data: Value,
    attrs: Vec<(String, Value)>,
    relations: Vec<StagedRelation>,
}

pub(crate) enum StagedRelation {
    /// Replaces a belongs-to or belongs-to-many value.
    Set { name: String, value: Option<RelationValue> },
    /// A related record decoded from a nested object.
    Nested(StagedRecord),
    /// Replaces the items of a has-many collection.
    Many { collection: Collection, items: Vec<StagedRecord> },
}

impl StagedRecord {
    pub(crate) fn record(&self) -> &Record {
        &self.record
    }

    /// Applies the payload. With a `generation`, the record's own fields are written only
    /// while that action is still current; returns false otherwise and applies nothing.
    pub(crate) fn commit(self, generation: Option<u64>) -> bool {
        let StagedRecord {
            record,
            data,
            attrs,
            relations,
        } = self;
        let mut nested = Vec::new();
        {
            let mut state = record.lock();
            if generation.is_some_and(|generation| !state.action.is_current(generation)) {
                return false;
            }
            for (name, value) in attrs {
                state.attrs.insert(name, value);
            }
            state.original = state.attrs.clone();
            state.resolved = true;
            for relation in relations {
                match relation {
                    StagedRelation::Set { name, value: Some(value) } => {
                        state.relations.insert(name, value);
                    }
                    StagedRelation::Set { name, value: None } => {
                        state.relations.remove(&name);
                    }
                    other => nested.push(other),
                }
            }
        }

        for relation in nested {
            match relation {
                StagedRelation::Nested(staged) => {
                    staged.commit(None);
                }
                StagedRelation::Many { collection, items } => collection.commit_items(items, true),
                StagedRelation::Set { .. } => {}
            }
        }

        let model = record.model();
        if let (Some(map), Key::Present(key)) = (model.identity_map(), record.pk()) {
            map.insert(&key, &record);
        }
        debug!(model = %model.label(), "Decoded record");
        actions::notify(&record, HookEvent::new(AFTER_FEED, record.target()).with_data(data));
        true
    }
}

impl ActionHost for Record {
    fn model(&self) -> &ModelType {
        &self.inner.model
    }

    fn target(&self) -> Target {
        Target::Record(self.clone())
    }

    fn with_action<R>(&self, f: impl FnOnce(&mut ActionState) -> R) -> R {
        f(&mut self.lock().action)
    }

    fn dispatch_event(&self, event: &mut HookEvent) -> ModelResult<()> {
        Record::dispatch_event(self, event)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Record")
            .field("model", &self.inner.model.label())
            .field("attrs", &state.attrs)
            .field("phase", &state.action.phase())
            .finish()
    }
}
