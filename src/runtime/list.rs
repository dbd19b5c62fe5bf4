//! Plain record lists and dummy targets.

use crate::error::{ModelResult, ProgrammerError};
use crate::framework::chain::ApiSlot;
use crate::framework::events::Completion;
use crate::framework::factory::{Key, ModelType, ResolveStrategy};
use crate::framework::properties::Mask;
use crate::runtime::{Record, Target};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;

/// An unscoped, shared list of records of one type.
///
/// Holds belongs-to-many values. Unlike a collection it has no url and no actions of
/// its own; it can only resolve its members.
#[derive(Clone)]
pub struct RecordList {
    model: ModelType,
    items: Arc<Mutex<Vec<Record>>>,
}

impl RecordList {
    pub(crate) fn new(model: &ModelType, records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            model: model.clone(),
            items: Arc::new(Mutex::new(records.into_iter().collect())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &ModelType {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.lock().get(index).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn push(&self, record: Record) -> &Self {
        self.lock().push(record);
        self
    }

    pub fn keys(&self) -> Vec<Key> {
        self.lock().iter().map(Record::pk).collect()
    }

    pub fn encode(&self, mask: Mask) -> ModelResult<Value> {
        let encoded = self
            .records()
            .iter()
            .map(|record| record.encode(mask))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Value::Array(encoded))
    }

    /// Loads unresolved members: with one request under bulk population, one fetch per
    /// member otherwise. The returned completion settles once every load has, with the
    /// first failure if any.
    pub fn resolve(&self) -> ModelResult<Completion> {
        let unresolved: Vec<Record> = self
            .records()
            .into_iter()
            .filter(|record| !record.is_resolved())
            .collect();
        if let ResolveStrategy::BulkPopulate { .. } = self.model.strategy() {
            return self.model.populate(&unresolved);
        }
        if unresolved.is_empty() {
            return Ok(Completion::settled(Ok(())));
        }
        let runtime = Handle::try_current().map_err(|_| ProgrammerError::NoRuntime)?;
        let fetches = unresolved
            .iter()
            .map(Record::fetch)
            .collect::<ModelResult<Vec<_>>>()?;
        let (settle, completion) = Completion::pending();
        runtime.spawn(async move {
            let mut outcome = Ok(());
            for fetch in fetches {
                let result = fetch.await;
                if outcome.is_ok() {
                    outcome = result;
                }
            }
            settle.settle(outcome);
        });
        Ok(completion)
    }

    /// Calls a list-level definition.
    pub fn call(&self, name: &str, args: &[Value]) -> ModelResult<Value> {
        self.model
            .invoke(&[ApiSlot::List], &Target::List(self.clone()), name, args)
    }
}

impl fmt::Debug for RecordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordList")
            .field("model", &self.model.label())
            .field("keys", &self.keys())
            .finish()
    }
}

/// A stand-in target for calling definitions without a real record or collection.
#[derive(Clone)]
pub struct Dummy {
    model: ModelType,
    as_collection: bool,
}

impl Dummy {
    pub(crate) fn new(model: &ModelType, as_collection: bool) -> Self {
        Self {
            model: model.clone(),
            as_collection,
        }
    }

    pub fn model(&self) -> &ModelType {
        &self.model
    }

    pub fn is_collection(&self) -> bool {
        self.as_collection
    }

    /// Calls a dummy-level definition, falling back to the record or collection slot.
    pub fn call(&self, name: &str, args: &[Value]) -> ModelResult<Value> {
        let fallback = if self.as_collection {
            ApiSlot::Collection
        } else {
            ApiSlot::Record
        };
        self.model
            .invoke(&[ApiSlot::Dummy, fallback], &Target::Dummy(self.clone()), name, args)
    }
}

impl fmt::Debug for Dummy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dummy")
            .field("model", &self.model.label())
            .field("as_collection", &self.as_collection)
            .finish()
    }
}
