//! # Record/Collection Runtime
//!
//! Instances of assembled model types: [`Record`], [`Collection`], [`RecordList`] and
//! [`Dummy`]. Every handle is cheap to clone and shares state with its clones.
//!
//! All synchronous work (hooks, decode, encode, method calls) runs inside the caller.
//! Actions (`fetch`, `save`, `destroy`) return a [`Completion`] once their before-phase
//! is done; the transport call runs on a spawned tokio task.
//!
//! [`Completion`]: crate::framework::events::Completion

pub mod actions;
pub mod collection;
pub mod identity;
pub mod list;
pub mod record;
pub mod relations;

pub use collection::Collection;
pub use identity::IdentityMap;
pub use list::{Dummy, RecordList};
pub use record::Record;

use crate::framework::chain::ApiSlot;
use crate::framework::factory::ModelType;

/// What a method or hook runs against.
#[derive(Clone, Debug)]
pub enum Target {
    Record(Record),
    Collection(Collection),
    Model(ModelType),
    List(RecordList),
    Dummy(Dummy),
}

impl Target {
    pub fn model(&self) -> ModelType {
        match self {
            Self::Record(record) => record.model().clone(),
            Self::Collection(collection) => collection.model().clone(),
            Self::Model(model) => model.clone(),
            Self::List(list) => list.model().clone(),
            Self::Dummy(dummy) => dummy.model().clone(),
        }
    }

    pub fn slot(&self) -> ApiSlot {
        match self {
            Self::Record(_) => ApiSlot::Record,
            Self::Collection(_) => ApiSlot::Collection,
            Self::Model(_) => ApiSlot::Model,
            Self::List(_) => ApiSlot::List,
            Self::Dummy(_) => ApiSlot::Dummy,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Self::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

/// The value held by a relation property.
#[derive(Clone, Debug)]
pub enum RelationValue {
    One(Record),
    Many(Collection),
    List(RecordList),
}

impl RelationValue {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::One(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Self::Many(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RecordList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }
}
