//! # Override Chain
//!
//! Every `(slot, name)` pair of a model type resolves to one [`Member`]. When a later
//! mixin redefines a method, [`override_method`] wraps the new body so that it captures
//! the previous method as its parent. The parent is fixed at composition time, which is
//! what lets N-deep chains resolve: each layer's [`Call::call_super`] reaches exactly the
//! definition that was current when that layer was registered.
//!
//! The super binding lives in the [`Call`] value handed to each invocation. It is scoped
//! to that call, never visible to sibling calls, and needs no restoring when the body
//! returns early or fails.

use crate::error::{ModelResult, ProgrammerError};
use crate::framework::factory::ModelType;
use crate::runtime::{Collection, Record, Target};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The API surfaces a definition can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiSlot {
    Record,
    Collection,
    Model,
    /// Shared by the model and its collections.
    Scope,
    List,
    Dummy,
}

impl fmt::Display for ApiSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Record => "record",
            Self::Collection => "collection",
            Self::Model => "model",
            Self::Scope => "scope",
            Self::List => "list",
            Self::Dummy => "dummy",
        };
        f.write_str(name)
    }
}

pub type MethodFn = dyn Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync;

/// A method body plus the predecessor it overrides.
#[derive(Clone)]
pub struct Method {
    body: Arc<MethodFn>,
    parent: Option<Arc<Method>>,
}

impl Method {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        Self {
            body: Arc::new(body),
            parent: None,
        }
    }

    /// Number of layers in this chain, including this one.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |parent| parent.depth())
    }

    pub fn has_super(&self) -> bool {
        self.parent.is_some()
    }

    pub fn invoke(&self, target: &Target, name: &str, args: &[Value]) -> ModelResult<Value> {
        let call = Call {
            target,
            name,
            parent: self.parent.as_deref(),
        };
        (self.body)(&call, args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("depth", &self.depth()).finish()
    }
}

/// Composes `next` over `parent`.
///
/// With no parent, `next` is returned unchanged and calling super from it is a
/// [`ProgrammerError::MissingSuper`].
pub fn override_method(parent: Option<Method>, next: Method) -> Method {
    match parent {
        None => next,
        Some(parent) => Method {
            body: next.body,
            parent: Some(Arc::new(parent)),
        },
    }
}

/// Invocation context handed to a method body.
pub struct Call<'a> {
    target: &'a Target,
    name: &'a str,
    parent: Option<&'a Method>,
}

impl<'a> Call<'a> {
    pub fn target(&self) -> &'a Target {
        self.target
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn model(&self) -> ModelType {
        self.target.model()
    }

    pub fn record(&self) -> ModelResult<&'a Record> {
        match self.target {
            Target::Record(record) => Ok(record),
            _ => Err(self.wrong_target("record")),
        }
    }

    pub fn collection(&self) -> ModelResult<&'a Collection> {
        match self.target {
            Target::Collection(collection) => Ok(collection),
            _ => Err(self.wrong_target("collection")),
        }
    }

    pub fn has_super(&self) -> bool {
        self.parent.is_some()
    }

    /// Runs the overridden definition against the same target.
    pub fn call_super(&self, args: &[Value]) -> ModelResult<Value> {
        match self.parent {
            Some(parent) => parent.invoke(self.target, self.name, args),
            None => Err(ProgrammerError::MissingSuper(self.name.to_string()).into()),
        }
    }

    fn wrong_target(&self, expected: &'static str) -> crate::error::ModelError {
        ProgrammerError::WrongTarget {
            name: self.name.to_string(),
            expected,
        }
        .into()
    }
}

/// What a definition binds to a name.
#[derive(Debug, Clone)]
pub enum Member {
    Method(Method),
    Value(Value),
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub slot: ApiSlot,
    pub name: String,
    pub member: Member,
}

/// Members of a model type, keyed by slot and name.
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    members: HashMap<(ApiSlot, String), Member>,
}

impl DefinitionTable {
    /// Registers a definition. A method replacing a method becomes an override of it;
    /// anything else simply replaces the previous member.
    pub fn define(&mut self, definition: Definition) {
        let key = (definition.slot, definition.name);
        let member = match (self.members.remove(&key), definition.member) {
            (Some(Member::Method(previous)), Member::Method(next)) => {
                Member::Method(override_method(Some(previous), next))
            }
            (_, member) => member,
        };
        self.members.insert(key, member);
    }

    pub fn get(&self, slot: ApiSlot, name: &str) -> Option<&Member> {
        self.members.get(&(slot, name.to_string()))
    }

    /// First member found for `name` across `slots`, in order.
    pub fn resolve(&self, slots: &[ApiSlot], name: &str) -> Option<&Member> {
        slots.iter().find_map(|slot| self.get(*slot, name))
    }

    /// Sorted names defined on `slot`.
    pub fn names(&self, slot: ApiSlot) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .members
            .keys()
            .filter(|(member_slot, _)| *member_slot == slot)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
