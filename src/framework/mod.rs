//! Model-definition engine.
//!
//! A model type is assembled from an ordered chain of mixins. Each mixin receives a
//! [`Builder`] and declares properties, relations, methods and hooks; the result is
//! frozen into a [`ModelType`].
//!
//! # Main Components
//!
//! - [`chain`] - override chain with call-super semantics
//! - [`properties`] - property descriptors, masks and relations
//! - [`builder`] - the mixin DSL and build state
//! - [`factory`] - assembly and the static model api
//! - [`events`] - hook registry, action phases and completion futures

pub mod builder;
pub mod chain;
pub mod events;
pub mod factory;
pub mod properties;

pub use builder::{Builder, Mixin, MixinChain};
pub use chain::{ApiSlot, Call, Member, Method};
pub use events::{ActionPhase, Completion, HookEvent, Outcome};
pub use factory::{Key, ModelType, ResolveStrategy};
pub use properties::{Mask, ModelRef, PropertyPatch, RelationKind, RelationSpec};
