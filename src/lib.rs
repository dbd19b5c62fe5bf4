#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # restbind
//!
//! > **Client-side model binding for REST resources.**
//!
//! This crate maps HTTP resources to shared record and collection handles with lifecycle
//! hooks, relations and serialization rules. Model types are not written as structs:
//! they are assembled at runtime from an ordered chain of mixins, with deterministic
//! override resolution and call-super semantics.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why mixins?
//!
//! Behavior that many resources share (timestamps, soft delete, paging, auth headers)
//! is written once as a [`Mixin`] and composed per type:
//!
//! ```rust,ignore
//! let models = ModelRegistry::new(transport);
//! let bikes = models.define("Bike", "/bikes", [timestamps(), Mixin::new("bike", |b| {
//!     b.attr_mask("serial", Mask::READ)
//!         .belongs_to("owner", "User")
//!         .has_many("parts", "Part")
//!         .record_method("describe", |call, _| {
//!             let base = call.call_super(&[])?;
//!             Ok(json!(format!("{} bike", base.as_str().unwrap_or_default())))
//!         });
//!     Ok(())
//! })])?;
//! ```
//!
//! Later mixins win. A method that overrides another keeps a link to it, so every layer
//! of an N-deep chain can reach the one below it exactly once.
//!
//! ### Why shared handles?
//!
//! Records behave like live objects: a collection, a relation and the identity map can
//! all hold the same record and observe the same state. Handles are `Arc` + `Mutex` with
//! short critical sections; no lock is held while user code (hooks, methods, computed
//! properties) runs.
//!
//! ## 🚀 Core Concepts
//!
//! ### Actions and completions
//! `fetch`, `save` and `destroy` run their before-hooks synchronously and return a
//! [`Completion`]: a shared future that settles exactly once. Starting a new action on
//! the same record makes the previous one stale; its result is discarded but its
//! completion still settles.
//!
//! ### Mocking: Testing without a server
//! [`MockTransport`](transport::mock::MockTransport) answers requests from fluent
//! expectations. [`MemoryServer`](transport::memory::MemoryServer) is an in-memory REST
//! actor for end-to-end tests.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! Override chain, property table, builder DSL, model factory and event bus.
//!
//! ### 2. The Runtime ([`runtime`])
//! Records, collections, relations, record lists and the identity map.
//!
//! ### 3. The Wire ([`transport`], [`codec`])
//! The async [`Transport`] trait with mock, channel and in-memory implementations;
//! naming transforms, packers and url builders.
//!
//! ### 4. The Setup ([`lifecycle`], [`config`])
//! [`ModelRegistry`], serde-backed configuration and tracing setup.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo against the in-memory server
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod framework;
pub mod lifecycle;
pub mod runtime;
pub mod transport;

pub use config::{ModelConfig, RegistryConfig};
pub use error::{BuildError, ModelError, ModelResult, ProgrammerError, RequestError};
pub use framework::{
    ActionPhase, ApiSlot, Builder, Completion, Key, Mask, Mixin, ModelRef, ModelType, PropertyPatch,
    RelationKind, RelationSpec,
};
pub use lifecycle::{setup_tracing, ModelRegistry};
pub use runtime::{Collection, Record, RecordList, RelationValue, Target};
pub use transport::{HttpMethod, Params, Request, Response, Transport};
