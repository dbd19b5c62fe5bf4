//! # Builder DSL
//!
//! A model type is described by an ordered [`MixinChain`]. Assembly creates a fresh
//! [`BuildState`] and applies every mixin, in order, through a [`Builder`] bound to it.
//! Later mixins see (and may override) everything earlier ones registered.
//!
//! ```rust,ignore
//! let timestamps = Mixin::new("timestamps", |b| {
//!     b.attr_mask("createdAt", Mask::READ)
//!         .on(BEFORE_SAVE, |event| { /* ... */ Ok(()) });
//!     Ok(())
//! });
//! ```
//!
//! ## Extensions
//!
//! Mixins can grow the DSL itself: [`Builder::extend`] registers a named builder method
//! that any later mixin may run with [`Builder::invoke`]. Extensions live in the build
//! state, so a derived type replays them like everything else.
//!
//! ## Failure
//!
//! A mixin returning an error stops assembly. [`apply_mixin_chain`] reports it as
//! [`BuildError::Mixin`] with the mixin's position and name, and no type is produced.

use crate::codec::{NameTransform, Packer, UrlBuilder};
use crate::config::ModelConfig;
use crate::error::{BuildError, ModelError, ModelResult};
use crate::framework::chain::{ApiSlot, Call, Definition, DefinitionTable, Member, Method};
use crate::framework::events::{Hook, HookEvent, HookRegistry};
use crate::framework::properties::{
    Init, Mask, ModelRef, PropertyPatch, PropertyTable, RelationKind, RelationSpec,
};
use crate::runtime::Record;
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// MIXINS
// =============================================================================

pub type MixinFn = dyn Fn(&mut Builder<'_>) -> ModelResult<()> + Send + Sync;

/// A named unit of model behaviour.
#[derive(Clone)]
pub struct Mixin {
    name: Arc<str>,
    body: Arc<MixinFn>,
}

impl Mixin {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Builder<'_>) -> ModelResult<()> + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            body: Arc::new(body),
        }
    }

    /// Builds a mixin from a declarative object:
    ///
    /// ```json
    /// {
    ///   "brand": { "init": "generic", "mask": "CR" },
    ///   "serial": { "map": "serial_no" },
    ///   "$config": { "primaryKey": "serial" }
    /// }
    /// ```
    ///
    /// The declaration is validated here, not when the mixin is applied.
    pub fn declare(name: impl Into<String>, declaration: Value) -> Result<Self, BuildError> {
        let Value::Object(entries) = declaration else {
            return Err(BuildError::Declaration("expected an object".to_string()));
        };

        let mut attributes = Vec::new();
        let mut properties = Map::new();
        for (key, value) in entries {
            if key == "$config" {
                match value {
                    Value::Object(config) => properties = config,
                    _ => return Err(BuildError::Declaration("`$config` must be an object".into())),
                }
                continue;
            }
            let declared: AttrDeclaration = serde_json::from_value(value)
                .map_err(|e| BuildError::Declaration(format!("attribute `{key}`: {e}")))?;
            let patch = declared.into_patch(&key)?;
            attributes.push((key, patch));
        }

        Ok(Self::new(name, move |builder| {
            for (key, value) in &properties {
                builder.set_property(key, value.clone())?;
            }
            for (attr, patch) in &attributes {
                builder.attr(attr, patch.clone());
            }
            Ok(())
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, builder: &mut Builder<'_>) -> ModelResult<()> {
        (self.body)(builder)
    }
}

impl fmt::Debug for Mixin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mixin").field(&self.name).finish()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AttrDeclaration {
    init: Option<Value>,
    mask: Option<String>,
    map: Option<String>,
    decode: Option<String>,
    encode: Option<String>,
}

impl AttrDeclaration {
    fn into_patch(self, attr: &str) -> Result<PropertyPatch, BuildError> {
        let mut patch = PropertyPatch::new();
        if let Some(init) = self.init {
            patch = patch.init(init);
        }
        if let Some(flags) = self.mask {
            let mask = Mask::parse(&flags)
                .ok_or_else(|| BuildError::Declaration(format!("attribute `{attr}`: bad mask `{flags}`")))?;
            patch = patch.mask(mask);
        }
        if let Some(raw) = self.map {
            patch = patch.map(raw);
        }
        if let Some(raw) = self.decode {
            patch = patch.decode_name(raw);
        }
        if let Some(raw) = self.encode {
            patch = patch.encode_name(raw);
        }
        Ok(patch)
    }
}

/// Ordered mixins. Later entries take precedence.
#[derive(Debug, Clone, Default)]
pub struct MixinChain(Vec<Mixin>);

impl MixinChain {
    pub fn new(mixins: impl IntoIterator<Item = Mixin>) -> Self {
        Self(mixins.into_iter().collect())
    }

    /// A copy of this chain followed by `extra`.
    pub fn appended(&self, extra: impl IntoIterator<Item = Mixin>) -> Self {
        let mut mixins = self.0.clone();
        mixins.extend(extra);
        Self(mixins)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mixin> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(Mixin::name).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// BUILD STATE
// =============================================================================

pub type ExtensionFn = dyn Fn(&mut Builder<'_>, &[Value]) -> ModelResult<()> + Send + Sync;

/// Collaborators overridden by mixins. Unset ones are derived from config on assembly.
#[derive(Clone, Default)]
pub(crate) struct ServiceOverrides {
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) url_builder: Option<Arc<dyn UrlBuilder>>,
    pub(crate) packer: Option<Arc<dyn Packer>>,
    pub(crate) naming: Option<Arc<dyn NameTransform>>,
}

/// Everything a mixin chain accumulates before assembly freezes it.
pub struct BuildState {
    pub(crate) config: ModelConfig,
    pub(crate) properties: PropertyTable,
    pub(crate) definitions: DefinitionTable,
    pub(crate) hooks: HookRegistry,
    pub(crate) extensions: HashMap<String, Arc<ExtensionFn>>,
    pub(crate) services: ServiceOverrides,
    pub(crate) identity_map: bool,
    pub(crate) bulk_populate: Option<String>,
}

impl BuildState {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            properties: PropertyTable::default(),
            definitions: DefinitionTable::default(),
            hooks: HookRegistry::default(),
            extensions: HashMap::new(),
            services: ServiceOverrides::default(),
            identity_map: false,
            bulk_populate: None,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn definitions(&self) -> &DefinitionTable {
        &self.definitions
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }
}

/// Applies `chain` to `state` in order.
pub fn apply_mixin_chain(state: &mut BuildState, chain: &MixinChain) -> Result<(), BuildError> {
    for (index, mixin) in chain.iter().enumerate() {
        let mut builder = Builder { state: &mut *state };
        if let Err(source) = mixin.apply(&mut builder) {
            warn!(index, mixin = mixin.name(), error = %source, "Mixin failed");
            return Err(BuildError::Mixin {
                index,
                name: mixin.name().to_string(),
                source: Box::new(source),
            });
        }
        debug!(index, mixin = mixin.name(), "Mixin applied");
    }
    Ok(())
}

// =============================================================================
// BUILDER
// =============================================================================

/// The DSL handed to mixins.
pub struct Builder<'a> {
    state: &'a mut BuildState,
}

impl<'a> Builder<'a> {
    pub fn new(state: &'a mut BuildState) -> Self {
        Self { state }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.state.config
    }

    pub fn state(&self) -> &BuildState {
        self.state
    }

    // --- Definitions ---

    pub fn define(&mut self, slot: ApiSlot, name: &str, member: Member) -> &mut Self {
        self.state.definitions.define(Definition {
            slot,
            name: name.to_string(),
            member,
        });
        self
    }

    pub fn method<F>(&mut self, slot: ApiSlot, name: &str, body: F) -> &mut Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        self.define(slot, name, Member::Method(Method::new(body)))
    }

    pub fn record_method<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        self.method(ApiSlot::Record, name, body)
    }

    pub fn collection_method<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        self.method(ApiSlot::Collection, name, body)
    }

    pub fn model_method<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        self.method(ApiSlot::Model, name, body)
    }

    pub fn scope_method<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(&Call<'_>, &[Value]) -> ModelResult<Value> + Send + Sync + 'static,
    {
        self.method(ApiSlot::Scope, name, body)
    }

    pub fn constant(&mut self, slot: ApiSlot, name: &str, value: Value) -> &mut Self {
        self.define(slot, name, Member::Value(value))
    }

    // --- Properties ---

    pub fn attr(&mut self, name: &str, patch: PropertyPatch) -> &mut Self {
        self.state.properties.define(name, patch);
        self
    }

    pub fn attr_default(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.attr(name, PropertyPatch::new().init(value))
    }

    pub fn attr_default_with<F>(&mut self, name: &str, produce: F) -> &mut Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let patch = PropertyPatch {
            init: Some(Init::With(Arc::new(produce))),
            ..PropertyPatch::default()
        };
        self.attr(name, patch)
    }

    pub fn attr_mask(&mut self, name: &str, mask: Mask) -> &mut Self {
        self.attr(name, PropertyPatch::new().mask(mask))
    }

    /// Reads and writes `name` under `raw`.
    pub fn attr_map(&mut self, name: &str, raw: &str) -> &mut Self {
        self.attr(name, PropertyPatch::new().map(raw))
    }

    pub fn attr_decode_name(&mut self, name: &str, raw: &str) -> &mut Self {
        self.attr(name, PropertyPatch::new().decode_name(raw))
    }

    pub fn attr_encode_name(&mut self, name: &str, raw: &str) -> &mut Self {
        self.attr(name, PropertyPatch::new().encode_name(raw))
    }

    pub fn attr_decoder<F>(&mut self, name: &str, filter: F) -> &mut Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let patch = PropertyPatch {
            decoder: Some(Arc::new(filter)),
            ..PropertyPatch::default()
        };
        self.attr(name, patch)
    }

    pub fn attr_encoder<F>(&mut self, name: &str, filter: F) -> &mut Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let patch = PropertyPatch {
            encoder: Some(Arc::new(filter)),
            ..PropertyPatch::default()
        };
        self.attr(name, patch)
    }

    /// A read-only attribute derived from the record. Never decoded nor encoded.
    pub fn attr_computed<F>(&mut self, name: &str, compute: F) -> &mut Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let patch = PropertyPatch {
            computed: Some(Arc::new(compute)),
            ..PropertyPatch::default()
        };
        self.attr(name, patch)
    }

    // --- Relations ---

    pub fn relation(&mut self, name: &str, spec: RelationSpec) -> &mut Self {
        self.attr(name, PropertyPatch::new().relation(spec))
    }

    pub fn has_many(&mut self, name: &str, target: impl Into<ModelRef>) -> &mut Self {
        self.relation(name, RelationSpec::new(RelationKind::HasMany, target))
    }

    pub fn has_one(&mut self, name: &str, target: impl Into<ModelRef>) -> &mut Self {
        self.relation(name, RelationSpec::new(RelationKind::HasOne, target))
    }

    pub fn belongs_to(&mut self, name: &str, target: impl Into<ModelRef>) -> &mut Self {
        self.relation(name, RelationSpec::new(RelationKind::BelongsTo, target))
    }

    pub fn belongs_to_many(&mut self, name: &str, target: impl Into<ModelRef>) -> &mut Self {
        self.relation(name, RelationSpec::new(RelationKind::BelongsToMany, target))
    }

    // --- Hooks ---

    pub fn on<F>(&mut self, event: &str, callback: F) -> &mut Self
    where
        F: Fn(&mut HookEvent) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.state.hooks.on(event, Hook::new(callback));
        self
    }

    // --- Extensions ---

    /// Registers a builder method callable by later mixins. Redefining a name replaces it.
    pub fn extend<F>(&mut self, name: &str, extension: F) -> &mut Self
    where
        F: Fn(&mut Builder<'_>, &[Value]) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.state.extensions.insert(name.to_string(), Arc::new(extension));
        self
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.state.extensions.contains_key(name)
    }

    pub fn invoke(&mut self, name: &str, args: &[Value]) -> ModelResult<()> {
        let extension = self
            .state
            .extensions
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownExtension(name.to_string()))?;
        extension(self, args)
    }

    /// Applies another mixin in place.
    pub fn mixin(&mut self, mixin: &Mixin) -> ModelResult<()> {
        mixin.apply(self)
    }

    // --- Model properties & collaborators ---

    /// Sets a model property: `url`, `primaryKey`, `name`, `plural`, or any extra key.
    pub fn set_property(&mut self, key: &str, value: Value) -> ModelResult<()> {
        let config = &mut self.state.config;
        match key {
            "url" => config.url = optional_string(key, value)?,
            "name" => config.name = optional_string(key, value)?,
            "plural" => config.plural = optional_string(key, value)?,
            "primaryKey" => {
                config.primary_key = optional_string(key, value)?.ok_or_else(|| invalid(key, "cannot be null"))?
            }
            _ => {
                config.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.state.services.transport = Some(transport);
        self
    }

    pub fn set_url_builder(&mut self, url_builder: Arc<dyn UrlBuilder>) -> &mut Self {
        self.state.services.url_builder = Some(url_builder);
        self
    }

    pub fn set_packer(&mut self, packer: Arc<dyn Packer>) -> &mut Self {
        self.state.services.packer = Some(packer);
        self
    }

    pub fn set_naming(&mut self, naming: Arc<dyn NameTransform>) -> &mut Self {
        self.state.services.naming = Some(naming);
        self
    }

    /// Share one live instance per primary key.
    pub fn use_identity_map(&mut self) -> &mut Self {
        self.state.identity_map = true;
        self
    }

    /// Resolve key-only references with one `GET <url>?<param>=k1,k2` request.
    pub fn enable_bulk_populate(&mut self, param: &str) -> &mut Self {
        self.state.bulk_populate = Some(param.to_string());
        self
    }
}

fn optional_string(key: &str, value: Value) -> ModelResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(invalid(key, &format!("expected a string, got {other}"))),
    }
}

fn invalid(key: &str, reason: &str) -> ModelError {
    BuildError::InvalidProperty {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
