//! # Model Factory
//!
//! [`assemble`] turns a seed (config, transport, registry directory) and a mixin chain
//! into an immutable [`ModelType`]. The chain is applied to a fresh build state, then
//! collaborators the chain did not override are derived from config, and the relation
//! resolution strategy is fixed.
//!
//! A `ModelType` is a cheap handle: clones share one definition. It carries the static
//! API (`new_record`, `build`, `find`, `create`, `collection`, `search`, ...) and is the
//! type every record and collection points back to.
//!
//! Derivation ([`ModelType::mix`]) re-assembles `chain + extra` from the same seed. The
//! base type and its instances are untouched.

use crate::codec::{DefaultUrlBuilder, NameTransform, Packer, UrlBuilder};
use crate::config::ModelConfig;
use crate::error::{BuildError, ModelResult, ProgrammerError, RequestError};
use crate::framework::builder::{apply_mixin_chain, BuildState, Mixin, MixinChain};
use crate::framework::chain::{ApiSlot, DefinitionTable, Member};
use crate::framework::events::{run_hooks, Completion, HookEvent, HookRegistry};
use crate::framework::properties::{Mask, ModelRef, PropertyDescriptor, PropertyTable, RelationSpec};
use crate::lifecycle::registry::Directory;
use crate::runtime::collection::CollectionScope;
use crate::runtime::identity::IdentityMap;
use crate::runtime::record::Scope;
use crate::runtime::relations::PendingRefs;
use crate::runtime::{Collection, Dummy, Record, RecordList, Target};
use crate::transport::{HttpMethod, Params, Request, Response, Transport};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

// =============================================================================
// KEYS & STRATEGY
// =============================================================================

/// Primary key of a record or raw payload.
///
/// `Absent` is the explicit no-key state. A missing field and an explicit `null` are
/// both absent; any other value is a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Absent,
    Present(Value),
}

impl Key {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(value) => Self::Present(value.clone()),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// The key as a url segment.
    pub fn to_segment(&self) -> Option<String> {
        self.value().map(key_segment)
    }
}

/// Strings render bare, everything else as json.
pub fn key_segment(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// How key-only relation references are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// References stay unresolved until fetched.
    DefaultResolve,
    /// The target type loads all referenced keys with one request.
    BulkPopulate { param: String },
}

// =============================================================================
// ASSEMBLY
// =============================================================================

/// Inputs of assembly that do not come from mixins.
#[derive(Clone)]
pub(crate) struct ModelSeed {
    pub(crate) config: ModelConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) directory: Arc<Directory>,
}

struct ModelInner {
    seed: ModelSeed,
    config: ModelConfig,
    chain: MixinChain,
    properties: PropertyTable,
    definitions: DefinitionTable,
    hooks: HookRegistry,
    transport: Arc<dyn Transport>,
    url_builder: Arc<dyn UrlBuilder>,
    packer: Arc<dyn Packer>,
    naming: Arc<dyn NameTransform>,
    identity: Option<IdentityMap>,
    strategy: ResolveStrategy,
}

/// Applies `chain` from scratch and freezes the result.
pub(crate) fn assemble(seed: ModelSeed, chain: MixinChain) -> Result<ModelType, BuildError> {
    let mut state = BuildState::new(seed.config.clone());
    apply_mixin_chain(&mut state, &chain)?;

    let BuildState {
        config,
        properties,
        definitions,
        hooks,
        services,
        identity_map,
        bulk_populate,
        ..
    } = state;

    let naming: Arc<dyn NameTransform> = match services.naming {
        Some(naming) => naming,
        None => config.naming.build(),
    };
    let packer: Arc<dyn Packer> = match services.packer {
        Some(packer) => packer,
        None => config.packer.build(),
    };
    let url_builder: Arc<dyn UrlBuilder> = match services.url_builder {
        Some(url_builder) => url_builder,
        None => Arc::new(DefaultUrlBuilder),
    };
    let transport = services.transport.unwrap_or_else(|| seed.transport.clone());
    let strategy = match bulk_populate {
        Some(param) => ResolveStrategy::BulkPopulate { param },
        None => ResolveStrategy::DefaultResolve,
    };

    let model = ModelType {
        inner: Arc::new(ModelInner {
            seed,
            config,
            chain,
            properties,
            definitions,
            hooks,
            transport,
            url_builder,
            packer,
            naming,
            identity: identity_map.then(IdentityMap::default),
            strategy,
        }),
    };
    info!(
        model = %model.label(),
        mixins = model.chain().len(),
        properties = model.properties().len(),
        "Model assembled"
    );
    Ok(model)
}

// =============================================================================
// MODEL TYPE
// =============================================================================

#[derive(Clone)]
pub struct ModelType {
    inner: Arc<ModelInner>,
}

impl ModelType {
    // --- Introspection ---

    pub fn label(&self) -> String {
        self.singular_name()
            .or_else(|| self.url().map(str::to_string))
            .unwrap_or_else(|| "anonymous model".to_string())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    pub fn url(&self) -> Option<&str> {
        self.inner.config.url.as_deref()
    }

    /// Anonymous types have no url: they decode, encode and nest, but never request.
    pub fn is_anonymous(&self) -> bool {
        self.url().is_none()
    }

    pub fn primary_key(&self) -> &str {
        &self.inner.config.primary_key
    }

    pub fn singular_name(&self) -> Option<String> {
        self.inner.config.singular_name()
    }

    pub fn plural_name(&self) -> Option<String> {
        self.inner.config.plural_name()
    }

    /// Extra model property set through config or `set_property`.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.inner.config.extra.get(key)
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.inner.properties
    }

    pub fn definitions(&self) -> &DefinitionTable {
        &self.inner.definitions
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn chain(&self) -> &MixinChain {
        &self.inner.chain
    }

    pub fn strategy(&self) -> &ResolveStrategy {
        &self.inner.strategy
    }

    pub fn identity_map(&self) -> Option<&IdentityMap> {
        self.inner.identity.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn url_builder(&self) -> &dyn UrlBuilder {
        self.inner.url_builder.as_ref()
    }

    pub fn packer(&self) -> &dyn Packer {
        self.inner.packer.as_ref()
    }

    pub fn naming(&self) -> &dyn NameTransform {
        self.inner.naming.as_ref()
    }

    pub fn same_type(&self, other: &ModelType) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Names & keys ---

    /// Raw key a descriptor is read from.
    pub fn decoded_from(&self, descriptor: &PropertyDescriptor) -> String {
        descriptor
            .decode_name
            .clone()
            .unwrap_or_else(|| self.naming().encode_name(&descriptor.name))
    }

    /// Raw key a descriptor is written to.
    pub fn encoded_as(&self, descriptor: &PropertyDescriptor) -> String {
        descriptor
            .encode_name
            .clone()
            .unwrap_or_else(|| self.naming().encode_name(&descriptor.name))
    }

    /// Raw key of any attribute, declared or not.
    pub fn raw_name_of(&self, attr: &str) -> String {
        match self.properties().lookup(attr) {
            Some(descriptor) => self.decoded_from(descriptor),
            None => self.naming().encode_name(attr),
        }
    }

    /// Reads the primary key from raw data.
    pub fn infer_key(&self, raw: &Value) -> Key {
        let field = self.raw_name_of(self.primary_key());
        Key::from_value(raw.get(field.as_str()))
    }

    // --- Static api ---

    /// A record known only by its key. With an identity map, the live instance for the
    /// key is returned instead.
    pub fn new_record(&self, pk: impl Into<Value>) -> Record {
        let pk = pk.into();
        if let Some(existing) = self.identity_map().and_then(|map| map.get(&pk)) {
            return existing;
        }
        let record = Record::create_in(self, Scope::Model);
        record.set(self.primary_key(), pk.clone());
        if let Some(map) = self.identity_map() {
            map.insert(&pk, &record);
        }
        record
    }

    /// A new record with attributes given by attribute name.
    pub fn build(&self, attrs: Value) -> Record {
        let record = Record::create_in(self, Scope::Model);
        record.assign(&attrs);
        record
    }

    /// A record decoded from raw server data.
    pub fn build_raw(&self, raw: &Value) -> ModelResult<Record> {
        self.build_raw_in(raw, Scope::Model)
    }

    pub(crate) fn build_raw_in(&self, raw: &Value, scope: Scope) -> ModelResult<Record> {
        let record = self.shared_or_new(raw, scope);
        record.decode(raw)?;
        Ok(record)
    }

    /// The identity-mapped instance for `raw`'s key, or a fresh record in `scope`.
    pub(crate) fn shared_or_new(&self, raw: &Value, scope: Scope) -> Record {
        let shared = match (self.identity_map(), self.infer_key(raw)) {
            (Some(map), Key::Present(key)) => map.get(&key),
            _ => None,
        };
        shared.unwrap_or_else(|| Record::create_in(self, scope))
    }

    pub fn find(&self, pk: impl Into<Value>, params: Params) -> ModelResult<Record> {
        let record = self.new_record(pk);
        record.fetch_with(params)?;
        Ok(record)
    }

    pub fn create(&self, attrs: Value) -> ModelResult<Record> {
        let record = self.build(attrs);
        record.save()?;
        Ok(record)
    }

    pub fn collection(&self, params: Params) -> Collection {
        Collection::create_in(self, CollectionScope::Model, params)
    }

    pub fn search(&self, params: Params) -> ModelResult<Collection> {
        let collection = self.collection(params);
        collection.fetch()?;
        Ok(collection)
    }

    /// A singleton record bound to a fixed url.
    pub fn single(&self, url: impl Into<String>) -> Record {
        Record::create_in(self, Scope::Fixed(url.into()))
    }

    pub fn list(&self, records: impl IntoIterator<Item = Record>) -> RecordList {
        RecordList::new(self, records)
    }

    pub fn dummy(&self, as_collection: bool) -> Dummy {
        Dummy::new(self, as_collection)
    }

    /// Calls a model-level definition (Model slot, then Scope slot).
    pub fn call(&self, name: &str, args: &[Value]) -> ModelResult<Value> {
        self.invoke(
            &[ApiSlot::Model, ApiSlot::Scope],
            &Target::Model(self.clone()),
            name,
            args,
        )
    }

    pub(crate) fn invoke(
        &self,
        slots: &[ApiSlot],
        target: &Target,
        name: &str,
        args: &[Value],
    ) -> ModelResult<Value> {
        match self.definitions().resolve(slots, name) {
            Some(Member::Method(method)) => method.invoke(target, name, args),
            Some(Member::Value(value)) => Ok(value.clone()),
            None => Err(ProgrammerError::UndefinedMethod {
                slot: slots.first().copied().unwrap_or(ApiSlot::Model),
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Fires type-level hooks only.
    pub fn dispatch(&self, event: &str, data: Value) -> ModelResult<()> {
        let mut event = HookEvent::new(event, Target::Model(self.clone())).with_data(data);
        run_hooks(self.hooks().listeners(event.name()), &mut event)
    }

    /// Derives a new type from this type's chain followed by `mixins`.
    pub fn mix(&self, mixins: impl IntoIterator<Item = Mixin>) -> Result<ModelType, BuildError> {
        assemble(self.inner.seed.clone(), self.inner.chain.appended(mixins))
    }

    pub fn resolve(&self, target: &ModelRef) -> Option<ModelType> {
        match target {
            ModelRef::Type(model) => Some(model.clone()),
            ModelRef::Named(name) => self.inner.seed.directory.lookup(name),
        }
    }

    pub(crate) fn relation_target(&self, relation: &str, spec: &RelationSpec) -> ModelResult<ModelType> {
        self.resolve(&spec.target).ok_or_else(|| {
            ProgrammerError::UndefinedRelationTarget {
                relation: relation.to_string(),
                target: spec.target.label(),
            }
            .into()
        })
    }

    // --- Bulk population ---

    /// Loads every keyed record in `records` with one request and decodes the results
    /// into the matching instances. Needs [`ResolveStrategy::BulkPopulate`].
    pub fn populate(&self, records: &[Record]) -> ModelResult<Completion> {
        let ResolveStrategy::BulkPopulate { param } = self.strategy() else {
            return Err(ProgrammerError::MissingCapability {
                model: self.label(),
                capability: "bulk populate",
            }
            .into());
        };
        let url = self
            .url()
            .ok_or_else(|| ProgrammerError::Unroutable(self.label()))?
            .to_string();
        let records: Vec<Record> = records
            .iter()
            .filter(|record| record.pk().is_present())
            .cloned()
            .collect();
        if records.is_empty() {
            return Ok(Completion::settled(Ok(())));
        }
        let runtime = Handle::try_current().map_err(|_| ProgrammerError::NoRuntime)?;

        let keys: Vec<String> = records.iter().filter_map(|record| record.pk().to_segment()).collect();
        let request = Request::new(HttpMethod::Get, url).with_param(param.clone(), keys.join(","));
        let (settle, completion) = Completion::pending();
        let generations: Vec<u64> = records
            .iter()
            .map(|record| record.adopt_action(completion.clone()))
            .collect();
        let model = self.clone();
        debug!(model = %model.label(), keys = keys.len(), "Populating");
        runtime.spawn(async move {
            let outcome = match model.transport().send(request).await {
                Ok(response) => model.absorb_population(&records, &generations, response),
                Err(error) => Err(error),
            };
            if let Err(error) = &outcome {
                warn!(model = %model.label(), error = %error, "Populate failed");
            }
            for (record, generation) in records.iter().zip(&generations) {
                record.finish_action(*generation, &outcome);
            }
            settle.settle(outcome);
        });
        Ok(completion)
    }

    fn absorb_population(
        &self,
        records: &[Record],
        generations: &[u64],
        response: Response,
    ) -> Result<(), RequestError> {
        let unpacked = self.packer().unpack(self, true, response.data)?;
        let Value::Array(items) = unpacked.data else {
            return Err(RequestError::Malformed("expected an array of records".to_string()));
        };
        let mut pending = PendingRefs::default();
        let mut staged = Vec::new();
        for item in &items {
            let key = self.infer_key(item);
            let matching = records
                .iter()
                .zip(generations)
                .filter(|(record, _)| record.pk() == key);
            for (record, generation) in matching {
                staged.push((record.stage(item, Mask::READ, &mut pending)?, *generation));
            }
        }
        for (record, generation) in staged {
            record.commit(Some(generation));
        }
        pending.flush();
        Ok(())
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("label", &self.label())
            .field("url", &self.url())
            .field("mixins", &self.chain().names())
            .field("properties", &self.properties().names())
            .finish()
    }
}
