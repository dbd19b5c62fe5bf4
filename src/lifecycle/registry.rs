use crate::config::{ModelConfig, RegistryConfig};
use crate::error::BuildError;
use crate::framework::builder::{Mixin, MixinChain};
use crate::framework::factory::{assemble, ModelSeed, ModelType};
use crate::transport::Transport;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Where a model type's base config comes from.
///
/// A bare url takes the registry's key, naming and packer defaults. A full config keeps
/// its own. A config without url yields an anonymous type.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Url(String),
    Config(ModelConfig),
}

impl From<&str> for ModelSource {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ModelSource {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<ModelConfig> for ModelSource {
    fn from(config: ModelConfig) -> Self {
        Self::Config(config)
    }
}

/// Named model types, for relations declared by name.
#[derive(Default)]
pub(crate) struct Directory {
    models: Mutex<HashMap<String, ModelType>>,
}

impl Directory {
    pub(crate) fn lookup(&self, name: &str) -> Option<ModelType> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn register(&self, name: &str, model: ModelType) {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), model);
    }

    /// Drops every registered type. Types hold the directory they resolve names
    /// through, so a directory and its types form a cycle until cleared.
    fn clear(&self) {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Entry point: builds model types against one transport and one set of defaults.
///
/// Types registered by name can be targeted by name from relations. Every type built by
/// the registry shares its directory, so names keep resolving after the registry itself
/// is dropped. [`ModelRegistry::clear`] releases the registered types.
///
/// ```rust,ignore
/// let models = ModelRegistry::new(transport);
/// let users = models.define("User", "/users", Vec::new())?;
/// let bikes = models.define("Bike", "/bikes", [Mixin::new("bike", |b| {
///     b.belongs_to("owner", "User").has_many("parts", "Part");
///     Ok(())
/// })])?;
/// ```
pub struct ModelRegistry {
    transport: Arc<dyn Transport>,
    config: RegistryConfig,
    base: MixinChain,
    directory: Arc<Directory>,
}

impl ModelRegistry {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: RegistryConfig::default(),
            base: MixinChain::default(),
            directory: Arc::new(Directory::default()),
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Mixins applied first to every model built afterwards.
    pub fn rebase(&mut self, mixins: impl IntoIterator<Item = Mixin>) -> &mut Self {
        self.base = self.base.appended(mixins);
        self
    }

    /// Assembles a model type from `source` and the base chain followed by `mixins`.
    pub fn model(
        &self,
        source: impl Into<ModelSource>,
        mixins: impl IntoIterator<Item = Mixin>,
    ) -> Result<ModelType, BuildError> {
        let config = match source.into() {
            ModelSource::Url(url) => self.config.seed(ModelConfig::with_url(url), false),
            ModelSource::Config(config) => self.config.seed(config, true),
        };
        let seed = ModelSeed {
            config,
            transport: self.transport.clone(),
            directory: self.directory.clone(),
        };
        assemble(seed, self.base.appended(mixins))
    }

    /// Assembles a model type and registers it under `name`.
    pub fn define(
        &self,
        name: &str,
        source: impl Into<ModelSource>,
        mixins: impl IntoIterator<Item = Mixin>,
    ) -> Result<ModelType, BuildError> {
        let model = self.model(source, mixins)?;
        self.register(name, &model);
        Ok(model)
    }

    pub fn register(&self, name: &str, model: &ModelType) {
        self.directory.register(name, model.clone());
        info!(name, model = %model.label(), "Model registered");
    }

    pub fn lookup(&self, name: &str) -> Option<ModelType> {
        self.directory.lookup(name)
    }

    /// Unregisters every named type. Relations naming them stop resolving.
    pub fn clear(&self) {
        self.directory.clear();
        info!("Model directory cleared");
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field("base", &self.base.names())
            .field("models", &self.directory.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamingStyle;
    use crate::framework::properties::ModelRef;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    #[test]
    fn named_models_resolve_through_the_registry() {
        let models = ModelRegistry::new(MockTransport::new());
        let bikes = models.define("Bike", "/bikes", Vec::new()).unwrap();
        let users = models.model("/users", Vec::new()).unwrap();

        let resolved = users.resolve(&ModelRef::from("Bike")).unwrap();
        assert!(resolved.same_type(&bikes));
        assert!(users.resolve(&ModelRef::from("Part")).is_none());
        assert!(models.lookup("Bike").is_some());
    }

    #[test]
    fn names_resolve_after_the_registry_is_dropped() {
        let models = ModelRegistry::new(MockTransport::new());
        models.define("Bike", "/bikes", Vec::new()).unwrap();
        let users = models.model("/users", Vec::new()).unwrap();
        let directory = models.directory.clone();
        drop(models);

        assert!(users.resolve(&ModelRef::from("Bike")).is_some());
        directory.clear();
        assert!(users.resolve(&ModelRef::from("Bike")).is_none());
    }

    #[test]
    fn clearing_unregisters_named_models() {
        let models = ModelRegistry::new(MockTransport::new());
        models.define("Bike", "/bikes", Vec::new()).unwrap();
        models.clear();
        assert!(models.lookup("Bike").is_none());
    }

    #[test]
    fn base_mixins_run_before_model_mixins() {
        let mut models = ModelRegistry::new(MockTransport::new());
        models.rebase([Mixin::new("base", |b| {
            b.attr_default("active", true);
            Ok(())
        })]);
        let bikes = models
            .model(
                "/bikes",
                [Mixin::new("bike", |b| {
                    b.attr_default("active", false);
                    Ok(())
                })],
            )
            .unwrap();

        assert_eq!(bikes.chain().names(), vec!["base", "bike"]);
        assert_eq!(bikes.build(json!({})).get("active"), Some(json!(false)));
    }

    #[test]
    fn registry_defaults_seed_url_sources_only() {
        let config = RegistryConfig {
            url_prefix: Some("http://api".into()),
            primary_key: "_id".into(),
            naming: NamingStyle::Identity,
            ..RegistryConfig::default()
        };
        let models = ModelRegistry::new(MockTransport::new()).with_config(config);

        let bikes = models.model("/bikes", Vec::new()).unwrap();
        assert_eq!(bikes.url(), Some("http://api/bikes"));
        assert_eq!(bikes.primary_key(), "_id");

        let parts = models.model(ModelConfig::with_url("/parts"), Vec::new()).unwrap();
        assert_eq!(parts.url(), Some("http://api/parts"));
        assert_eq!(parts.primary_key(), "id");
    }
}
