//! # Configuration
//!
//! Serde-backed settings for the registry and for individual model types.
//!
//! ```json
//! {
//!   "url": "/bikes",
//!   "primaryKey": "id",
//!   "naming": "snake_case",
//!   "packer": { "kind": "envelope", "metaKey": "meta" },
//!   "pageSize": 20
//! }
//! ```
//!
//! Unknown keys (`pageSize` above) are kept as extra properties and can be read back
//! with `ModelType::property`.

use crate::codec::{EnvelopePacker, IdentityNaming, NameTransform, Packer, RawPacker, SnakeCaseNaming};
use crate::codec::naming::{pluralize, singularize};
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    #[default]
    SnakeCase,
    Identity,
}

impl NamingStyle {
    pub fn build(self) -> Arc<dyn NameTransform> {
        match self {
            Self::SnakeCase => Arc::new(SnakeCaseNaming),
            Self::Identity => Arc::new(IdentityNaming),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackerStyle {
    #[default]
    Raw,
    Envelope {
        #[serde(default, rename = "metaKey")]
        meta_key: Option<String>,
    },
}

impl PackerStyle {
    pub fn build(&self) -> Arc<dyn Packer> {
        match self {
            Self::Raw => Arc::new(RawPacker),
            Self::Envelope { meta_key } => Arc::new(EnvelopePacker::new(meta_key.clone())),
        }
    }
}

/// Settings of one model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    pub url: Option<String>,
    pub primary_key: String,
    pub name: Option<String>,
    pub plural: Option<String>,
    pub naming: NamingStyle,
    pub packer: PackerStyle,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: None,
            primary_key: "id".to_string(),
            name: None,
            plural: None,
            naming: NamingStyle::default(),
            packer: PackerStyle::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl ModelConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, BuildError> {
        serde_json::from_str(json).map_err(|e| BuildError::Declaration(e.to_string()))
    }

    /// Configured name, or the singular of the url's last segment.
    pub fn singular_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.last_segment().map(|segment| singularize(&segment)))
    }

    pub fn plural_name(&self) -> Option<String> {
        self.plural
            .clone()
            .or_else(|| self.name.as_deref().map(pluralize))
            .or_else(|| self.last_segment())
    }

    fn last_segment(&self) -> Option<String> {
        let url = self.url.as_deref()?.trim_end_matches('/');
        url.rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

/// Defaults applied to every model built by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Prepended to model urls starting with `/`.
    pub url_prefix: Option<String>,
    pub primary_key: String,
    pub naming: NamingStyle,
    pub packer: PackerStyle,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url_prefix: None,
            primary_key: "id".to_string(),
            naming: NamingStyle::default(),
            packer: PackerStyle::default(),
        }
    }
}

impl RegistryConfig {
    pub fn from_json_str(json: &str) -> Result<Self, BuildError> {
        serde_json::from_str(json).map_err(|e| BuildError::Declaration(e.to_string()))
    }

    pub(crate) fn seed(&self, mut config: ModelConfig, explicit: bool) -> ModelConfig {
        if let (Some(prefix), Some(url)) = (&self.url_prefix, &config.url) {
            if url.starts_with('/') {
                config.url = Some(format!("{}{}", prefix.trim_end_matches('/'), url));
            }
        }
        if !explicit {
            config.primary_key = self.primary_key.clone();
            config.naming = self.naming;
            config.packer = self.packer.clone();
        }
        config
    }
}
