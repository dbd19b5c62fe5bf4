//! # Property Descriptor Table
//!
//! Per-model registry of attribute metadata: default value, serialization mask,
//! relation spec, raw-name overrides, value filters and computed getters.
//!
//! Re-defining a property replaces each field the patch provides. There is no deep
//! merge, and the property keeps the position of its first definition, so iteration
//! order (and therefore decode/encode order) is the order properties were introduced.

use crate::framework::factory::ModelType;
use crate::runtime::Record;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

// =============================================================================
// MASKS
// =============================================================================

/// Bit set of serialization operations a property takes part in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mask(u8);

impl Mask {
    pub const NONE: Mask = Mask(0);
    pub const CREATE: Mask = Mask(1);
    pub const UPDATE: Mask = Mask(2);
    pub const READ: Mask = Mask(4);
    pub const SYSTEM: Mask = Mask(8);
    pub const WRITE: Mask = Mask(1 | 2);
    pub const DEFAULT: Mask = Mask(1 | 2 | 4);
    pub const ALL: Mask = Mask(1 | 2 | 4 | 8);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// True when this property takes part in `op`.
    pub const fn allows(self, op: Mask) -> bool {
        self.0 & op.0 != 0
    }

    pub const fn without(self, other: Mask) -> Self {
        Self(self.0 & !other.0)
    }

    /// Parses letter flags: `C`reate, `U`pdate, `R`ead, `S`ystem. Case-insensitive.
    pub fn parse(flags: &str) -> Option<Mask> {
        flags.chars().try_fold(Mask::NONE, |mask, flag| {
            let bit = match flag.to_ascii_uppercase() {
                'C' => Mask::CREATE,
                'U' => Mask::UPDATE,
                'R' => Mask::READ,
                'S' => Mask::SYSTEM,
                _ => return None,
            };
            Some(mask | bit)
        })
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Mask) -> Mask {
        Mask(self.0 & rhs.0)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: String = [
            (Mask::CREATE, 'C'),
            (Mask::UPDATE, 'U'),
            (Mask::READ, 'R'),
            (Mask::SYSTEM, 'S'),
        ]
        .iter()
        .filter(|(bit, _)| self.allows(*bit))
        .map(|(_, letter)| *letter)
        .collect();
        write!(f, "Mask({letters})")
    }
}

// =============================================================================
// DESCRIPTOR PARTS
// =============================================================================

/// Initial value of an attribute on construction.
#[derive(Clone)]
pub enum Init {
    Value(Value),
    With(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Init {
    pub fn produce(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::With(produce) => produce(),
        }
    }
}

pub type Filter = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type Computed = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasMany,
    HasOne,
    BelongsTo,
    BelongsToMany,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HasMany => "has-many",
            Self::HasOne => "has-one",
            Self::BelongsTo => "belongs-to",
            Self::BelongsToMany => "belongs-to-many",
        };
        f.write_str(name)
    }
}

/// Reference to a relation target, either direct or by registry name.
///
/// Named references resolve lazily, so models may refer to each other (or themselves)
/// before the target is defined.
#[derive(Clone)]
pub enum ModelRef {
    Type(ModelType),
    Named(String),
}

impl ModelRef {
    pub fn label(&self) -> String {
        match self {
            Self::Type(model) => model.label(),
            Self::Named(name) => name.clone(),
        }
    }
}

impl From<ModelType> for ModelRef {
    fn from(model: ModelType) -> Self {
        Self::Type(model)
    }
}

impl From<&ModelType> for ModelRef {
    fn from(model: &ModelType) -> Self {
        Self::Type(model.clone())
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

#[derive(Clone)]
pub struct RelationSpec {
    pub kind: RelationKind,
    pub target: ModelRef,
    /// Url segment of nested resources. Defaults to the attribute name.
    pub path: Option<String>,
    /// Raw name of the foreign key (belongs-to) or key list (belongs-to-many).
    pub key: Option<String>,
    /// Encode the related data as a nested structure.
    pub inline: bool,
}

impl RelationSpec {
    pub fn new(kind: RelationKind, target: impl Into<ModelRef>) -> Self {
        Self {
            kind,
            target: target.into(),
            path: None,
            key: None,
            inline: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

// =============================================================================
// DESCRIPTOR & TABLE
// =============================================================================

#[derive(Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub init: Option<Init>,
    pub mask: Mask,
    pub relation: Option<RelationSpec>,
    /// Raw key read by decode, when it differs from the naming transform.
    pub decode_name: Option<String>,
    /// Raw key written by encode, when it differs from the naming transform.
    pub encode_name: Option<String>,
    pub decoder: Option<Filter>,
    pub encoder: Option<Filter>,
    pub computed: Option<Computed>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
            mask: Mask::DEFAULT,
            relation: None,
            decode_name: None,
            encode_name: None,
            decoder: None,
            encoder: None,
            computed: None,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("mask", &self.mask)
            .field("relation", &self.relation.as_ref().map(|r| r.kind))
            .field("decode_name", &self.decode_name)
            .field("encode_name", &self.encode_name)
            .field("computed", &self.is_computed())
            .finish()
    }
}

/// Partial descriptor. Every `Some` field replaces the current one.
#[derive(Clone, Default)]
pub struct PropertyPatch {
    pub init: Option<Init>,
    pub mask: Option<Mask>,
    pub relation: Option<RelationSpec>,
    pub decode_name: Option<String>,
    pub encode_name: Option<String>,
    pub decoder: Option<Filter>,
    pub encoder: Option<Filter>,
    pub computed: Option<Computed>,
}

impl PropertyPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(mut self, value: impl Into<Value>) -> Self {
        self.init = Some(Init::Value(value.into()));
        self
    }

    pub fn mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn relation(mut self, relation: RelationSpec) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Reads and writes the attribute under `raw` instead of the transformed name.
    pub fn map(mut self, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        self.decode_name = Some(raw.clone());
        self.encode_name = Some(raw);
        self
    }

    pub fn decode_name(mut self, raw: impl Into<String>) -> Self {
        self.decode_name = Some(raw.into());
        self
    }

    pub fn encode_name(mut self, raw: impl Into<String>) -> Self {
        self.encode_name = Some(raw.into());
        self
    }

    pub fn apply(self, descriptor: &mut PropertyDescriptor) {
        if let Some(init) = self.init {
            descriptor.init = Some(init);
        }
        if let Some(mask) = self.mask {
            descriptor.mask = mask;
        }
        if let Some(relation) = self.relation {
            descriptor.relation = Some(relation);
        }
        if let Some(raw) = self.decode_name {
            descriptor.decode_name = Some(raw);
        }
        if let Some(raw) = self.encode_name {
            descriptor.encode_name = Some(raw);
        }
        if let Some(decoder) = self.decoder {
            descriptor.decoder = Some(decoder);
        }
        if let Some(encoder) = self.encoder {
            descriptor.encoder = Some(encoder);
        }
        if let Some(computed) = self.computed {
            descriptor.computed = Some(computed);
        }
    }
}

/// Insertion-ordered descriptor table.
#[derive(Clone, Default)]
pub struct PropertyTable {
    entries: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
}

impl PropertyTable {
    pub fn define(&mut self, name: &str, patch: PropertyPatch) -> &PropertyDescriptor {
        let position = match self.index.get(name) {
            Some(position) => *position,
            None => {
                self.entries.push(PropertyDescriptor::new(name));
                self.index.insert(name.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let descriptor = &mut self.entries[position];
        patch.apply(descriptor);
        descriptor
    }

    pub fn lookup(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|position| &self.entries[*position])
    }

    pub fn for_each(&self, mut callback: impl FnMut(&PropertyDescriptor)) {
        self.entries.iter().for_each(|descriptor| callback(descriptor));
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.entries.iter()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&PropertyDescriptor, &RelationSpec)> {
        self.entries
            .iter()
            .filter_map(|descriptor| descriptor.relation.as_ref().map(|spec| (descriptor, spec)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_mask_covers_create_update_read() {
        let mask = Mask::default();
        assert!(mask.allows(Mask::CREATE));
        assert!(mask.allows(Mask::UPDATE));
        assert!(mask.allows(Mask::READ));
        assert!(!mask.allows(Mask::SYSTEM));
        assert_eq!(mask.without(Mask::UPDATE), Mask::CREATE | Mask::READ);
        assert_eq!((Mask::WRITE & Mask::UPDATE), Mask::UPDATE);
    }

    #[test]
    fn masks_parse_from_letters() {
        assert_eq!(Mask::parse("CR"), Some(Mask::CREATE | Mask::READ));
        assert_eq!(Mask::parse("s"), Some(Mask::SYSTEM));
        assert_eq!(Mask::parse(""), Some(Mask::NONE));
        assert_eq!(Mask::parse("CX"), None);
        assert_eq!(format!("{:?}", Mask::DEFAULT), "Mask(CUR)");
    }

    #[test]
    fn redefinition_replaces_fields_and_keeps_position() {
        let mut table = PropertyTable::default();
        table.define("brand", PropertyPatch::new().init("generic"));
        table.define("model", PropertyPatch::new());
        table.define("brand", PropertyPatch::new().mask(Mask::READ).map("brand_id"));

        assert_eq!(table.names(), vec!["brand", "model"]);
        let brand = table.lookup("brand").unwrap();
        assert_eq!(brand.mask, Mask::READ);
        assert_eq!(brand.init.as_ref().map(Init::produce), Some(json!("generic")));
        assert_eq!(brand.decode_name.as_deref(), Some("brand_id"));
        assert_eq!(brand.encode_name.as_deref(), Some("brand_id"));
    }

    #[test]
    fn relations_are_listed_in_order() {
        let mut table = PropertyTable::default();
        table.define("name", PropertyPatch::new());
        table.define(
            "parts",
            PropertyPatch::new().relation(RelationSpec::new(RelationKind::HasMany, "Part")),
        );
        table.define(
            "owner",
            PropertyPatch::new().relation(RelationSpec::new(RelationKind::BelongsTo, "User").key("owner_ref")),
        );

        let relations: Vec<_> = table
            .relations()
            .map(|(descriptor, spec)| (descriptor.name.as_str(), spec.kind))
            .collect();
        assert_eq!(
            relations,
            vec![("parts", RelationKind::HasMany), ("owner", RelationKind::BelongsTo)]
        );

        let mut seen = Vec::new();
        table.for_each(|descriptor| seen.push(descriptor.name.clone()));
        assert_eq!(seen, vec!["name", "parts", "owner"]);
    }
}
