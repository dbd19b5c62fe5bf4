//! Decoding and encoding of relation properties.
//!
//! | kind | decoded from | encoded as |
//! |---|---|---|
//! | has-many | nested array | nested array, only when `inline` |
//! | has-one | nested object | nested object, only when `inline` |
//! | belongs-to | nested object, or `<name>_id` | `<name>_id` when set, nested when `inline` |
//! | belongs-to-many | nested array, or `<singular>_ids` | `<singular>_ids`, nested when `inline` |
//!
//! Key-only references are collected in [`PendingRefs`] while a payload decodes. Targets
//! using bulk population load them with one request once the payload is done.

use crate::codec::naming::singularize;
use crate::error::ModelResult;
use crate::framework::factory::{Key, ModelType, ResolveStrategy};
use crate::framework::properties::{Mask, PropertyDescriptor, RelationKind, RelationSpec};
use crate::runtime::record::{Record, Scope, StagedRelation};
use crate::runtime::RelationValue;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Unresolved references found while decoding.
#[derive(Default)]
pub(crate) struct PendingRefs {
    refs: Vec<(ModelType, Record)>,
}

impl PendingRefs {
    pub(crate) fn push(&mut self, target: &ModelType, record: &Record) {
        if matches!(target.strategy(), ResolveStrategy::BulkPopulate { .. }) && !record.is_resolved() {
            self.refs.push((target.clone(), record.clone()));
        }
    }

    /// Issues one populate request per target type.
    pub(crate) fn flush(self) {
        let mut groups: Vec<(ModelType, Vec<Record>)> = Vec::new();
        for (target, record) in self.refs {
            match groups.iter_mut().find(|(model, _)| model.same_type(&target)) {
                Some((_, records)) => {
                    if !records.iter().any(|known| known.ptr_eq(&record)) {
                        records.push(record);
                    }
                }
                None => groups.push((target, vec![record])),
            }
        }
        for (target, records) in groups {
            if let Err(error) = target.populate(&records) {
                debug!(model = %target.label(), error = %error, "Leaving references unresolved");
            }
        }
    }
}

/// Raw name of the key field a relation reads and writes.
pub(crate) fn foreign_key(model: &ModelType, descriptor: &PropertyDescriptor, spec: &RelationSpec) -> Option<String> {
    let base = || model.naming().encode_name(&descriptor.name);
    match spec.kind {
        RelationKind::BelongsTo => Some(spec.key.clone().unwrap_or_else(|| format!("{}_id", base()))),
        RelationKind::BelongsToMany => Some(
            spec.key
                .clone()
                .unwrap_or_else(|| format!("{}_ids", singularize(&base()))),
        ),
        RelationKind::HasMany | RelationKind::HasOne => None,
    }
}

/// Marks a relation's key field as handled so it does not decode as a plain attribute.
pub(crate) fn consume_keys(
    model: &ModelType,
    descriptor: &PropertyDescriptor,
    spec: &RelationSpec,
    consumed: &mut HashSet<String>,
) {
    if let Some(key) = foreign_key(model, descriptor, spec) {
        consumed.insert(key);
    }
}

/// Decodes one relation without touching `record`. The returned steps are applied when
/// the record's staged decode commits.
pub(crate) fn stage_relation(
    record: &Record,
    descriptor: &PropertyDescriptor,
    spec: &RelationSpec,
    fields: &Map<String, Value>,
    pending: &mut PendingRefs,
) -> ModelResult<Vec<StagedRelation>> {
    let model = record.model().clone();
    let name = descriptor.name.as_str();
    let raw_name = model.decoded_from(descriptor);
    let set = |value: Option<RelationValue>| StagedRelation::Set {
        name: name.to_string(),
        value,
    };

    match spec.kind {
        RelationKind::HasMany => {
            let Some(Value::Array(items)) = fields.get(&raw_name) else {
                return Ok(Vec::new());
            };
            let collection = record.many(name)?;
            let items = collection.stage_items(items, pending)?;
            Ok(vec![StagedRelation::Many { collection, items }])
        }
        RelationKind::HasOne => {
            let Some(value @ Value::Object(_)) = fields.get(&raw_name) else {
                return Ok(Vec::new());
            };
            match record.one(name)? {
                Some(one) => Ok(vec![StagedRelation::Nested(one.stage(value, Mask::READ, pending)?)]),
                None => Ok(Vec::new()),
            }
        }
        RelationKind::BelongsTo => {
            let target = model.relation_target(name, spec)?;
            let current = match record.relation(name) {
                Some(RelationValue::One(current)) => Some(current),
                _ => None,
            };
            match fields.get(&raw_name) {
                Some(nested @ Value::Object(_)) => {
                    let key = target.infer_key(nested);
                    let owner = match current {
                        Some(current) if key.is_present() && current.pk() == key => current,
                        _ => target.shared_or_new(nested, Scope::Model),
                    };
                    let staged = owner.stage(nested, Mask::READ, pending)?;
                    Ok(vec![StagedRelation::Nested(staged), set(Some(RelationValue::One(owner)))])
                }
                Some(Value::Null) => Ok(vec![set(None)]),
                _ => {
                    let key_name = foreign_key(&model, descriptor, spec).unwrap_or_default();
                    match Key::from_value(fields.get(&key_name)) {
                        Key::Present(key) => {
                            if current.is_some_and(|current| current.pk().value() == Some(&key)) {
                                return Ok(Vec::new());
                            }
                            let reference = target.new_record(key);
                            pending.push(&target, &reference);
                            Ok(vec![set(Some(RelationValue::One(reference)))])
                        }
                        Key::Absent if fields.contains_key(&key_name) => Ok(vec![set(None)]),
                        Key::Absent => Ok(Vec::new()),
                    }
                }
            }
        }
        RelationKind::BelongsToMany => {
            let target = model.relation_target(name, spec)?;
            let key_name = foreign_key(&model, descriptor, spec).unwrap_or_default();
            let mut steps = Vec::new();
            let records = if let Some(Value::Array(items)) = fields.get(&raw_name) {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    let related = target.shared_or_new(item, Scope::Model);
                    steps.push(StagedRelation::Nested(related.stage(item, Mask::READ, pending)?));
                    records.push(related);
                }
                records
            } else if let Some(Value::Array(keys)) = fields.get(&key_name) {
                keys.iter()
                    .filter(|key| !key.is_null())
                    .map(|key| {
                        let reference = target.new_record(key.clone());
                        pending.push(&target, &reference);
                        reference
                    })
                    .collect()
            } else {
                return Ok(Vec::new());
            };
            steps.push(set(Some(RelationValue::List(target.list(records)))));
            Ok(steps)
        }
    }
}

pub(crate) fn encode_relation(
    record: &Record,
    descriptor: &PropertyDescriptor,
    spec: &RelationSpec,
    mask: Mask,
    output: &mut Map<String, Value>,
) -> ModelResult<()> {
    let model = record.model();
    match (spec.kind, record.relation(&descriptor.name)) {
        (RelationKind::HasMany, Some(RelationValue::Many(collection))) if spec.inline => {
            output.insert(model.encoded_as(descriptor), collection.encode(mask)?);
        }
        (RelationKind::HasOne, Some(RelationValue::One(one))) if spec.inline => {
            output.insert(model.encoded_as(descriptor), one.encode(mask)?);
        }
        (RelationKind::BelongsTo, Some(RelationValue::One(owner))) => {
            if spec.inline {
                output.insert(model.encoded_as(descriptor), owner.encode(mask)?);
            } else if let (Some(key_name), Some(key)) =
                (foreign_key(model, descriptor, spec), owner.pk().into_value())
            {
                output.insert(key_name, key);
            }
        }
        (RelationKind::BelongsToMany, Some(RelationValue::List(list))) => {
            if spec.inline {
                output.insert(model.encoded_as(descriptor), list.encode(mask)?);
            } else if let Some(key_name) = foreign_key(model, descriptor, spec) {
                let keys = list.keys().into_iter().filter_map(Key::into_value).collect();
                output.insert(key_name, Value::Array(keys));
            }
        }
        _ => {}
    }
    Ok(())
}
