//! Packers wrap outgoing bodies and unwrap incoming ones.

use crate::error::RequestError;
use crate::framework::factory::ModelType;
use serde_json::{Map, Value};

/// Entity body plus whatever metadata travelled next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unpacked {
    pub data: Value,
    pub metadata: Option<Value>,
}

pub trait Packer: Send + Sync {
    fn unpack(&self, model: &ModelType, many: bool, body: Value) -> Result<Unpacked, RequestError>;
    fn pack(&self, model: &ModelType, many: bool, body: Value) -> Value;
}

/// Bodies travel as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPacker;

impl Packer for RawPacker {
    fn unpack(&self, _model: &ModelType, _many: bool, body: Value) -> Result<Unpacked, RequestError> {
        Ok(Unpacked {
            data: body,
            metadata: None,
        })
    }

    fn pack(&self, _model: &ModelType, _many: bool, body: Value) -> Value {
        body
    }
}

/// Bodies live under a root key named after the model, e.g. `{"bike": {...}}` or
/// `{"bikes": [...], "meta": {...}}`.
#[derive(Debug, Clone, Default)]
pub struct EnvelopePacker {
    pub meta_key: Option<String>,
}

impl EnvelopePacker {
    pub fn new(meta_key: Option<String>) -> Self {
        Self { meta_key }
    }

    fn root(model: &ModelType, many: bool) -> Result<String, RequestError> {
        let name = if many { model.plural_name() } else { model.singular_name() };
        name.ok_or_else(|| RequestError::Malformed(format!("{} has no name to unwrap", model.label())))
    }
}

impl Packer for EnvelopePacker {
    fn unpack(&self, model: &ModelType, many: bool, body: Value) -> Result<Unpacked, RequestError> {
        let root = Self::root(model, many)?;
        let Value::Object(mut envelope) = body else {
            return Err(RequestError::Malformed(format!("expected an envelope object for `{root}`")));
        };
        let data = envelope
            .remove(&root)
            .ok_or_else(|| RequestError::Malformed(format!("missing root key `{root}`")))?;
        let metadata = self.meta_key.as_ref().and_then(|key| envelope.remove(key));
        Ok(Unpacked { data, metadata })
    }

    fn pack(&self, model: &ModelType, many: bool, body: Value) -> Value {
        match Self::root(model, many) {
            Ok(root) => {
                let mut envelope = Map::new();
                envelope.insert(root, body);
                Value::Object(envelope)
            }
            Err(_) => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ModelRegistry;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    #[test]
    fn envelopes_use_singular_and_plural_roots() {
        let models = ModelRegistry::new(MockTransport::new());
        let bikes = models.model("/bikes", Vec::new()).unwrap();
        let packer = EnvelopePacker::new(Some("meta".into()));

        let one = packer.unpack(&bikes, false, json!({"bike": {"id": 1}})).unwrap();
        assert_eq!(one.data, json!({"id": 1}));
        assert_eq!(one.metadata, None);

        let many = packer
            .unpack(&bikes, true, json!({"bikes": [], "meta": {"total": 0}}))
            .unwrap();
        assert_eq!(many.metadata, Some(json!({"total": 0})));

        assert_eq!(packer.pack(&bikes, false, json!({"id": 1})), json!({"bike": {"id": 1}}));
        assert!(packer.unpack(&bikes, false, json!({"other": {}})).is_err());
    }

    #[test]
    fn raw_packer_is_transparent() {
        let models = ModelRegistry::new(MockTransport::new());
        let bikes = models.model("/bikes", Vec::new()).unwrap();
        let body = json!([{"id": 1}]);
        assert_eq!(RawPacker.unpack(&bikes, true, body.clone()).unwrap().data, body);
        assert_eq!(RawPacker.pack(&bikes, true, body.clone()), body);
    }
}
