//! Weak identity map: at most one live record per primary key.

use crate::framework::factory::key_segment;
use crate::runtime::record::{Record, RecordInner};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Records are held weakly, so an entry lives as long as its longest holder.
#[derive(Clone, Default)]
pub struct IdentityMap {
    entries: Arc<Mutex<HashMap<String, Weak<RecordInner>>>>,
}

impl IdentityMap {
    pub fn get(&self, key: &Value) -> Option<Record> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let segment = key_segment(key);
        match entries.get(&segment).and_then(Weak::upgrade) {
            Some(inner) => Some(Record::from_inner(inner)),
            None => {
                entries.remove(&segment);
                None
            }
        }
    }

    pub fn insert(&self, key: &Value, record: &Record) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key_segment(key), record.downgrade());
    }

    pub fn remove(&self, key: &Value) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key_segment(key));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, record| record.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap").field("live", &self.len()).finish()
    }
}
