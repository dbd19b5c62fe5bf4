//! Url building for records and collections.

use crate::runtime::{Collection, Record};

pub trait UrlBuilder: Send + Sync {
    /// Url of an existing record, `None` when it cannot be addressed.
    fn resource_url(&self, record: &Record) -> Option<String>;

    fn collection_url(&self, collection: &Collection) -> Option<String>;

    fn create_url(&self, record: &Record) -> Option<String> {
        record.scope_url()
    }

    fn update_url(&self, record: &Record) -> Option<String> {
        self.resource_url(record)
    }

    fn destroy_url(&self, record: &Record) -> Option<String> {
        self.resource_url(record)
    }
}

/// `<scope url>/<primary key>` for records, the scope url for collections and singletons.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUrlBuilder;

impl UrlBuilder for DefaultUrlBuilder {
    fn resource_url(&self, record: &Record) -> Option<String> {
        let base = record.scope_url()?;
        if record.is_singleton() {
            return Some(base);
        }
        let key = record.pk().to_segment()?;
        Some(join_url(&base, &key))
    }

    fn collection_url(&self, collection: &Collection) -> Option<String> {
        collection.scope_url()
    }
}

pub fn join_url(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_collapses_slashes() {
        assert_eq!(join_url("/bikes/", "/7"), "/bikes/7");
        assert_eq!(join_url("http://api/bikes", "parts"), "http://api/bikes/parts");
    }
}
