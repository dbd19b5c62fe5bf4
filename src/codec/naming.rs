//! Naming transforms between raw (server) names and attribute names.

use convert_case::{Case, Casing};

pub trait NameTransform: Send + Sync {
    /// Raw name -> attribute name.
    fn decode_name(&self, raw: &str) -> String;
    /// Attribute name -> raw name.
    fn encode_name(&self, attr: &str) -> String;
}

/// `brand_name` on the wire, `brandName` on records. Leading `_` and `$` are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseNaming;

impl NameTransform for SnakeCaseNaming {
    fn decode_name(&self, raw: &str) -> String {
        convert_keeping_prefix(raw, Case::Camel)
    }

    fn encode_name(&self, attr: &str) -> String {
        convert_keeping_prefix(attr, Case::Snake)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNaming;

impl NameTransform for IdentityNaming {
    fn decode_name(&self, raw: &str) -> String {
        raw.to_string()
    }

    fn encode_name(&self, attr: &str) -> String {
        attr.to_string()
    }
}

fn convert_keeping_prefix(name: &str, case: Case) -> String {
    let body = name.trim_start_matches(|c: char| c == '_' || c == '$');
    if body.is_empty() {
        return name.to_string();
    }
    let prefix = &name[..name.len() - body.len()];
    format!("{prefix}{}", body.to_case(case))
}

pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with("sses") || word.ends_with("xes") || word.ends_with("ches") || word.ends_with("shes") {
        word[..word.len() - 2].to_string()
    } else if word.ends_with("ss") {
        word.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

pub fn pluralize(word: &str) -> String {
    let consonant_y = word.len() > 1
        && word.ends_with('y')
        && !matches!(word.as_bytes()[word.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u');
    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn snake_case_naming_maps_both_ways() {
        let naming = SnakeCaseNaming;
        assert_eq!(naming.encode_name("brandName"), "brand_name");
        assert_eq!(naming.decode_name("brand_name"), "brandName");
        assert_eq!(naming.encode_name("id"), "id");
        assert_eq!(naming.encode_name("_internalId"), "_internal_id");
        assert_eq!(naming.decode_name("$type"), "$type");
    }

    #[test]
    fn inflection_covers_common_endings() {
        assert_eq!(singularize("bikes"), "bike");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("class"), "class");
        assert_eq!(pluralize("bike"), "bikes");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
    }

    proptest! {
        #[test]
        fn camel_case_names_survive_a_round_trip(
            head in "[a-z]{1,8}",
            tail in proptest::collection::vec("[A-Z][a-z]{1,6}", 0..4),
        ) {
            let attr = format!("{head}{}", tail.concat());
            let naming = SnakeCaseNaming;
            prop_assert_eq!(naming.decode_name(&naming.encode_name(&attr)), attr);
        }
    }
}
