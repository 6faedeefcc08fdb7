//! Encoder/decoder registry keyed by media type.

use serde_json::Value;

use super::{read_json, write_json, xml::write_xml, ApesError};

pub type Encoder = fn(&Value) -> Result<Vec<u8>, ApesError>;
pub type Decoder = fn(&[u8]) -> Result<Value, ApesError>;

/// One registered media type with whatever codec halves it supports.
pub struct MediaType {
    pub name: &'static str,
    pub encoder: Option<Encoder>,
    pub decoder: Option<Decoder>,
}

/// Lookup table matched case-insensitively with `*` wildcards on either
/// side of the `type/subtype` pair.
pub struct MediaRegistry {
    entries: Vec<MediaType>,
}

impl Default for MediaRegistry {
    fn default() -> MediaRegistry {
        MediaRegistry {
            entries: vec![
                MediaType {
                    name: "application/json",
                    encoder: Some(write_json),
                    decoder: Some(read_json),
                },
                MediaType {
                    name: "application/apes+xml",
                    encoder: Some(write_xml),
                    decoder: None,
                },
            ],
        }
    }
}

impl MediaRegistry {
    /// First registered entry matching `pattern` that can encode.
    pub fn encoder_for(&self, pattern: &str) -> Option<(&'static str, Encoder)> {
        self.entries
            .iter()
            .find(|entry| entry.encoder.is_some() && matches(pattern, entry.name))
            .and_then(|entry| entry.encoder.map(|encoder| (entry.name, encoder)))
    }

    /// First registered entry matching `pattern` that can decode.
    pub fn decoder_for(&self, pattern: &str) -> Option<(&'static str, Decoder)> {
        self.entries
            .iter()
            .find(|entry| entry.decoder.is_some() && matches(pattern, entry.name))
            .and_then(|entry| entry.decoder.map(|decoder| (entry.name, decoder)))
    }
}

fn matches(pattern: &str, name: &str) -> bool {
    let (pattern_type, pattern_subtype) = match pattern.split_once('/') {
        Some(split) => split,
        None => return false,
    };
    let (name_type, name_subtype) = match name.split_once('/') {
        Some(split) => split,
        None => return false,
    };
    segment_matches(pattern_type, name_type) && segment_matches(pattern_subtype, name_subtype)
}

fn segment_matches(pattern: &str, name: &str) -> bool {
    pattern == "*" || pattern.eq_ignore_ascii_case(name)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_and_wildcard_matching() {
        let registry = MediaRegistry::default();
        assert_eq!(
            registry.encoder_for("application/json").unwrap().0,
            "application/json"
        );
        assert_eq!(
            registry.encoder_for("Application/JSON").unwrap().0,
            "application/json"
        );
        assert_eq!(registry.encoder_for("*/*").unwrap().0, "application/json");
        assert_eq!(
            registry.encoder_for("application/apes+xml").unwrap().0,
            "application/apes+xml"
        );
        assert!(registry.encoder_for("text/plain").is_none());
    }

    #[test]
    fn xml_has_no_reader() {
        let registry = MediaRegistry::default();
        assert!(registry.decoder_for("application/apes+xml").is_none());
        assert!(registry.decoder_for("application/*").is_some());
    }

    #[test]
    fn negotiated_encoder_works() {
        let registry = MediaRegistry::default();
        let (_, encode) = registry.encoder_for("application/json").unwrap();
        assert_eq!(encode(&json!([1])).unwrap(), b"[1]".to_vec());
    }
}
