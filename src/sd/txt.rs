//! TXT record attributes (RFC 1464).
//!
//! Each attribute is one length-prefixed TXT string of the form
//! `key=value`. Keys are lower-cased and escaped on write; values travel
//! verbatim, both ways.

use std::collections::BTreeMap;

/// Characters escaped with a preceding backtick in attribute keys.
const ESCAPED: [char; 5] = ['\t', '\n', ' ', '=', '`'];

/// Render attributes to TXT strings, one `key=value` per string.
///
/// Key characters outside the printable range 0x21..=0x7e that are not in
/// the escape set are dropped.
pub fn write_attributes(attributes: &BTreeMap<String, String>) -> Vec<Vec<u8>> {
    attributes
        .iter()
        .map(|(key, value)| {
            let mut string = Vec::new();
            for ch in key.to_lowercase().chars() {
                if ESCAPED.contains(&ch) {
                    string.push(b'`');
                    string.push(ch as u8);
                } else if ('\x21'..='\x7e').contains(&ch) {
                    string.push(ch as u8);
                }
            }
            string.push(b'=');
            string.extend_from_slice(value.as_bytes());
            string
        })
        .collect()
}

/// Parse attributes out of TXT strings; entries without an unescaped `=`
/// are discarded, later pairs override earlier ones.
pub fn read_attributes(strings: &[Vec<u8>]) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for string in strings {
        if let Some((key, value)) = split_unescaped(string) {
            attributes.insert(key, value);
        }
    }
    attributes
}

/// Split at the first `=` not preceded by a backtick, collapsing every
/// `` `x `` in the key to `x`.
fn split_unescaped(string: &[u8]) -> Option<(String, String)> {
    let mut key = Vec::new();
    let mut escaped = false;
    for (at, &byte) in string.iter().enumerate() {
        if escaped {
            key.push(byte);
            escaped = false;
        } else if byte == b'`' {
            escaped = true;
        } else if byte == b'=' {
            let value = &string[at + 1..];
            return Some((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            ));
        } else {
            key.push(byte);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn round_trip_lowercases_keys() {
        let written = write_attributes(&attrs(&[("Path", "/"), ("VERSION", "1")]));
        assert_eq!(
            read_attributes(&written),
            attrs(&[("path", "/"), ("version", "1")])
        );
    }

    #[test]
    fn key_escapes() {
        let written = write_attributes(&attrs(&[("a key", "v")]));
        assert_eq!(written, vec![b"a` key=v".to_vec()]);
        assert_eq!(read_attributes(&written), attrs(&[("a key", "v")]));
    }

    #[test]
    fn equals_in_key_is_escaped_and_survives() {
        let written = write_attributes(&attrs(&[("a=b", "v")]));
        assert_eq!(written, vec![b"a`=b=v".to_vec()]);
        assert_eq!(read_attributes(&written), attrs(&[("a=b", "v")]));
    }

    #[test]
    fn unprintable_key_bytes_are_dropped() {
        let written = write_attributes(&attrs(&[("pa\u{7f}th", "/")]));
        assert_eq!(written, vec![b"path=/".to_vec()]);
    }

    #[test]
    fn values_pass_through_verbatim() {
        let written = write_attributes(&attrs(&[("path", "a=b `c")]));
        assert_eq!(written, vec![b"path=a=b `c".to_vec()]);
        // The first unescaped `=` splits; everything after is the value,
        // even further equals signs.
        assert_eq!(read_attributes(&written), attrs(&[("path", "a=b `c")]));
    }

    #[test]
    fn entries_without_equals_are_discarded() {
        assert!(read_attributes(&[b"flagonly".to_vec()]).is_empty());
    }

    #[test]
    fn later_pairs_override_earlier() {
        let strings = vec![b"v=1".to_vec(), b"v=2".to_vec()];
        assert_eq!(read_attributes(&strings), attrs(&[("v", "2")]));
    }
}
