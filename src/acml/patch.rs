//! Patch application: a slash-delimited descent with container coercion.

use serde_json::Value;

use super::{AcmlError, Document, Patch};
use crate::apes::is_identifier;

/// Apply `patch` to `document` in place.
///
/// Each path segment descends one level, coercing the current node: an
/// all-digit segment turns anything that is not a list into `[]` and indexes
/// it (padding with nulls), any other segment turns arrays and non-maps into
/// `{}` and keys it. The terminal node is replaced by the patch data; an
/// empty path replaces the whole body.
pub fn apply_patch(patch: &Patch, document: &mut Document) -> Result<(), AcmlError> {
    if patch.name != document.name {
        return Err(AcmlError::MismatchedName {
            patch: patch.name.clone(),
            document: document.name.clone(),
        });
    }
    let data = patch.data.clone().unwrap_or(Value::Null);
    if patch.path.is_empty() {
        document.body = data;
        return Ok(());
    }

    let segments: Vec<&str> = patch.path.split('/').collect();
    for segment in &segments {
        let digits = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
        if !digits && !is_identifier(segment) {
            return Err(AcmlError::BadPatchPath(segment.to_string()));
        }
    }

    let mut node = &mut document.body;
    for segment in &segments[..segments.len() - 1] {
        node = descend(node, segment)?;
    }
    let last = segments[segments.len() - 1];
    *descend(node, last)? = data;
    Ok(())
}

fn descend<'v>(node: &'v mut Value, segment: &str) -> Result<&'v mut Value, AcmlError> {
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        let at: usize = segment
            .parse()
            .map_err(|_| AcmlError::BadPatchPath(segment.to_owned()))?;
        if !matches!(node, Value::Array(_)) {
            *node = Value::Array(Vec::new());
        }
        match node {
            Value::Array(items) => {
                while items.len() <= at {
                    items.push(Value::Null);
                }
                Ok(&mut items[at])
            }
            _ => unreachable!(),
        }
    } else {
        if !matches!(node, Value::Object(_)) {
            *node = Value::Object(serde_json::Map::new());
        }
        match node {
            Value::Object(entries) => Ok(entries
                .entry(segment.to_owned())
                .or_insert(Value::Null)),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn doc(body: Value) -> Document {
        Document::new("cfg", body).unwrap()
    }

    fn patch(path: &str, data: Value) -> Patch {
        Patch {
            name: "cfg".to_owned(),
            path: path.to_owned(),
            data: Some(data),
        }
    }

    #[test]
    fn empty_path_replaces_the_body() {
        let mut document = doc(json!({"a": 1}));
        apply_patch(&patch("", json!([1, 2])), &mut document).unwrap();
        assert_eq!(document.body, json!([1, 2]));
    }

    #[test]
    fn digit_segment_coerces_to_a_list() {
        let mut document = doc(json!({}));
        apply_patch(&patch("3/name", json!("x")), &mut document).unwrap();
        assert_eq!(document.body, json!([null, null, null, {"name": "x"}]));
    }

    #[test]
    fn identifier_segment_coerces_to_a_map() {
        let mut document = doc(json!([1, 2, 3]));
        apply_patch(&patch("net/port", json!(53)), &mut document).unwrap();
        assert_eq!(document.body, json!({"net": {"port": 53}}));
    }

    #[test]
    fn siblings_survive_a_deep_patch() {
        let mut document = doc(json!({"keep": true, "net": {"host": "a", "port": 1}}));
        apply_patch(&patch("net/port", json!(2)), &mut document).unwrap();
        assert_eq!(
            document.body,
            json!({"keep": true, "net": {"host": "a", "port": 2}})
        );
    }

    #[test]
    fn absent_data_writes_null() {
        let mut document = doc(json!({"a": 1}));
        let erase = Patch {
            name: "cfg".to_owned(),
            path: "a".to_owned(),
            data: None,
        };
        apply_patch(&erase, &mut document).unwrap();
        assert_eq!(document.body, json!({"a": null}));
    }

    #[test]
    fn name_mismatch_is_an_error() {
        let mut document = doc(json!({}));
        let other = Patch {
            name: "other".to_owned(),
            path: String::new(),
            data: None,
        };
        assert!(matches!(
            apply_patch(&other, &mut document),
            Err(AcmlError::MismatchedName { .. })
        ));
    }

    #[test]
    fn malformed_segments_are_rejected() {
        let mut document = doc(json!({}));
        assert!(matches!(
            apply_patch(&patch("no-dash", json!(1)), &mut document),
            Err(AcmlError::BadPatchPath(_))
        ));
        assert!(matches!(
            apply_patch(&patch("a//b", json!(1)), &mut document),
            Err(AcmlError::BadPatchPath(_))
        ));
    }

    #[test]
    fn existing_list_is_extended_not_replaced() {
        let mut document = doc(json!([10, 20]));
        apply_patch(&patch("2", json!(30)), &mut document).unwrap();
        assert_eq!(document.body, json!([10, 20, 30]));
    }
}
