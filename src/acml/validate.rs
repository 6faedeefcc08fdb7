//! Recursive document validation against a template's field tree.

use std::time::{Duration, Instant};

use log::trace;
use serde_json::Value;

use super::expr::Context;
use super::{Document, Field, FieldKind, Report, Template, Violation};

/// Wall-clock budget for evaluating one condition expression.
pub const CONDITION_TIMEOUT: Duration = Duration::from_millis(50);

/// Validate `document` against its declared template.
///
/// A document without a template declaration is vacuously sound. A missing
/// template is itself a violation, not an error.
pub fn validate_document(document: &Document, template: Option<&Template>) -> Report {
    let mut violations = Vec::new();
    match (&document.template, template) {
        (None, _) => {}
        (Some(_), None) => violations.push(Violation {
            condition: "template != undefined".to_owned(),
            path: String::new(),
            error: None,
        }),
        (Some(_), Some(template)) => {
            let ctx = Position {
                index: None,
                key: None,
                length: 0,
            };
            validate_field(&template.body, &document.body, "", ctx, &mut violations);
        }
    }
    trace!(
        "document {} validated with {} violation(s)",
        document.name,
        violations.len()
    );
    Report {
        document: document.name.clone(),
        template: document.template.clone(),
        violations,
    }
}

/// Where an entity sits inside its enclosing container.
#[derive(Clone, Copy)]
struct Position<'a> {
    index: Option<usize>,
    key: Option<&'a str>,
    length: usize,
}

fn validate_field(
    field: &Field,
    entity: &Value,
    path: &str,
    position: Position<'_>,
    violations: &mut Vec<Violation>,
) {
    for condition in &field.conditions {
        let ctx = Context {
            entity,
            index: position.index,
            key: position.key,
            length: position.length,
        };
        let deadline = Instant::now() + CONDITION_TIMEOUT;
        match condition.expr().eval(&ctx, deadline) {
            Ok(Value::Bool(true)) => {}
            Ok(_) => violations.push(Violation {
                condition: condition.source().to_owned(),
                path: path.to_owned(),
                error: None,
            }),
            Err(err) => violations.push(Violation {
                condition: condition.source().to_owned(),
                path: path.to_owned(),
                error: Some(err.to_string()),
            }),
        }
    }

    match (&field.kind, entity) {
        (FieldKind::Null, Value::Null) => {}
        (FieldKind::Boolean, Value::Bool(_)) => {}
        (FieldKind::Number, Value::Number(number)) => {
            if number.as_f64().map_or(true, |n| !n.is_finite()) {
                violations.push(type_violation(field, path));
            }
        }
        (FieldKind::Text, Value::String(_)) => {}
        (FieldKind::List { item, items }, Value::Array(elements)) => {
            for (at, element) in elements.iter().enumerate() {
                let child_path = format!("{}[{}]", path, at);
                let child_position = Position {
                    index: Some(at),
                    key: None,
                    length: elements.len(),
                };
                if let Some(uniform) = item {
                    validate_field(uniform, element, &child_path, child_position, violations);
                }
                if let Some(positional) = items.get(at) {
                    validate_field(positional, element, &child_path, child_position, violations);
                }
            }
        }
        (FieldKind::Map { entry, entries }, Value::Object(object)) => {
            for (key, value) in object {
                let child_path = format!("{}.{}", path, key);
                let child_position = Position {
                    index: None,
                    key: Some(key),
                    length: object.len(),
                };
                if let Some(uniform) = entry {
                    validate_field(uniform, value, &child_path, child_position, violations);
                }
                if let Some(keyed) = entries.get(key) {
                    validate_field(keyed, value, &child_path, child_position, violations);
                }
            }
        }
        _ => violations.push(type_violation(field, path)),
    }
}

fn type_violation(field: &Field, path: &str) -> Violation {
    Violation {
        condition: format!("typeof entity == {}", field.tag()),
        path: path.to_owned(),
        error: None,
    }
}
