//! Annotated XML writer.
//!
//! The output is a single `<root semantics="APES">` element whose children
//! carry explicit type tags, so a reader needs no schema. There is no
//! matching parser; the format exists for consumers that cannot take JSON.

use serde_json::Value;

use super::{check_value, type_tag, ApesError};

/// Serialize a list or map to annotated XML bytes.
pub fn write_xml(value: &Value) -> Result<Vec<u8>, ApesError> {
    check_value(value)?;
    let mut out = String::new();
    match value {
        Value::Array(items) => {
            out.push_str(r#"<root semantics="APES" type="List">"#);
            for item in items {
                write_item(&mut out, item);
            }
        }
        Value::Object(entries) => {
            out.push_str(r#"<root semantics="APES" type="Map">"#);
            for (key, entry) in entries {
                write_entry(&mut out, key, entry);
            }
        }
        _ => return Err(ApesError::RootNotComposite),
    }
    out.push_str("</root>");
    Ok(out.into_bytes())
}

fn write_item(out: &mut String, value: &Value) {
    out.push_str(&format!(r#"<item type="{}">"#, type_tag(value)));
    write_content(out, value);
    out.push_str("</item>");
}

fn write_entry(out: &mut String, key: &str, value: &Value) {
    out.push_str(&format!(
        r#"<entry key="{}" type="{}">"#,
        key,
        type_tag(value)
    ));
    write_content(out, value);
    out.push_str("</entry>");
}

fn write_content(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => escape_into(out, text),
        Value::Array(items) => {
            for item in items {
                write_item(out, item);
            }
        }
        Value::Object(entries) => {
            for (key, entry) in entries {
                write_entry(out, key, entry);
            }
        }
    }
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}
