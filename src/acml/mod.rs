//! The configuration data family: templates, documents, patches and
//! validation reports.
//!
//! A template is a tree of typed fields with optional guard conditions; a
//! document is a named body value that may declare the template it must
//! satisfy. Validation never fails as such — it produces a report, and a
//! document is *sound* when its report carries no violations.

mod expr;
mod patch;
mod validate;

pub use expr::{Context, Expr, ExprError};
pub use patch::apply_patch;
pub use validate::{validate_document, CONDITION_TIMEOUT};

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcmlError {
    #[error("name {0:?} must not end with a dot")]
    BadName(String),
    #[error("patch names {patch:?} but the document is {document:?}")]
    MismatchedName { patch: String, document: String },
    #[error("patch path segment {0:?} is neither an identifier nor an index")]
    BadPatchPath(String),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

/// A compiled condition, carried around with its source text so reports
/// can quote it.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn new(source: impl Into<String>) -> Result<Condition, AcmlError> {
        let source = source.into();
        let expr = Expr::parse(&source)?;
        Ok(Condition { source, expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Condition) -> bool {
        self.source == other.source
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Condition, D::Error> {
        let source = String::deserialize(deserializer)?;
        Condition::new(source).map_err(D::Error::custom)
    }
}

/// One node of a template body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    Null,
    Boolean,
    Number,
    Text,
    List {
        /// Uniform field every element must satisfy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item: Option<Box<Field>>,
        /// Positional fields, matched by element index.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        items: Vec<Field>,
    },
    Map {
        /// Uniform field every value must satisfy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry: Option<Box<Field>>,
        /// Per-key fields.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        entries: BTreeMap<String, Field>,
    },
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Field {
        Field {
            name: name.into(),
            conditions: Vec::new(),
            kind,
        }
    }

    pub fn with_condition(mut self, source: &str) -> Result<Field, AcmlError> {
        self.conditions.push(Condition::new(source)?);
        Ok(self)
    }

    /// The type tag this field demands of its entity.
    pub fn tag(&self) -> &'static str {
        match &self.kind {
            FieldKind::Null => "Null",
            FieldKind::Boolean => "Boolean",
            FieldKind::Number => "Number",
            FieldKind::Text => "Text",
            FieldKind::List { .. } => "List",
            FieldKind::Map { .. } => "Map",
        }
    }
}

/// A named validation schema for documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub body: Field,
}

impl Template {
    pub fn new(name: impl Into<String>, body: Field) -> Result<Template, AcmlError> {
        let name = name.into();
        if name.ends_with('.') || name.is_empty() {
            return Err(AcmlError::BadName(name));
        }
        Ok(Template { name, body })
    }
}

/// A named configuration body, optionally bound to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Document {
    pub fn new(name: impl Into<String>, body: Value) -> Result<Document, AcmlError> {
        let name = name.into();
        if name.ends_with('.') || name.is_empty() {
            return Err(AcmlError::BadName(name));
        }
        Ok(Document {
            name,
            body,
            template: None,
        })
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Document {
        self.template = Some(template.into());
        self
    }
}

/// A partial change to one document's body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub name: String,
    /// Slash-delimited descent; an all-digit segment indexes a list, any
    /// other segment keys a map, the empty path replaces the whole body.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One broken constraint found during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub condition: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub violations: Vec<Violation>,
}

impl Report {
    pub fn is_sound(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn template_names_reject_trailing_dots() {
        let body = Field::new("root", FieldKind::Map {
            entry: None,
            entries: BTreeMap::new(),
        });
        assert!(Template::new("net.config", body.clone()).is_ok());
        assert!(matches!(
            Template::new("net.config.", body),
            Err(AcmlError::BadName(_))
        ));
    }

    #[test]
    fn templates_serialize_with_condition_sources() {
        let body = Field::new("port", FieldKind::Number)
            .with_condition("entity > 0 && entity <= 65535")
            .unwrap();
        let template = Template::new("net", body).unwrap();
        let json = serde_json::to_string(&template).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
        assert_eq!(
            back.body.conditions[0].source(),
            "entity > 0 && entity <= 65535"
        );
    }

    #[test]
    fn bad_condition_fails_deserialization() {
        let json = r#"{"name":"x","body":{"name":"","kind":"Null","conditions":["?? what"]}}"#;
        assert!(serde_json::from_str::<Template>(json).is_err());
    }
}
