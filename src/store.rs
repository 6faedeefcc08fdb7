//! The configuration store service: documents and templates kept in
//! reserved directory buckets, with validation gating every write.
//!
//! Documents live under `.d`, templates under `.t`. A write only commits
//! when every affected document is sound; an unsound set comes back as
//! reports, which are a result in their own right rather than an error.

use log::debug;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::acml::{
    apply_patch, validate_document, AcmlError, Document, Patch, Report, Template, Violation,
};
use crate::dir::{Directory, DirectoryError, DirectoryWriter};

const DOCUMENT_BUCKET: &str = ".d";
const TEMPLATE_BUCKET: &str = ".t";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Acml(#[from] AcmlError),
    #[error("stored entity is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct ConfigStore {
    root: Directory,
}

impl ConfigStore {
    pub fn new(root: Directory) -> ConfigStore {
        ConfigStore { root }
    }

    fn document_key(name: &str) -> String {
        format!("{}.{}", DOCUMENT_BUCKET, name)
    }

    fn template_key(name: &str) -> String {
        format!("{}.{}", TEMPLATE_BUCKET, name)
    }

    /// Store templates, replacing same-named ones.
    pub fn put_templates(&self, templates: &[Template]) -> Result<(), StoreError> {
        let mut entries = Vec::with_capacity(templates.len());
        for template in templates {
            entries.push((
                Self::template_key(&template.name),
                serde_json::to_vec(template)?,
            ));
        }
        self.root.write(|w| {
            let refs: Vec<(&str, &[u8])> = entries
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_slice()))
                .collect();
            w.add(&refs).map_err(StoreError::from)
        })
    }

    /// Fetch templates by name or name prefix; no names fetches all.
    pub fn get_templates(&self, names: &[&str]) -> Result<Vec<Template>, StoreError> {
        let keys = bucket_keys(TEMPLATE_BUCKET, names, Self::template_key);
        self.root.read(|r| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let mut templates = Vec::new();
            for (_, bytes) in r.list(&refs).map_err(StoreError::from)? {
                templates.push(serde_json::from_slice(&bytes)?);
            }
            Ok(templates)
        })
    }

    pub fn remove_templates(&self, names: &[&str]) -> Result<(), StoreError> {
        let keys = bucket_keys(TEMPLATE_BUCKET, names, Self::template_key);
        self.root.write(|w| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            w.remove(&refs).map_err(StoreError::from)
        })
    }

    /// Validate and store documents.
    ///
    /// Everything happens in one write transaction against a single
    /// template snapshot; the documents are written iff every report is
    /// sound. The reports are returned either way.
    pub fn put_documents(&self, documents: &[Document]) -> Result<Vec<Report>, StoreError> {
        self.root.write(|w| {
            let mut reports = Vec::with_capacity(documents.len());
            for document in documents {
                reports.push(validate_against_stored(w, document)?);
            }
            if reports.iter().all(Report::is_sound) {
                write_documents(w, documents.iter())?;
            } else {
                debug!("rejecting document set with violations");
            }
            Ok(reports)
        })
    }

    /// Fetch documents by name or name prefix; no names fetches all.
    pub fn get_documents(&self, names: &[&str]) -> Result<Vec<Document>, StoreError> {
        let keys = bucket_keys(DOCUMENT_BUCKET, names, Self::document_key);
        self.root.read(|r| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let mut documents = Vec::new();
            for (_, bytes) in r.list(&refs).map_err(StoreError::from)? {
                documents.push(serde_json::from_slice(&bytes)?);
            }
            Ok(documents)
        })
    }

    pub fn remove_documents(&self, names: &[&str]) -> Result<(), StoreError> {
        let keys = bucket_keys(DOCUMENT_BUCKET, names, Self::document_key);
        self.root.write(|w| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            w.remove(&refs).map_err(StoreError::from)
        })
    }

    /// Apply patches to stored documents.
    ///
    /// Patches naming no stored document contribute a synthetic
    /// `DocumentExists` violation. The mutated set is validated as a whole
    /// and written back only when the aggregate violation count is zero.
    pub fn patch_documents(&self, patches: &[Patch]) -> Result<Vec<Report>, StoreError> {
        self.root.write(|w| {
            let mut touched: BTreeMap<String, Document> = BTreeMap::new();
            let mut reports = Vec::new();
            for patch in patches {
                if !touched.contains_key(&patch.name) {
                    match read_document(w, &patch.name)? {
                        Some(document) => {
                            touched.insert(patch.name.clone(), document);
                        }
                        None => {
                            reports.push(Report {
                                document: patch.name.clone(),
                                template: None,
                                violations: vec![Violation {
                                    condition: format!("DocumentExists(\"{}\")", patch.name),
                                    path: String::new(),
                                    error: None,
                                }],
                            });
                            continue;
                        }
                    }
                }
                if let Some(document) = touched.get_mut(&patch.name) {
                    apply_patch(patch, document)?;
                }
            }
            for document in touched.values() {
                reports.push(validate_against_stored(w, document)?);
            }
            let violations: usize = reports.iter().map(|r| r.violations.len()).sum();
            if violations == 0 {
                write_documents(w, touched.values())?;
            } else {
                debug!("rejecting patch set with {} violation(s)", violations);
            }
            Ok(reports)
        })
    }
}

/// Exact keys for names, or the whole bucket when no names are given.
fn bucket_keys(bucket: &str, names: &[&str], key: impl Fn(&str) -> String) -> Vec<String> {
    if names.is_empty() {
        vec![format!("{}.", bucket)]
    } else {
        names.iter().map(|name| key(name)).collect()
    }
}

fn read_document(
    w: &DirectoryWriter<'_, '_>,
    name: &str,
) -> Result<Option<Document>, StoreError> {
    let key = ConfigStore::document_key(name);
    let listed = w.list(&[key.as_str()]).map_err(StoreError::from)?;
    match listed.into_iter().next() {
        Some((_, bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn read_template(
    w: &DirectoryWriter<'_, '_>,
    name: &str,
) -> Result<Option<Template>, StoreError> {
    let key = ConfigStore::template_key(name);
    let listed = w.list(&[key.as_str()]).map_err(StoreError::from)?;
    match listed.into_iter().next() {
        Some((_, bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn validate_against_stored(
    w: &DirectoryWriter<'_, '_>,
    document: &Document,
) -> Result<Report, StoreError> {
    let template = match &document.template {
        Some(name) => read_template(w, name)?,
        None => None,
    };
    Ok(validate_document(document, template.as_ref()))
}

fn write_documents<'d>(
    w: &mut DirectoryWriter<'_, '_>,
    documents: impl Iterator<Item = &'d Document>,
) -> Result<(), StoreError> {
    let mut entries = Vec::new();
    for document in documents {
        entries.push((
            ConfigStore::document_key(&document.name),
            serde_json::to_vec(document)?,
        ));
    }
    let refs: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_slice()))
        .collect();
    w.add(&refs).map_err(StoreError::from)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::acml::{Field, FieldKind};
    use crate::dir::DirectoryStore;
    use serde_json::json;

    fn config_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("store.redb")).unwrap();
        let config = ConfigStore::new(store.root());
        (dir, config)
    }

    fn net_template() -> Template {
        let mut entries = std::collections::BTreeMap::new();
        entries.insert(
            "port".to_owned(),
            Field::new("port", FieldKind::Number)
                .with_condition("entity > 0 && entity <= 65535")
                .unwrap(),
        );
        Template::new(
            "net",
            Field::new(
                "root",
                FieldKind::Map {
                    entry: None,
                    entries,
                },
            ),
        )
        .unwrap()
    }

    fn net_document(port: i64) -> Document {
        Document::new("site.net", json!({ "port": port }))
            .unwrap()
            .with_template("net")
    }

    #[test]
    fn sound_documents_are_persisted() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        let reports = config.put_documents(&[net_document(8080)]).unwrap();
        assert!(reports.iter().all(Report::is_sound));

        let stored = config.get_documents(&["site.net"]).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body, json!({"port": 8080}));
    }

    #[test]
    fn unsound_documents_are_reported_not_written() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        let reports = config.put_documents(&[net_document(0)]).unwrap();
        assert_eq!(reports[0].violations.len(), 1);
        assert!(config.get_documents(&[]).unwrap().is_empty());
    }

    #[test]
    fn missing_template_shows_in_the_report() {
        let (_dir, config) = config_store();
        let reports = config.put_documents(&[net_document(1)]).unwrap();
        assert_eq!(reports[0].violations[0].condition, "template != undefined");
        assert!(config.get_documents(&[]).unwrap().is_empty());
    }

    #[test]
    fn patches_apply_validate_and_commit() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        config.put_documents(&[net_document(80)]).unwrap();

        let patch = Patch {
            name: "site.net".to_owned(),
            path: "port".to_owned(),
            data: Some(json!(8443)),
        };
        let reports = config.patch_documents(&[patch]).unwrap();
        assert!(reports.iter().all(Report::is_sound));
        let stored = config.get_documents(&["site.net"]).unwrap();
        assert_eq!(stored[0].body, json!({"port": 8443}));
    }

    #[test]
    fn invalid_patch_leaves_the_document_alone() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        config.put_documents(&[net_document(80)]).unwrap();

        let patch = Patch {
            name: "site.net".to_owned(),
            path: "port".to_owned(),
            data: Some(json!(-1)),
        };
        let reports = config.patch_documents(&[patch]).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_sound());
        let stored = config.get_documents(&["site.net"]).unwrap();
        assert_eq!(stored[0].body, json!({"port": 80}));
    }

    #[test]
    fn patching_a_missing_document_is_a_synthetic_violation() {
        let (_dir, config) = config_store();
        let patch = Patch {
            name: "ghost".to_owned(),
            path: String::new(),
            data: Some(json!({})),
        };
        let reports = config.patch_documents(&[patch]).unwrap();
        assert_eq!(
            reports[0].violations[0].condition,
            "DocumentExists(\"ghost\")"
        );
        assert!(config.get_documents(&[]).unwrap().is_empty());
    }

    #[test]
    fn one_bad_patch_blocks_the_whole_set() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        config.put_documents(&[net_document(80)]).unwrap();

        let good = Patch {
            name: "site.net".to_owned(),
            path: "port".to_owned(),
            data: Some(json!(90)),
        };
        let ghost = Patch {
            name: "ghost".to_owned(),
            path: String::new(),
            data: None,
        };
        let reports = config.patch_documents(&[good, ghost]).unwrap();
        assert_eq!(reports.len(), 2);
        // The good patch validated fine but the aggregate was not clean, so
        // nothing moved.
        let stored = config.get_documents(&["site.net"]).unwrap();
        assert_eq!(stored[0].body, json!({"port": 80}));
    }

    #[test]
    fn template_round_trip_through_the_bucket() {
        let (_dir, config) = config_store();
        config.put_templates(&[net_template()]).unwrap();
        let loaded = config.get_templates(&[]).unwrap();
        assert_eq!(loaded, vec![net_template()]);
        config.remove_templates(&["net"]).unwrap();
        assert!(config.get_templates(&[]).unwrap().is_empty());
    }
}
