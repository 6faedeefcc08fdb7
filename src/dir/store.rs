use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use log::trace;
use redb::{ReadableTable, TableDefinition};

use super::path;
use super::{Directory, DirectoryError, Engine, Transform};

/// The single named sub-database: raw path bytes to raw value bytes.
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Default cache budget, two gibibytes.
const DEFAULT_CACHE_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Root handle over the embedded key/value engine.
///
/// The engine is single-writer with MVCC snapshots: any number of read
/// transactions see the last commit while at most one write transaction is
/// open. [`DirectoryStore::close`] shuts the engine down for every view
/// that was handed out, not just for the root.
pub struct DirectoryStore {
    engine: Rc<Engine>,
}

impl DirectoryStore {
    /// Open or create the database file with the default cache budget.
    pub fn open(file: impl AsRef<Path>) -> Result<DirectoryStore, DirectoryError> {
        DirectoryStore::open_with_cache(file, DEFAULT_CACHE_SIZE)
    }

    pub fn open_with_cache(
        file: impl AsRef<Path>,
        cache_size: usize,
    ) -> Result<DirectoryStore, DirectoryError> {
        let db = redb::Builder::new()
            .set_cache_size(cache_size)
            .create(file.as_ref())?;
        // Make sure the table exists so read transactions can open it.
        let txn = db.begin_write()?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;
        trace!("directory store open at {:?}", file.as_ref());
        Ok(DirectoryStore {
            engine: Rc::new(Engine {
                db: RefCell::new(Some(db)),
            }),
        })
    }

    /// The view over the whole key space.
    pub fn root(&self) -> Directory {
        Directory {
            engine: self.engine.clone(),
            prefix: String::new(),
            read_transform: None,
            write_transform: None,
        }
    }

    /// Close the engine. Outstanding views stay around but every
    /// transaction they start from now on fails with
    /// [`DirectoryError::Closed`].
    pub fn close(self) {
        self.engine.db.borrow_mut().take();
        trace!("directory store closed");
    }
}

impl Directory {
    /// A sub-view rooted at `prefix` within this view.
    pub fn enter(&self, prefix: &str) -> Directory {
        let normalized = path::normalize(prefix);
        let trimmed = normalized.trim_end_matches('.');
        Directory {
            engine: self.engine.clone(),
            prefix: format!("{}{}", self.prefix, trimmed),
            read_transform: self.read_transform.clone(),
            write_transform: self.write_transform.clone(),
        }
    }

    /// A view applying `read` to every listed value and `write` to every
    /// added value. Transforms compose: the innermost write transform runs
    /// last, mirroring the read side.
    pub fn map(&self, read: Transform, write: Transform) -> Directory {
        let read_transform = match &self.read_transform {
            Some(inner) => {
                let inner = inner.clone();
                Some(Rc::new(move |value: &[u8]| read(&inner(value)?)) as Transform)
            }
            None => Some(read),
        };
        let write_transform = match &self.write_transform {
            Some(inner) => {
                let inner = inner.clone();
                Some(Rc::new(move |value: &[u8]| inner(&write(value)?)) as Transform)
            }
            None => Some(write),
        };
        Directory {
            engine: self.engine.clone(),
            prefix: self.prefix.clone(),
            read_transform,
            write_transform,
        }
    }

    /// Run `f` inside a read-only transaction; the snapshot is released
    /// when `f` returns.
    pub fn read<T, E: From<DirectoryError>>(
        &self,
        f: impl FnOnce(&DirectoryReader<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let engine = self.engine.db.borrow();
        let db = engine.as_ref().ok_or(DirectoryError::Closed)?;
        let txn = db.begin_read().map_err(DirectoryError::from)?;
        let table = txn.open_table(ENTRIES).map_err(DirectoryError::from)?;
        let reader = DirectoryReader {
            table: &table,
            prefix: &self.prefix,
            read_transform: &self.read_transform,
        };
        f(&reader)
    }

    /// Run `f` inside a read/write transaction, committing iff `f`
    /// succeeds and aborting otherwise.
    pub fn write<T, E: From<DirectoryError>>(
        &self,
        f: impl FnOnce(&mut DirectoryWriter<'_, '_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let engine = self.engine.db.borrow();
        let db = engine.as_ref().ok_or(DirectoryError::Closed)?;
        let txn = db.begin_write().map_err(DirectoryError::from)?;
        let result = {
            let table = txn.open_table(ENTRIES).map_err(DirectoryError::from)?;
            let mut writer = DirectoryWriter {
                table,
                prefix: &self.prefix,
                read_transform: &self.read_transform,
                write_transform: &self.write_transform,
            };
            f(&mut writer)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(DirectoryError::from)?;
                Ok(value)
            }
            Err(err) => {
                txn.abort().map_err(DirectoryError::from)?;
                Err(err)
            }
        }
    }
}

/// Read handle scoped to one transaction.
pub struct DirectoryReader<'t> {
    table: &'t redb::ReadOnlyTable<&'static [u8], &'static [u8]>,
    prefix: &'t str,
    read_transform: &'t Option<Transform>,
}

impl DirectoryReader<'_> {
    /// Every stored entry matched by any of `paths`, in lexical key order,
    /// without duplicates. A folder path matches by prefix, a file path
    /// exactly; no paths at all matches everything.
    pub fn list(&self, paths: &[&str]) -> Result<Vec<(String, Vec<u8>)>, DirectoryError> {
        list_in(self.table, self.prefix, paths, self.read_transform)
    }
}

/// Write handle scoped to one transaction. Mutations are visible to later
/// operations on the same handle in program order.
pub struct DirectoryWriter<'t, 's> {
    table: redb::Table<'t, &'static [u8], &'static [u8]>,
    prefix: &'s str,
    read_transform: &'s Option<Transform>,
    write_transform: &'s Option<Transform>,
}

impl DirectoryWriter<'_, '_> {
    pub fn list(&self, paths: &[&str]) -> Result<Vec<(String, Vec<u8>)>, DirectoryError> {
        list_in(&self.table, self.prefix, paths, self.read_transform)
    }

    /// Insert or replace entries. Every path must be fully qualified or the
    /// whole call fails without touching anything.
    pub fn add(&mut self, entries: &[(&str, &[u8])]) -> Result<(), DirectoryError> {
        for (entry_path, _) in entries {
            let normalized = path::normalize(entry_path);
            if path::is_folder(&normalized) {
                return Err(DirectoryError::PathNotFullyQualified(normalized));
            }
        }
        for (entry_path, value) in entries {
            let key = path::join(self.prefix, &path::normalize(entry_path));
            let value = match self.write_transform {
                Some(transform) => transform(value)?,
                None => value.to_vec(),
            };
            self.table.insert(key.as_bytes(), value.as_slice())?;
        }
        Ok(())
    }

    /// Delete entries by the same matching rules as `list`.
    pub fn remove(&mut self, paths: &[&str]) -> Result<(), DirectoryError> {
        let doomed = list_keys(&self.table, self.prefix, paths)?;
        for key in doomed {
            self.table.remove(key.as_slice())?;
        }
        Ok(())
    }
}

fn list_in<T: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &T,
    prefix: &str,
    paths: &[&str],
    transform: &Option<Transform>,
) -> Result<Vec<(String, Vec<u8>)>, DirectoryError> {
    // A sorted map both orders the result lexically and coalesces entries
    // matched by overlapping paths.
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for scan in scans(prefix, paths) {
        match scan {
            Scan::Exact(key) => {
                if let Some(value) = table.get(key.as_bytes())? {
                    entries.insert(relative(prefix, &key), value.value().to_vec());
                }
            }
            Scan::Prefix(from) => {
                let to = path::scan_end(&from);
                for entry in table.range::<&[u8]>(from.as_bytes()..to.as_slice())? {
                    let (key, value) = entry?;
                    let key = String::from_utf8_lossy(key.value()).into_owned();
                    entries.insert(relative(prefix, &key), value.value().to_vec());
                }
            }
        }
    }
    let mut listed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let value = match transform {
            Some(transform) => transform(&value)?,
            None => value,
        };
        listed.push((key, value));
    }
    Ok(listed)
}

fn list_keys<T: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &T,
    prefix: &str,
    paths: &[&str],
) -> Result<Vec<Vec<u8>>, DirectoryError> {
    let mut keys: Vec<Vec<u8>> = Vec::new();
    for scan in scans(prefix, paths) {
        match scan {
            Scan::Exact(key) => {
                if table.get(key.as_bytes())?.is_some() {
                    keys.push(key.into_bytes());
                }
            }
            Scan::Prefix(from) => {
                let to = path::scan_end(&from);
                for entry in table.range::<&[u8]>(from.as_bytes()..to.as_slice())? {
                    let (key, _) = entry?;
                    keys.push(key.value().to_vec());
                }
            }
        }
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

enum Scan {
    Exact(String),
    Prefix(String),
}

/// Turn caller paths into key-space scans under the view prefix. No paths,
/// or an empty path, means the whole view.
fn scans(prefix: &str, paths: &[&str]) -> Vec<Scan> {
    if paths.is_empty() {
        return vec![Scan::Prefix(format!("{}.", prefix))];
    }
    paths
        .iter()
        .map(|p| {
            let normalized = path::normalize(p);
            let key = path::join(prefix, &normalized);
            if path::is_folder(&normalized) {
                Scan::Prefix(key)
            } else {
                Scan::Exact(key)
            }
        })
        .collect()
}

/// Strip the view prefix from an absolute key.
fn relative(prefix: &str, key: &str) -> String {
    key.strip_prefix(prefix).unwrap_or(key).to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (tempfile::TempDir, DirectoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("entries.redb")).unwrap();
        (dir, store)
    }

    fn seed(root: &Directory) {
        root.write(|w| {
            w.add(&[
                (".t.a", b"A".as_slice()),
                (".t.b", b"B".as_slice()),
                (".t.a.x", b"AX".as_slice()),
                (".d.one", b"1".as_slice()),
            ])
        })
        .unwrap();
    }

    #[test]
    fn exact_and_prefix_listing() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);

        let exact = root.read(|r| r.list(&[".t.a"])).unwrap();
        assert_eq!(exact, vec![(".t.a".to_owned(), b"A".to_vec())]);

        let folder = root.read(|r| r.list(&[".t."])).unwrap();
        let keys: Vec<&str> = folder.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![".t.a", ".t.a.x", ".t.b"]);
    }

    #[test]
    fn overlapping_paths_coalesce() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);

        let listed = root.read(|r| r.list(&[".t.", ".t.a", ".t.a."])).unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![".t.a", ".t.a.x", ".t.b"]);
    }

    #[test]
    fn no_paths_matches_everything() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);

        let listed = root.read(|r| r.list(&[])).unwrap();
        assert_eq!(listed.len(), 4);
        let all = root.read(|r| r.list(&["."])).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn folder_keys_are_rejected_on_add() {
        let (_dir, store) = store();
        let root = store.root();
        let err = root
            .write(|w| w.add(&[(".t.a.", b"A".as_slice())]))
            .unwrap_err();
        assert!(matches!(err, DirectoryError::PathNotFullyQualified(_)));
        // Nothing was written.
        assert!(root.read(|r| r.list(&[])).unwrap().is_empty());
    }

    #[test]
    fn failed_write_transaction_aborts() {
        let (_dir, store) = store();
        let root = store.root();
        let err = root.write(|w| {
            w.add(&[(".t.a", b"A".as_slice())])?;
            Err::<(), _>(DirectoryError::Other("validation failed".to_owned()))
        });
        assert!(err.is_err());
        assert!(root.read(|r| r.list(&[])).unwrap().is_empty());
    }

    #[test]
    fn writes_observe_program_order() {
        let (_dir, store) = store();
        let root = store.root();
        root.write(|w| {
            w.add(&[(".a", b"1".as_slice())])?;
            assert_eq!(w.list(&[".a"])?.len(), 1);
            w.remove(&[".a"])?;
            assert!(w.list(&[".a"])?.is_empty());
            w.add(&[(".a", b"2".as_slice())])
        })
        .unwrap();
        let listed = root.read(|r| r.list(&[".a"])).unwrap();
        assert_eq!(listed[0].1, b"2".to_vec());
    }

    #[test]
    fn remove_by_folder() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);
        root.write(|w| w.remove(&[".t."])).unwrap();
        let listed = root.read(|r| r.list(&[])).unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![".d.one"]);
    }

    #[test]
    fn views_window_the_key_space() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);

        let templates = root.enter(".t");
        let listed = templates.read(|r| r.list(&[])).unwrap();
        let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![".a", ".a.x", ".b"]);

        templates
            .write(|w| w.add(&[(".c", b"C".as_slice())]))
            .unwrap();
        let absolute = root.read(|r| r.list(&[".t.c"])).unwrap();
        assert_eq!(absolute[0].1, b"C".to_vec());
    }

    #[test]
    fn closing_the_root_fails_outstanding_views() {
        let (_dir, store) = store();
        let root = store.root();
        let templates = root.enter(".t");
        seed(&root);

        store.close();

        let err = root.read(|r| r.list(&[])).unwrap_err();
        assert!(matches!(err, DirectoryError::Closed));
        let err = templates
            .write(|w| w.add(&[(".x", b"X".as_slice())]))
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Closed));
    }

    #[test]
    fn closing_a_view_closes_nothing() {
        let (_dir, store) = store();
        let root = store.root();
        seed(&root);
        {
            let _templates = root.enter(".t");
            // The view goes out of scope here.
        }
        assert_eq!(root.read(|r| r.list(&[])).unwrap().len(), 4);
    }

    #[test]
    fn transform_views_round_trip() {
        let (_dir, store) = store();
        let root = store.root();
        let flipped = root.map(
            Rc::new(|value: &[u8]| Ok(value.iter().map(|b| !b).collect())),
            Rc::new(|value: &[u8]| Ok(value.iter().map(|b| !b).collect())),
        );
        flipped
            .write(|w| w.add(&[(".x", b"payload".as_slice())]))
            .unwrap();

        // The raw store sees transformed bytes...
        let raw = root.read(|r| r.list(&[".x"])).unwrap();
        assert_ne!(raw[0].1, b"payload".to_vec());
        // ...while the view reads back the original.
        let seen = flipped.read(|r| r.list(&[".x"])).unwrap();
        assert_eq!(seen[0].1, b"payload".to_vec());
    }
}
