//! File Store Module
//!
//! Durable, never-expiring file tier. Each value lives in
//! `<root>/<namespace>/P<hash>/<partition>.<ext>` as a `{data, checksum}` record,
//! and each signature's function definition in
//! `<root>/<namespace>/funcDefDir/P<hash>.txt`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::key::{CacheKey, PartitionToken};
use crate::cache::FUNC_DEF_DIR;
use crate::error::{CacheError, Result};

const SIGNATURE_DIR_PREFIX: &str = "P";
const FUNC_DEF_EXTENSION: &str = "txt";

/// On-disk wrapper of a cached value.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    data: Value,
    checksum: String,
}

/// Outcome of reading a value file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLookup {
    Found(Value),
    Absent,
    /// The file failed verification and has been deleted
    Corrupt,
}

/// Checksum of a value: SHA-256 over its canonical JSON encoding.
pub fn checksum(data: &Value) -> Result<String> {
    let encoded = serde_json::to_vec(data)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

fn write_failure(path: &Path, err: impl std::fmt::Display) -> CacheError {
    CacheError::WriteFailure(format!("{}: {}", path.display(), err))
}

fn read_failure(path: &Path, err: impl std::fmt::Display) -> CacheError {
    CacheError::Internal(format!("Failed to read {}: {}", path.display(), err))
}

// == File Store ==
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    extension: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // == Layout ==
    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    /// Directory grouping every partition of one signature.
    pub fn signature_dir(&self, namespace: &str, hash: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}{}", SIGNATURE_DIR_PREFIX, hash))
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.signature_dir(key.namespace(), key.hash())
            .join(format!("{}.{}", key.partition(), self.extension))
    }

    pub fn func_def_path(&self, namespace: &str, hash: &str) -> PathBuf {
        self.namespace_dir(namespace).join(FUNC_DEF_DIR).join(format!(
            "{}{}.{}",
            SIGNATURE_DIR_PREFIX, hash, FUNC_DEF_EXTENSION
        ))
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    // == Write ==
    /// Atomically writes a value: the record goes to a temp file in the
    /// destination directory which is then renamed over the destination.
    ///
    /// The temp file is removed on any failure.
    pub fn write(&self, key: &CacheKey, data: &Value) -> Result<()> {
        let path = self.path_for(key);
        let dir = self.signature_dir(key.namespace(), key.hash());
        fs::create_dir_all(&dir).map_err(|e| write_failure(&dir, e))?;

        let record = FileRecord {
            data: data.clone(),
            checksum: checksum(data)?,
        };
        let encoded = serde_json::to_vec(&record)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| write_failure(&path, e))?;
        temp.write_all(&encoded)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| write_failure(&path, e))?;
        temp.persist(&path).map_err(|e| write_failure(&path, e.error))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    // == Read ==
    /// Reads and verifies a value.
    ///
    /// A record that cannot be decoded or whose checksum does not match is
    /// deleted and reported as [`FileLookup::Corrupt`].
    pub fn read(&self, key: &CacheKey) -> Result<FileLookup> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileLookup::Absent),
            Err(e) => return Err(read_failure(&path, e)),
        };

        let verified = serde_json::from_slice::<FileRecord>(&bytes)
            .ok()
            .filter(|record| {
                checksum(&record.data).ok().as_deref() == Some(record.checksum.as_str())
            });

        match verified {
            Some(record) => Ok(FileLookup::Found(record.data)),
            None => {
                warn!("Incorrect checksum for {}, removing", path.display());
                self.remove(key)?;
                Ok(FileLookup::Corrupt)
            }
        }
    }

    // == Remove ==
    /// Deletes one value file, pruning its signature directory when it was the last.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let path = self.path_for(key);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(write_failure(&path, e)),
        };
        if removed && self.partitions(key.namespace(), key.hash())?.is_empty() {
            self.prune(key.namespace(), key.hash());
        }
        Ok(removed)
    }

    /// Deletes the partitions of a signature accepted by `matches`.
    ///
    /// Returns the deleted paths. Removes the signature directory and its
    /// function definition once no value file remains.
    pub fn remove_partitions<F>(
        &self,
        namespace: &str,
        hash: &str,
        matches: F,
    ) -> Result<Vec<PathBuf>>
    where
        F: Fn(&PartitionToken) -> bool,
    {
        let dir = self.signature_dir(namespace, hash);
        let mut deleted = Vec::new();
        let mut remaining = 0usize;

        for partition in self.partitions(namespace, hash)? {
            if !matches(&partition) {
                remaining += 1;
                continue;
            }
            let path = dir.join(format!("{}.{}", partition, self.extension));
            match fs::remove_file(&path) {
                Ok(()) => deleted.push(path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Cannot delete {}: {}", path.display(), e);
                    remaining += 1;
                }
            }
        }

        if remaining == 0 {
            self.prune(namespace, hash);
        }
        Ok(deleted)
    }

    /// Removes an empty signature directory and its function definition.
    ///
    /// A directory that is not empty (a concurrent write is in flight) is left alone.
    fn prune(&self, namespace: &str, hash: &str) -> bool {
        let dir = self.signature_dir(namespace, hash);
        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                debug!("Keeping {}: {}", dir.display(), e);
                return false;
            }
        }
        let def = self.func_def_path(namespace, hash);
        if let Err(e) = fs::remove_file(&def) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cannot delete {}: {}", def.display(), e);
            }
        }
        true
    }

    // == Listing ==
    /// Hashes of every signature directory in the namespace.
    pub fn signature_hashes(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.namespace_dir(namespace);
        let mut hashes: Vec<String> = read_dir_names(&dir)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .filter_map(|(name, _)| name.strip_prefix(SIGNATURE_DIR_PREFIX).map(str::to_string))
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    /// Partition tokens stored for a signature, in chronological order.
    pub fn partitions(&self, namespace: &str, hash: &str) -> Result<Vec<PartitionToken>> {
        let suffix = format!(".{}", self.extension);
        let mut partitions: Vec<PartitionToken> =
            read_dir_names(&self.signature_dir(namespace, hash))?
                .into_iter()
                .filter(|(_, is_dir)| !*is_dir)
                .filter_map(|(name, _)| {
                    name.strip_suffix(&suffix)
                        .and_then(PartitionToken::from_token)
                })
                .collect();
        partitions.sort();
        Ok(partitions)
    }

    // == Function Definitions ==
    /// Writes the function-definition record of a signature unless it exists.
    ///
    /// Returns true when the record was created.
    pub fn ensure_function_def(&self, namespace: &str, hash: &str, record: &str) -> Result<bool> {
        let path = self.func_def_path(namespace, hash);
        if path.is_file() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_failure(parent, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(write_failure(&path, e)),
        };
        file.write_all(record.as_bytes())
            .map_err(|e| write_failure(&path, e))?;
        Ok(true)
    }

    pub fn function_def(&self, namespace: &str, hash: &str) -> Result<Option<String>> {
        let path = self.func_def_path(namespace, hash);
        match fs::read_to_string(&path) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_failure(&path, e)),
        }
    }

    /// Every `(hash, record)` function definition of the namespace, sorted by hash.
    pub fn function_defs(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let dir = self.namespace_dir(namespace).join(FUNC_DEF_DIR);
        let suffix = format!(".{}", FUNC_DEF_EXTENSION);
        let mut defs = Vec::new();

        for (name, is_dir) in read_dir_names(&dir)? {
            let hash = name
                .strip_prefix(SIGNATURE_DIR_PREFIX)
                .and_then(|rest| rest.strip_suffix(&suffix));
            if let (Some(hash), false) = (hash, is_dir) {
                if let Some(record) = self.function_def(namespace, hash)? {
                    defs.push((hash.to_string(), record));
                }
            }
        }
        defs.sort();
        Ok(defs)
    }
}

/// Names of the entries of `dir` with a directory flag; a missing directory is empty.
fn read_dir_names(dir: &Path) -> Result<Vec<(String, bool)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_failure(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| read_failure(dir, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if let Ok(name) = entry.file_name().into_string() {
            names.push((name, is_dir));
        }
    }
    Ok(names)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{CallArgs, KeyCodec};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), "json");
        (dir, store)
    }

    fn key(as_of: Option<&str>) -> CacheKey {
        let mut args = CallArgs::new().arg("a", 10);
        if let Some(date) = as_of {
            args = args.arg("as_of", date);
        }
        KeyCodec::new("ns", "as_of").derive("f", &args).unwrap().key
    }

    #[test]
    fn test_path_layout() {
        let (dir, store) = setup();
        let key = key(Some("2020-01-01"));

        let expected = dir
            .path()
            .join("ns")
            .join(format!("P{}", key.hash()))
            .join("20200101_0000.json");
        assert_eq!(store.path_for(&key), expected);
        assert_eq!(
            store.func_def_path("ns", key.hash()),
            dir.path()
                .join("ns")
                .join("funcDefDir")
                .join(format!("P{}.txt", key.hash()))
        );
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, store) = setup();
        let key = key(None);
        let value = json!({"prices": [1.5, 2.25], "name": "x"});

        assert!(!store.exists(&key));
        store.write(&key, &value).unwrap();

        assert!(store.exists(&key));
        assert_eq!(store.read(&key).unwrap(), FileLookup::Found(value));
    }

    #[test]
    fn test_read_absent() {
        let (_dir, store) = setup();
        assert_eq!(store.read(&key(None)).unwrap(), FileLookup::Absent);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let (_dir, store) = setup();
        let key = key(None);

        store.write(&key, &json!(1)).unwrap();
        store.write(&key, &json!(2)).unwrap();

        let names = read_dir_names(&store.signature_dir("ns", key.hash())).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(store.read(&key).unwrap(), FileLookup::Found(json!(2)));
    }

    #[test]
    fn test_failed_write_leaves_no_temp_files() {
        let (_dir, store) = setup();
        let key = key(None);

        // A non-empty directory where the value file belongs makes the rename fail
        let path = store.path_for(&key);
        fs::create_dir_all(path.join("blocker")).unwrap();

        let result = store.write(&key, &json!(1));
        assert!(matches!(result, Err(CacheError::WriteFailure(_))));

        let names = read_dir_names(&store.signature_dir("ns", key.hash())).unwrap();
        assert_eq!(names, vec![("0.json".to_string(), true)]);
    }

    #[test]
    fn test_concurrent_writes_are_never_torn() {
        let (_dir, store) = setup();
        let key = key(None);
        let values: Vec<Value> = (0..4)
            .map(|i| json!({"writer": i, "pad": "x".repeat(4096)}))
            .collect();
        store.write(&key, &values[0]).unwrap();

        std::thread::scope(|scope| {
            for value in &values {
                let (store, key) = (&store, &key);
                scope.spawn(move || {
                    for _ in 0..25 {
                        store.write(key, value).unwrap();
                    }
                });
            }
            for _ in 0..2 {
                let (store, key, values) = (&store, &key, &values);
                scope.spawn(move || {
                    for _ in 0..100 {
                        match store.read(key).unwrap() {
                            FileLookup::Found(found) => assert!(values.contains(&found)),
                            other => panic!("unexpected read {:?}", other),
                        }
                    }
                });
            }
        });

        let names = read_dir_names(&store.signature_dir("ns", key.hash())).unwrap();
        assert_eq!(names.len(), 1);
        assert!(matches!(store.read(&key).unwrap(), FileLookup::Found(v) if values.contains(&v)));
    }

    #[test]
    fn test_corrupted_data_is_removed() {
        let (_dir, store) = setup();
        let key = key(None);
        store.write(&key, &json!("hello world")).unwrap();

        let path = store.path_for(&key);
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("hello", "jello");
        fs::write(&path, tampered).unwrap();

        assert_eq!(store.read(&key).unwrap(), FileLookup::Corrupt);
        assert!(!path.exists());
        assert_eq!(store.read(&key).unwrap(), FileLookup::Absent);
    }

    #[test]
    fn test_truncated_record_is_removed() {
        let (_dir, store) = setup();
        let key = key(None);
        store.write(&key, &json!([1, 2, 3])).unwrap();

        let path = store.path_for(&key);
        fs::write(&path, b"{\"data\": [1, 2").unwrap();

        assert_eq!(store.read(&key).unwrap(), FileLookup::Corrupt);
        assert!(!path.exists());
    }

    #[test]
    fn test_function_def_created_once() {
        let (_dir, store) = setup();

        assert!(store.ensure_function_def("ns", "ab12", "f{\"a\":1}").unwrap());
        assert!(!store.ensure_function_def("ns", "ab12", "other").unwrap());
        assert_eq!(
            store.function_def("ns", "ab12").unwrap().as_deref(),
            Some("f{\"a\":1}")
        );
        assert_eq!(
            store.function_defs("ns").unwrap(),
            vec![("ab12".to_string(), "f{\"a\":1}".to_string())]
        );
    }

    #[test]
    fn test_remove_partitions_prunes_directory() {
        let (_dir, store) = setup();
        let jan = key(Some("2020-01-01"));
        let feb = key(Some("2020-02-01"));
        store.ensure_function_def("ns", jan.hash(), "f{\"a\":10}").unwrap();
        store.write(&jan, &json!(1)).unwrap();
        store.write(&feb, &json!(2)).unwrap();

        assert_eq!(store.signature_hashes("ns").unwrap(), vec![jan.hash().to_string()]);
        assert_eq!(store.partitions("ns", jan.hash()).unwrap().len(), 2);

        let deleted = store
            .remove_partitions("ns", jan.hash(), |p| p.as_str() < "20200115_0000")
            .unwrap();
        assert_eq!(deleted, vec![store.path_for(&jan)]);
        assert!(store.signature_dir("ns", jan.hash()).exists());

        let deleted = store.remove_partitions("ns", jan.hash(), |_| true).unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(!store.signature_dir("ns", jan.hash()).exists());
        assert!(store.function_def("ns", jan.hash()).unwrap().is_none());
        assert!(store.signature_hashes("ns").unwrap().is_empty());
    }

    #[test]
    fn test_remove_single_key() {
        let (_dir, store) = setup();
        let key = key(None);
        store.write(&key, &json!(true)).unwrap();

        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert!(!store.signature_dir("ns", key.hash()).exists());
    }

    #[test]
    fn test_checksum_is_stable() {
        let value = json!({"b": 1, "a": [true, null]});
        assert_eq!(checksum(&value).unwrap(), checksum(&value.clone()).unwrap());
        assert_ne!(checksum(&value).unwrap(), checksum(&json!(1)).unwrap());
    }
}
