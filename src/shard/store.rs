//! Document store backing one shard
//!
//! Collections live in memory, keyed by `database/collection`. A
//! [`CollectionBackend`] (sled, with the `sled-backend` feature) receives
//! every mutation before it becomes visible and is read back on open.

use crate::common::{structural_eq, Error, Result};
use crate::shard::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// One staged insert inside a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOp {
    pub collection: String,
    pub document: Document,
}

/// Durable copy of the collections.
///
/// `write` receives every collection a mutation touched, in full, and must
/// apply them as one unit.
pub trait CollectionBackend: Send + Sync {
    fn write(&self, updates: &[(String, Vec<Document>)]) -> Result<()>;
}

/// Sled tree holding one JSON array per collection key
#[cfg(feature = "sled-backend")]
pub struct SledBackend {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledBackend {
    /// Open the tree and read back every stored collection.
    pub fn open(
        path: impl AsRef<std::path::Path>,
    ) -> Result<(Self, HashMap<String, Vec<Document>>)> {
        let db = sled::open(path)?;
        let mut collections = HashMap::new();
        for item in db.iter() {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| Error::Internal("collection key is not UTF-8".into()))?;
            let docs: Vec<Document> = serde_json::from_slice(&value)?;
            collections.insert(key, docs);
        }
        Ok((Self { db }, collections))
    }
}

#[cfg(feature = "sled-backend")]
impl CollectionBackend for SledBackend {
    fn write(&self, updates: &[(String, Vec<Document>)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, docs) in updates {
            batch.insert(key.as_bytes(), serde_json::to_vec(docs)?);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}

pub struct DocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    backend: Option<Box<dyn CollectionBackend>>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new_memory()
    }
}

/// A document matches when every filter field is structurally equal to the
/// document's field of the same name.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(k, v)| doc.get(k).is_some_and(|dv| structural_eq(dv, v)))
}

/// Give the document an `_id` if it lacks one.
pub fn ensure_id(doc: &mut Document) {
    if !doc.contains_key("_id") {
        doc.insert(
            "_id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
}

fn collection_key(database: &str, collection: &str) -> Result<String> {
    if database.is_empty() || collection.is_empty() {
        return Err(Error::InvalidConfig(
            "database and collection names must be non-empty".into(),
        ));
    }
    if database.contains('/') || collection.contains('/') {
        return Err(Error::InvalidConfig(format!(
            "names may not contain '/': {}/{}",
            database, collection
        )));
    }
    Ok(format!("{}/{}", database, collection))
}

impl DocumentStore {
    pub fn new_memory() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            backend: None,
        }
    }

    /// Store over an existing backend and the collections it already holds.
    pub fn with_backend(
        backend: Box<dyn CollectionBackend>,
        collections: HashMap<String, Vec<Document>>,
    ) -> Self {
        Self {
            collections: Mutex::new(collections),
            backend: Some(backend),
        }
    }

    /// Open a sled-backed store, loading every persisted collection.
    #[cfg(feature = "sled-backend")]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let (backend, collections) = SledBackend::open(path)?;
        tracing::info!("Loaded {} collections from disk", collections.len());
        Ok(Self::with_backend(Box::new(backend), collections))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Document>>>> {
        self.collections
            .lock()
            .map_err(|_| Error::Internal("document store lock poisoned".into()))
    }

    /// Persist the new collection contents, then make them visible. Nothing
    /// changes in memory if the backend refuses the write.
    fn publish(
        &self,
        collections: &mut HashMap<String, Vec<Document>>,
        updates: Vec<(String, Vec<Document>)>,
    ) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.write(&updates)?;
        }
        collections.extend(updates);
        Ok(())
    }

    pub fn find(&self, database: &str, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let key = collection_key(database, collection)?;
        let collections = self.lock()?;
        Ok(collections
            .get(&key)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Apply a batch of inserts atomically: either all become visible or none.
    pub fn commit(&self, database: &str, ops: Vec<InsertOp>) -> Result<usize> {
        let mut staged: Vec<(String, Document)> = Vec::with_capacity(ops.len());
        for mut op in ops {
            let key = collection_key(database, &op.collection)?;
            ensure_id(&mut op.document);
            staged.push((key, op.document));
        }

        let count = staged.len();
        let mut collections = self.lock()?;
        let mut updates: Vec<(String, Vec<Document>)> = Vec::new();
        for (key, doc) in staged {
            match updates.iter_mut().find(|(k, _)| *k == key) {
                Some((_, docs)) => docs.push(doc),
                None => {
                    let mut docs = collections.get(&key).cloned().unwrap_or_default();
                    docs.push(doc);
                    updates.push((key, docs));
                }
            }
        }
        self.publish(&mut collections, updates)?;
        Ok(count)
    }

    /// Atomically add `step` to a numeric field of the first matching document
    /// and return the document as it was before the change.
    ///
    /// When nothing matches and `upsert_initial` is set, a document built from
    /// the filter is created with `field = upsert_initial` and `None` is
    /// returned.
    pub fn increment(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        field: &str,
        step: i64,
        upsert_initial: Option<i64>,
    ) -> Result<Option<Document>> {
        let key = collection_key(database, collection)?;
        let mut collections = self.lock()?;
        let mut docs = collections.get(&key).cloned().unwrap_or_default();

        if let Some(doc) = docs.iter_mut().find(|d| matches_filter(d, filter)) {
            let before = doc.clone();
            let current = match doc.get(field) {
                None | Some(Value::Null) => 0,
                Some(v) => v.as_i64().ok_or_else(|| {
                    Error::Internal(format!("field {} is not an integer", field))
                })?,
            };
            let next = current
                .checked_add(step)
                .ok_or_else(|| Error::Internal(format!("field {} overflowed", field)))?;
            doc.insert(field.to_string(), Value::from(next));
            self.publish(&mut collections, vec![(key, docs)])?;
            return Ok(Some(before));
        }

        if let Some(initial) = upsert_initial {
            let mut doc = filter.clone();
            doc.insert(field.to_string(), Value::from(initial));
            ensure_id(&mut doc);
            docs.push(doc);
            self.publish(&mut collections, vec![(key, docs)])?;
        }
        Ok(None)
    }

    pub fn len(&self, database: &str, collection: &str) -> usize {
        let Ok(key) = collection_key(database, collection) else {
            return 0;
        };
        self.lock()
            .map(|c| c.get(&key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, database: &str, collection: &str) -> bool {
        self.len(database, collection) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_commit_and_find() {
        let store = DocumentStore::new_memory();
        let ops = vec![
            InsertOp {
                collection: "videos".into(),
                document: doc(json!({"title": "a", "views": 1})),
            },
            InsertOp {
                collection: "videos".into(),
                document: doc(json!({"title": "b", "views": 1})),
            },
        ];
        assert_eq!(store.commit("db", ops).unwrap(), 2);

        let all = store.find("db", "videos", &Document::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|d| d.contains_key("_id")));

        let one = store.find("db", "videos", &doc(json!({"title": "b"}))).unwrap();
        assert_eq!(one.len(), 1);
        assert!(store.find("other", "videos", &Document::new()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_rejects_whole_batch_on_bad_name() {
        let store = DocumentStore::new_memory();
        let ops = vec![
            InsertOp {
                collection: "ok".into(),
                document: doc(json!({"n": 1})),
            },
            InsertOp {
                collection: "bad/name".into(),
                document: doc(json!({"n": 2})),
            },
        ];
        assert!(store.commit("db", ops).is_err());
        assert!(store.is_empty("db", "ok"));
    }

    #[test]
    fn test_increment_returns_pre_image() {
        let store = DocumentStore::new_memory();
        store
            .commit(
                "db",
                vec![InsertOp {
                    collection: "videos".into(),
                    document: doc(json!({"_id": "v1", "likes": 10})),
                }],
            )
            .unwrap();

        let filter = doc(json!({"_id": "v1"}));
        let before = store
            .increment("db", "videos", &filter, "likes", -3, None)
            .unwrap()
            .unwrap();
        assert_eq!(before.get("likes").unwrap(), 10);

        let now = store.find("db", "videos", &filter).unwrap();
        assert_eq!(now[0].get("likes").unwrap(), 7);
    }

    #[test]
    fn test_increment_missing_field_starts_at_zero() {
        let store = DocumentStore::new_memory();
        store
            .commit(
                "db",
                vec![InsertOp {
                    collection: "c".into(),
                    document: doc(json!({"_id": "x"})),
                }],
            )
            .unwrap();
        let filter = doc(json!({"_id": "x"}));
        store.increment("db", "c", &filter, "n", 5, None).unwrap();
        assert_eq!(store.find("db", "c", &filter).unwrap()[0].get("n").unwrap(), 5);
    }

    #[test]
    fn test_increment_upsert() {
        let store = DocumentStore::new_memory();
        let filter = doc(json!({"id": "video"}));

        assert!(store
            .increment("db", "sequences", &filter, "value", 1, None)
            .unwrap()
            .is_none());
        assert!(store.is_empty("db", "sequences"));

        assert!(store
            .increment("db", "sequences", &filter, "value", 1, Some(100))
            .unwrap()
            .is_none());
        let created = store.find("db", "sequences", &filter).unwrap();
        assert_eq!(created[0].get("value").unwrap(), 100);
    }

    #[test]
    fn test_increment_rejects_non_numeric_field() {
        let store = DocumentStore::new_memory();
        store
            .commit(
                "db",
                vec![InsertOp {
                    collection: "c".into(),
                    document: doc(json!({"_id": "x", "n": "three"})),
                }],
            )
            .unwrap();
        let filter = doc(json!({"_id": "x"}));
        assert!(store.increment("db", "c", &filter, "n", 1, None).is_err());
    }

    /// Backend that refuses every write after the first `accept` ones.
    struct FlakyBackend {
        accept: std::sync::atomic::AtomicUsize,
    }

    impl CollectionBackend for FlakyBackend {
        fn write(&self, _updates: &[(String, Vec<Document>)]) -> Result<()> {
            use std::sync::atomic::Ordering;
            if self
                .accept
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Ok(())
            } else {
                Err(Error::Internal("disk full".into()))
            }
        }
    }

    fn flaky(accept: usize) -> DocumentStore {
        DocumentStore::with_backend(
            Box::new(FlakyBackend {
                accept: std::sync::atomic::AtomicUsize::new(accept),
            }),
            HashMap::new(),
        )
    }

    #[test]
    fn test_failed_persist_leaves_commit_invisible() {
        let store = flaky(0);
        let ops = vec![
            InsertOp {
                collection: "videos".into(),
                document: doc(json!({"title": "a"})),
            },
            InsertOp {
                collection: "comments".into(),
                document: doc(json!({"text": "b"})),
            },
        ];
        assert!(store.commit("db", ops).is_err());
        assert!(store.is_empty("db", "videos"));
        assert!(store.is_empty("db", "comments"));
    }

    #[test]
    fn test_failed_persist_leaves_counter_unchanged() {
        let store = flaky(1);
        let filter = doc(json!({"id": "video"}));
        store
            .increment("db", "sequences", &filter, "value", 1, Some(100))
            .unwrap();

        assert!(store
            .increment("db", "sequences", &filter, "value", 1, Some(100))
            .is_err());
        let now = store.find("db", "sequences", &filter).unwrap();
        assert_eq!(now[0].get("value").unwrap(), 100);

        let other = doc(json!({"id": "room"}));
        assert!(store
            .increment("db", "sequences", &other, "value", 1, Some(1))
            .is_err());
        assert!(store.find("db", "sequences", &other).unwrap().is_empty());
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_sled_persistence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DocumentStore::open(dir.path()).unwrap();
            store
                .commit(
                    "db",
                    vec![InsertOp {
                        collection: "c".into(),
                        document: doc(json!({"_id": "x", "n": 1})),
                    }],
                )
                .unwrap();
        }
        let store = DocumentStore::open(dir.path()).unwrap();
        assert_eq!(store.len("db", "c"), 1);
    }
}
