//! In-memory collections, indexes and open cursors behind the memory server.

use bson::{Bson, Document, doc};
use rand::Rng;
use std::collections::{HashMap, VecDeque};

use super::matcher::{Filter, compare_docs, get_path, project, values_equal};
use super::update::{apply_update, upsert_document};
use crate::errors::DUPLICATE_KEY;

pub const BAD_VALUE: i32 = 2;
pub const NAMESPACE_NOT_FOUND: i32 = 26;
pub const CURSOR_NOT_FOUND: i32 = 43;
pub const IMMUTABLE_FIELD: i32 = 66;
pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
const ID_INDEX: &str = "_id_";

/// A server-side failure: code plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: i32,
    pub message: String,
}

impl StoreError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    #[must_use]
    pub const fn code_name(&self) -> &'static str {
        match self.code {
            BAD_VALUE => "BadValue",
            NAMESPACE_NOT_FOUND => "NamespaceNotFound",
            CURSOR_NOT_FOUND => "CursorNotFound",
            IMMUTABLE_FIELD => "ImmutableField",
            INDEX_OPTIONS_CONFLICT => "IndexOptionsConflict",
            DUPLICATE_KEY => "DuplicateKey",
            _ => "UnknownError",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub key: Document,
    pub unique: bool,
}

impl IndexSpec {
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut d = doc! { "v": 2, "key": self.key.clone(), "name": self.name.as_str() };
        if self.unique && self.name != ID_INDEX {
            d.insert("unique", true);
        }
        d
    }

    fn key_values(&self, doc: &Document) -> Vec<Bson> {
        self.key.keys().map(|k| get_path(doc, k).cloned().unwrap_or(Bson::Null)).collect()
    }
}

#[derive(Debug)]
struct Collection {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            docs: Vec::new(),
            indexes: vec![IndexSpec { name: ID_INDEX.into(), key: doc! { "_id": 1 }, unique: true }],
        }
    }
}

impl Collection {
    // First unique index on which `candidate` collides with a stored document
    // other than the one at `skip`.
    fn conflict(&self, ns: &str, candidate: &Document, skip: Option<usize>) -> Option<StoreError> {
        self.indexes.iter().filter(|i| i.unique).find_map(|index| {
            let wanted = index.key_values(candidate);
            let clash = self
                .docs
                .iter()
                .enumerate()
                .any(|(pos, existing)| Some(pos) != skip && same_key(&index.key_values(existing), &wanted));
            clash.then(|| duplicate_key(ns, index, wanted))
        })
    }
}

fn same_key(a: &[Bson], b: &[Bson]) -> bool {
    a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn duplicate_key(ns: &str, index: &IndexSpec, values: Vec<Bson>) -> StoreError {
    let mut dup = Document::new();
    for (field, value) in index.key.keys().zip(values) {
        dup.insert(field.clone(), value);
    }
    StoreError::new(
        DUPLICATE_KEY,
        format!("E11000 duplicate key error collection: {ns} index: {} dup key: {dup}", index.name),
    )
}

#[derive(Debug)]
struct OpenCursor {
    ns: String,
    pending: VecDeque<Document>,
}

/// Result of one update statement.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: Option<Bson>,
}

/// Everything the server holds, keyed by `"<db>.<collection>"`.
#[derive(Debug, Default)]
pub struct Store {
    collections: HashMap<String, Collection>,
    cursors: HashMap<i64, OpenCursor>,
}

impl Store {
    /// Insert one document; ordered inserts stop at the first failure.
    ///
    /// # Errors
    /// `DUPLICATE_KEY` when a unique index already holds the key.
    pub fn insert(&mut self, ns: &str, mut doc: Document) -> Result<(), StoreError> {
        if !doc.contains_key("_id") {
            let mut with_id = doc! { "_id": bson::oid::ObjectId::new() };
            for (k, v) in doc {
                with_id.insert(k, v);
            }
            doc = with_id;
        }
        let coll = self.collections.entry(ns.to_string()).or_default();
        if let Some(err) = coll.conflict(ns, &doc, None) {
            return Err(err);
        }
        coll.docs.push(doc);
        Ok(())
    }

    /// Matching documents after sort, skip, limit and projection.
    #[must_use]
    pub fn find(&self, ns: &str, filter: &Filter, opts: &FindSpec) -> Vec<Document> {
        let Some(coll) = self.collections.get(ns) else {
            return Vec::new();
        };
        let mut hits: Vec<&Document> = coll.docs.iter().filter(|d| filter.matches(d)).collect();
        if let Some(sort) = opts.sort.as_ref().filter(|s| !s.is_empty()) {
            hits.sort_by(|a, b| compare_docs(a, b, sort));
        }
        let hits = hits.into_iter().skip(opts.skip);
        let hits: Vec<&Document> = match opts.limit {
            Some(n) => hits.take(n).collect(),
            None => hits.collect(),
        };
        hits.into_iter()
            .map(|d| opts.projection.as_ref().map_or_else(|| d.clone(), |p| project(d, p)))
            .collect()
    }

    #[must_use]
    pub fn count(&self, ns: &str, filter: &Filter) -> usize {
        self.collections.get(ns).map_or(0, |c| c.docs.iter().filter(|d| filter.matches(d)).count())
    }

    /// Apply one update statement.
    ///
    /// # Errors
    /// `BAD_VALUE` or `IMMUTABLE_FIELD` for a malformed update and
    /// `DUPLICATE_KEY` when the result would break a unique index.
    pub fn update(&mut self, ns: &str, filter: &Filter, update: &Document, upsert: bool, multi: bool) -> Result<UpdateOutcome, StoreError> {
        let coll = self.collections.entry(ns.to_string()).or_default();
        let positions: Vec<usize> = coll
            .docs
            .iter()
            .enumerate()
            .filter(|(_, d)| filter.matches(d))
            .map(|(pos, _)| pos)
            .take(if multi { usize::MAX } else { 1 })
            .collect();

        if positions.is_empty() {
            if !upsert {
                return Ok(UpdateOutcome::default());
            }
            let doc = upsert_document(filter, update).map_err(update_error)?;
            if let Some(err) = coll.conflict(ns, &doc, None) {
                return Err(err);
            }
            let id = doc.get("_id").cloned();
            coll.docs.push(doc);
            return Ok(UpdateOutcome { matched: 0, modified: 0, upserted: id });
        }

        let mut outcome = UpdateOutcome { matched: positions.len() as u64, ..UpdateOutcome::default() };
        for pos in positions {
            let mut next = coll.docs[pos].clone();
            if apply_update(&mut next, update).map_err(update_error)? {
                if let Some(err) = coll.conflict(ns, &next, Some(pos)) {
                    return Err(err);
                }
                coll.docs[pos] = next;
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }

    /// Delete up to `limit` matching documents, all of them when `limit` is 0.
    pub fn delete(&mut self, ns: &str, filter: &Filter, limit: usize) -> usize {
        let Some(coll) = self.collections.get_mut(ns) else {
            return 0;
        };
        let cap = if limit == 0 { usize::MAX } else { limit };
        let mut removed = 0;
        coll.docs.retain(|d| {
            if removed < cap && filter.matches(d) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Add an index; an identical existing index is accepted as is.
    /// Returns the index counts before and after.
    ///
    /// # Errors
    /// `INDEX_OPTIONS_CONFLICT` for a name reused with other options, and
    /// `DUPLICATE_KEY` for a unique index over duplicate stored keys.
    pub fn create_index(&mut self, ns: &str, spec: IndexSpec) -> Result<(usize, usize), StoreError> {
        let coll = self.collections.entry(ns.to_string()).or_default();
        let before = coll.indexes.len();
        if let Some(existing) = coll.indexes.iter().find(|i| i.name == spec.name || i.key == spec.key) {
            if *existing == spec {
                return Ok((before, before));
            }
            return Err(StoreError::new(
                INDEX_OPTIONS_CONFLICT,
                format!("an index named '{}' already exists with different options", existing.name),
            ));
        }
        if spec.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::with_capacity(coll.docs.len());
            for doc in &coll.docs {
                let key = spec.key_values(doc);
                if seen.iter().any(|k| same_key(k, &key)) {
                    return Err(duplicate_key(ns, &spec, key));
                }
                seen.push(key);
            }
        }
        coll.indexes.push(spec);
        Ok((before, before + 1))
    }

    /// # Errors
    /// `NAMESPACE_NOT_FOUND` for a collection that was never written.
    pub fn list_indexes(&self, ns: &str) -> Result<Vec<Document>, StoreError> {
        self.collections
            .get(ns)
            .map(|c| c.indexes.iter().map(IndexSpec::to_document).collect())
            .ok_or_else(|| StoreError::new(NAMESPACE_NOT_FOUND, format!("ns does not exist: {ns}")))
    }

    /// Drop a collection and its cursors; returns its index count.
    ///
    /// # Errors
    /// `NAMESPACE_NOT_FOUND` when there is nothing to drop.
    pub fn drop_collection(&mut self, ns: &str) -> Result<usize, StoreError> {
        let coll = self
            .collections
            .remove(ns)
            .ok_or_else(|| StoreError::new(NAMESPACE_NOT_FOUND, "ns not found"))?;
        self.cursors.retain(|_, c| c.ns != ns);
        Ok(coll.indexes.len())
    }

    /// Hand out the first `batch` documents; keep the rest behind a new
    /// cursor id, or return id 0 when nothing is left.
    pub fn open_cursor(&mut self, ns: &str, docs: Vec<Document>, batch: usize) -> (i64, Vec<Document>) {
        let mut pending: VecDeque<Document> = docs.into();
        let first: Vec<Document> = pending.drain(..batch.min(pending.len())).collect();
        if pending.is_empty() {
            return (0, first);
        }
        let mut rng = rand::rng();
        let id = loop {
            let id = rng.random_range(1..i64::MAX);
            if !self.cursors.contains_key(&id) {
                break id;
            }
        };
        self.cursors.insert(id, OpenCursor { ns: ns.to_string(), pending });
        (id, first)
    }

    /// Next batch of cursor `id`; `batch` 0 means everything left.
    ///
    /// # Errors
    /// `CURSOR_NOT_FOUND` for an unknown, finished or foreign cursor.
    pub fn get_more(&mut self, ns: &str, id: i64, batch: usize) -> Result<(i64, Vec<Document>), StoreError> {
        let not_found = || StoreError::new(CURSOR_NOT_FOUND, format!("cursor id {id} not found"));
        let cursor = self.cursors.get_mut(&id).filter(|c| c.ns == ns).ok_or_else(not_found)?;
        let take = if batch == 0 { cursor.pending.len() } else { batch.min(cursor.pending.len()) };
        let docs: Vec<Document> = cursor.pending.drain(..take).collect();
        if cursor.pending.is_empty() {
            self.cursors.remove(&id);
            return Ok((0, docs));
        }
        Ok((id, docs))
    }

    /// Returns `(killed, not_found)`.
    pub fn kill_cursors(&mut self, ns: &str, ids: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let mut killed = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            if self.cursors.get(id).is_some_and(|c| c.ns == ns) {
                self.cursors.remove(id);
                killed.push(*id);
            } else {
                missing.push(*id);
            }
        }
        (killed, missing)
    }

    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }
}

/// Read options for [`Store::find`].
#[derive(Debug, Default, Clone)]
pub struct FindSpec {
    pub sort: Option<Document>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub projection: Option<Document>,
}

fn update_error(message: String) -> StoreError {
    let code = if message.contains("immutable") { IMMUTABLE_FIELD } else { BAD_VALUE };
    StoreError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "db.c";

    fn all() -> Filter {
        Filter::True
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut s = Store::default();
        s.create_index(NS, IndexSpec { name: "k_1".into(), key: doc! { "k": 1 }, unique: true }).unwrap();
        s.insert(NS, doc! { "k": 1 }).unwrap();
        let err = s.insert(NS, doc! { "k": 1_i64 }).unwrap_err();
        assert_eq!(err.code, DUPLICATE_KEY);
        assert!(err.message.contains("k_1"));
        assert_eq!(s.count(NS, &all()), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected_without_any_index() {
        let mut s = Store::default();
        s.insert(NS, doc! { "_id": 1 }).unwrap();
        assert_eq!(s.insert(NS, doc! { "_id": 1 }).unwrap_err().code, DUPLICATE_KEY);
    }

    #[test]
    fn unique_index_over_existing_duplicates_fails() {
        let mut s = Store::default();
        s.insert(NS, doc! { "k": 1 }).unwrap();
        s.insert(NS, doc! { "k": 1 }).unwrap();
        let spec = IndexSpec { name: "k_1".into(), key: doc! { "k": 1 }, unique: true };
        assert_eq!(s.create_index(NS, spec).unwrap_err().code, DUPLICATE_KEY);
    }

    #[test]
    fn create_index_is_idempotent_but_checks_options() {
        let mut s = Store::default();
        let spec = IndexSpec { name: "k_1".into(), key: doc! { "k": 1 }, unique: true };
        assert_eq!(s.create_index(NS, spec.clone()).unwrap(), (1, 2));
        assert_eq!(s.create_index(NS, spec).unwrap(), (2, 2));
        let other = IndexSpec { name: "k_1".into(), key: doc! { "k": 1 }, unique: false };
        assert_eq!(s.create_index(NS, other).unwrap_err().code, INDEX_OPTIONS_CONFLICT);
        assert_eq!(s.list_indexes(NS).unwrap().len(), 2);
    }

    #[test]
    fn update_then_upsert() {
        let mut s = Store::default();
        s.insert(NS, doc! { "a": 1 }).unwrap();
        let f = Filter::compile(&doc! { "a": 1 }).unwrap();
        let out = s.update(NS, &f, &doc! { "$set": { "b": 2 } }, true, false).unwrap();
        assert_eq!((out.matched, out.modified, out.upserted), (1, 1, None));
        let g = Filter::compile(&doc! { "a": 9 }).unwrap();
        let out = s.update(NS, &g, &doc! { "$set": { "b": 3 } }, true, false).unwrap();
        assert!(out.upserted.is_some());
        assert_eq!(s.count(NS, &g), 1);
        let none = s.update(NS, &Filter::compile(&doc! { "a": 5 }).unwrap(), &doc! { "$set": { "b": 1 } }, false, false).unwrap();
        assert_eq!(none, UpdateOutcome::default());
    }

    #[test]
    fn delete_one_and_many() {
        let mut s = Store::default();
        for i in 0..4 {
            s.insert(NS, doc! { "i": i, "even": (i % 2 == 0) }).unwrap();
        }
        let even = Filter::compile(&doc! { "even": true }).unwrap();
        assert_eq!(s.delete(NS, &even, 1), 1);
        assert_eq!(s.delete(NS, &all(), 0), 3);
        assert_eq!(s.delete("db.none", &all(), 0), 0);
    }

    #[test]
    fn cursors_page_and_finish() {
        let mut s = Store::default();
        let docs: Vec<Document> = (0..5).map(|i| doc! { "i": i }).collect();
        let (id, first) = s.open_cursor(NS, docs, 2);
        assert_ne!(id, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(s.open_cursors(), 1);
        assert_eq!(s.get_more("db.other", id, 2).unwrap_err().code, CURSOR_NOT_FOUND);
        let (same, next) = s.get_more(NS, id, 2).unwrap();
        assert_eq!((same, next.len()), (id, 2));
        let (done, last) = s.get_more(NS, id, 0).unwrap();
        assert_eq!((done, last.len()), (0, 1));
        assert_eq!(s.open_cursors(), 0);
        assert_eq!(s.get_more(NS, id, 1).unwrap_err().code, CURSOR_NOT_FOUND);
    }

    #[test]
    fn small_results_need_no_cursor() {
        let mut s = Store::default();
        let (id, first) = s.open_cursor(NS, vec![doc! { "a": 1 }], 101);
        assert_eq!((id, first.len()), (0, 1));
        let (killed, missing) = s.kill_cursors(NS, &[5]);
        assert!(killed.is_empty());
        assert_eq!(missing, vec![5]);
    }

    #[test]
    fn find_sorts_skips_limits_and_projects() {
        let mut s = Store::default();
        for i in [3, 1, 2, 5, 4] {
            s.insert(NS, doc! { "_id": i, "n": i, "x": "y" }).unwrap();
        }
        let spec = FindSpec {
            sort: Some(doc! { "n": -1 }),
            skip: 1,
            limit: Some(2),
            projection: Some(doc! { "n": 1, "_id": 0 }),
        };
        assert_eq!(s.find(NS, &all(), &spec), vec![doc! { "n": 4 }, doc! { "n": 3 }]);
    }
}
