//! Command dispatch for the memory server.

use bson::{Bson, Document, doc};
use parking_lot::Mutex;

use super::matcher::Filter;
use super::store::{BAD_VALUE, FindSpec, IndexSpec, Store, StoreError};
use crate::document::{get_int, get_str};
use crate::wire::MAX_MESSAGE_SIZE;

const COMMAND_NOT_FOUND: i32 = 59;
const DEFAULT_BATCH: usize = 101;
const MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;

/// Handshake behaviour, adjustable to exercise client fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Answer `hello` with CommandNotFound, as servers before 4.4.2 do.
    pub legacy_handshake: bool,
    pub max_wire_version: i32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { legacy_handshake: false, max_wire_version: 17 }
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub store: Mutex<Store>,
    pub settings: ServerSettings,
}

impl ServerState {
    #[must_use]
    pub fn new(settings: ServerSettings) -> Self {
        Self { store: Mutex::new(Store::default()), settings }
    }

    /// Run one command and build its reply. Failures become `ok: 0` replies.
    pub fn handle_command(&self, cmd: &Document) -> Document {
        let Some(name) = cmd.keys().next().cloned() else {
            return error_reply(&StoreError::new(BAD_VALUE, "empty command"));
        };
        log::trace!("server <- {name}");
        let result = match name.as_str() {
            "hello" if self.settings.legacy_handshake => Err(not_found(&name)),
            "hello" | "isMaster" | "ismaster" => Ok(self.hello(&name)),
            "ping" => Ok(doc! {}),
            "count" => self.count(cmd),
            "find" => self.find(cmd),
            "getMore" => self.get_more(cmd),
            "killCursors" => self.kill_cursors(cmd),
            "insert" => self.insert(cmd),
            "update" => self.update(cmd),
            "delete" => self.delete(cmd),
            "createIndexes" => self.create_indexes(cmd),
            "listIndexes" => self.list_indexes(cmd),
            "drop" => self.drop_collection(cmd),
            other => Err(not_found(other)),
        };
        match result {
            Ok(mut reply) => {
                reply.insert("ok", 1.0);
                reply
            }
            Err(e) => {
                log::debug!("server rejected {name}: {}", e.message);
                error_reply(&e)
            }
        }
    }

    fn hello(&self, verb: &str) -> Document {
        let mut reply = Document::new();
        reply.insert(if verb == "hello" { "isWritablePrimary" } else { "ismaster" }, true);
        reply.insert("helloOk", true);
        reply.insert("maxBsonObjectSize", MAX_BSON_OBJECT_SIZE);
        reply.insert("maxMessageSizeBytes", i32::try_from(MAX_MESSAGE_SIZE).unwrap_or(i32::MAX));
        reply.insert("maxWriteBatchSize", 100_000);
        reply.insert("localTime", bson::DateTime::now());
        reply.insert("minWireVersion", 0);
        reply.insert("maxWireVersion", self.settings.max_wire_version);
        reply.insert("readOnly", false);
        reply
    }

    fn count(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "count")?;
        let filter = compile(cmd.get("query"))?;
        let spec = FindSpec {
            skip: non_negative(cmd, "skip")?.unwrap_or(0),
            limit: non_negative(cmd, "limit")?.filter(|n| *n > 0),
            ..FindSpec::default()
        };
        let store = self.store.lock();
        let n = if spec.skip == 0 && spec.limit.is_none() {
            store.count(&ns, &filter)
        } else {
            store.find(&ns, &filter, &spec).len()
        };
        Ok(doc! { "n": to_i64(n) })
    }

    fn find(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "find")?;
        let filter = compile(cmd.get("filter"))?;
        let limit = get_int(cmd, "limit").unwrap_or(0);
        let single_batch = cmd.get_bool("singleBatch").unwrap_or(false) || limit < 0;
        let spec = FindSpec {
            sort: sub_document(cmd, "sort")?,
            skip: non_negative(cmd, "skip")?.unwrap_or(0),
            limit: usize::try_from(limit.unsigned_abs()).ok().filter(|n| *n > 0),
            projection: sub_document(cmd, "projection")?,
        };
        let batch = non_negative(cmd, "batchSize")?.unwrap_or(DEFAULT_BATCH);
        let mut store = self.store.lock();
        let docs = store.find(&ns, &filter, &spec);
        let (id, first) = if single_batch {
            (0, docs.into_iter().take(batch.max(1)).collect())
        } else {
            store.open_cursor(&ns, docs, batch)
        };
        Ok(cursor_reply(id, &ns, "firstBatch", first))
    }

    fn get_more(&self, cmd: &Document) -> Result<Document, StoreError> {
        let id = get_int(cmd, "getMore").ok_or_else(|| bad("getMore needs a cursor id"))?;
        let ns = namespace(cmd, "collection")?;
        let batch = non_negative(cmd, "batchSize")?.unwrap_or(0);
        let (id, docs) = self.store.lock().get_more(&ns, id, batch)?;
        Ok(cursor_reply(id, &ns, "nextBatch", docs))
    }

    fn kill_cursors(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "killCursors")?;
        let ids: Vec<i64> = documents_or_values(cmd, "cursors")?
            .iter()
            .filter_map(|b| match b {
                Bson::Int64(i) => Some(*i),
                Bson::Int32(i) => Some(i64::from(*i)),
                _ => None,
            })
            .collect();
        let (killed, missing) = self.store.lock().kill_cursors(&ns, &ids);
        log::debug!("killCursors on {ns}: killed {killed:?}, not found {missing:?}");
        Ok(doc! {
            "cursorsKilled": killed,
            "cursorsNotFound": missing,
            "cursorsAlive": [],
            "cursorsUnknown": [],
        })
    }

    fn insert(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "insert")?;
        let mut store = self.store.lock();
        let mut n = 0_i64;
        let mut write_errors = Vec::new();
        for (index, doc) in documents(cmd, "documents")?.into_iter().enumerate() {
            match store.insert(&ns, doc) {
                Ok(()) => n += 1,
                Err(e) => {
                    write_errors.push(write_error(index, &e));
                    break;
                }
            }
        }
        let mut reply = doc! { "n": n };
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        Ok(reply)
    }

    fn update(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "update")?;
        let mut store = self.store.lock();
        let (mut n, mut modified) = (0_u64, 0_u64);
        let mut upserted = Vec::new();
        let mut write_errors = Vec::new();
        for (index, statement) in documents(cmd, "updates")?.into_iter().enumerate() {
            let outcome = compile(statement.get("q")).and_then(|filter| {
                let update = sub_document(&statement, "u")?.ok_or_else(|| bad("update statement needs 'u'"))?;
                let upsert = statement.get_bool("upsert").unwrap_or(false);
                let multi = statement.get_bool("multi").unwrap_or(false);
                store.update(&ns, &filter, &update, upsert, multi)
            });
            match outcome {
                Ok(o) => {
                    n += o.matched;
                    modified += o.modified;
                    if let Some(id) = o.upserted {
                        n += 1;
                        upserted.push(doc! { "index": to_i64(index), "_id": id });
                    }
                }
                Err(e) => {
                    write_errors.push(write_error(index, &e));
                    break;
                }
            }
        }
        let mut reply = doc! { "n": to_i64_u(n), "nModified": to_i64_u(modified) };
        if !upserted.is_empty() {
            reply.insert("upserted", upserted);
        }
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        Ok(reply)
    }

    fn delete(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "delete")?;
        let mut store = self.store.lock();
        let mut n = 0;
        for statement in documents(cmd, "deletes")? {
            let filter = compile(statement.get("q"))?;
            let limit = non_negative(&statement, "limit")?.unwrap_or(0);
            n += store.delete(&ns, &filter, limit);
        }
        Ok(doc! { "n": to_i64(n) })
    }

    fn create_indexes(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "createIndexes")?;
        let specs = documents(cmd, "indexes")?;
        if specs.is_empty() {
            return Err(bad("createIndexes needs at least one index"));
        }
        let mut store = self.store.lock();
        let mut counts = None;
        for spec in specs {
            let key = sub_document(&spec, "key")?.filter(|k| !k.is_empty()).ok_or_else(|| bad("index needs a key"))?;
            let name = get_str(&spec, "name").ok_or_else(|| bad("index needs a name"))?.to_string();
            let unique = spec.get_bool("unique").unwrap_or(false);
            let (before, after) = store.create_index(&ns, IndexSpec { name, key, unique })?;
            counts = Some(counts.map_or((before, after), |(b, _)| (b, after)));
        }
        let (before, after) = counts.unwrap_or((0, 0));
        Ok(doc! {
            "numIndexesBefore": to_i64(before),
            "numIndexesAfter": to_i64(after),
            "createdCollectionAutomatically": false,
        })
    }

    fn list_indexes(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "listIndexes")?;
        let indexes = self.store.lock().list_indexes(&ns)?;
        Ok(cursor_reply(0, &ns, "firstBatch", indexes))
    }

    fn drop_collection(&self, cmd: &Document) -> Result<Document, StoreError> {
        let ns = namespace(cmd, "drop")?;
        let was = self.store.lock().drop_collection(&ns)?;
        Ok(doc! { "ns": ns, "nIndexesWas": to_i64(was) })
    }
}

fn bad(message: &str) -> StoreError {
    StoreError::new(BAD_VALUE, message)
}

fn not_found(name: &str) -> StoreError {
    StoreError { code: COMMAND_NOT_FOUND, message: format!("no such command: '{name}'") }
}

fn error_reply(e: &StoreError) -> Document {
    let code_name = if e.code == COMMAND_NOT_FOUND { "CommandNotFound" } else { e.code_name() };
    doc! { "ok": 0.0, "errmsg": e.message.as_str(), "code": e.code, "codeName": code_name }
}

fn write_error(index: usize, e: &StoreError) -> Document {
    doc! { "index": to_i64(index), "code": e.code, "codeName": e.code_name(), "errmsg": e.message.as_str() }
}

fn cursor_reply(id: i64, ns: &str, field: &str, docs: Vec<Document>) -> Document {
    let mut cursor = doc! { "id": id, "ns": ns };
    cursor.insert(field, docs);
    doc! { "cursor": cursor }
}

// `<$db>.<collection>` where the collection name sits under `key`.
fn namespace(cmd: &Document, key: &str) -> Result<String, StoreError> {
    let db = get_str(cmd, "$db").ok_or_else(|| bad("command has no $db"))?;
    let coll = get_str(cmd, key).filter(|c| !c.is_empty()).ok_or_else(|| bad(&format!("'{key}' must name a collection")))?;
    Ok(format!("{db}.{coll}"))
}

fn compile(query: Option<&Bson>) -> Result<Filter, StoreError> {
    match query {
        None | Some(Bson::Null) => Ok(Filter::True),
        Some(Bson::Document(d)) => Filter::compile(d).map_err(|m| bad(&m)),
        Some(_) => Err(bad("filter must be a document")),
    }
}

fn sub_document(cmd: &Document, key: &str) -> Result<Option<Document>, StoreError> {
    match cmd.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(d)) => Ok(Some(d.clone())),
        Some(_) => Err(bad(&format!("'{key}' must be a document"))),
    }
}

fn documents_or_values<'a>(cmd: &'a Document, key: &str) -> Result<&'a Vec<Bson>, StoreError> {
    cmd.get(key).and_then(Bson::as_array).ok_or_else(|| bad(&format!("'{key}' must be an array")))
}

fn documents(cmd: &Document, key: &str) -> Result<Vec<Document>, StoreError> {
    documents_or_values(cmd, key)?
        .iter()
        .map(|b| b.as_document().cloned().ok_or_else(|| bad(&format!("'{key}' entries must be documents"))))
        .collect()
}

fn non_negative(cmd: &Document, key: &str) -> Result<Option<usize>, StoreError> {
    match cmd.get(key) {
        None => Ok(None),
        Some(_) => get_int(cmd, key)
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| bad(&format!("'{key}' must be a non-negative integer"))),
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_i64_u(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
