//! Update documents (`$set`, `$unset`, `$inc` or a plain replacement) applied
//! to stored documents.

use bson::{Bson, Document, oid::ObjectId};

use super::matcher::Filter;

/// Apply `update` to `doc` in place and report whether anything changed.
///
/// # Errors
/// The message names the unsupported operator or bad operand. `doc` is left
/// untouched on error.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, String> {
    if !is_operator_update(update) {
        let id = doc.get("_id").cloned();
        let mut replacement = Document::new();
        if let Some(id) = id {
            replacement.insert("_id", id);
        }
        for (key, value) in update {
            if key != "_id" {
                replacement.insert(key.clone(), value.clone());
            }
        }
        let changed = replacement != *doc;
        *doc = replacement;
        return Ok(changed);
    }

    let mut next = doc.clone();
    let mut changed = false;
    for (op, fields) in update {
        let Some(fields) = fields.as_document() else {
            return Err(format!("{op} needs a document of fields"));
        };
        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err("performing an update on the path '_id' would modify the immutable field '_id'".into());
            }
            changed |= match op.as_str() {
                "$set" => set_path(&mut next, path, value.clone())?,
                "$unset" => unset_path(&mut next, path),
                "$inc" => inc_path(&mut next, path, value)?,
                other => return Err(format!("unknown update operator: {other}")),
            };
        }
    }
    *doc = next;
    Ok(changed)
}

/// The document an upsert inserts: the filter's equality fields with the
/// update applied on top and an `_id` first.
///
/// # Errors
/// As [`apply_update`].
pub fn upsert_document(filter: &Filter, update: &Document) -> Result<Document, String> {
    let mut seed = Document::new();
    if is_operator_update(update) {
        for (path, value) in filter.equality_fields() {
            set_path(&mut seed, &path, value)?;
        }
    }
    apply_update(&mut seed, update)?;
    if !seed.contains_key("_id") {
        let mut with_id = Document::new();
        with_id.insert("_id", ObjectId::new());
        for (key, value) in seed {
            with_id.insert(key, value);
        }
        seed = with_id;
    }
    Ok(seed)
}

fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn traverse_to_parent<'a>(root: &'a mut Document, path: &str) -> Result<(&'a mut Document, String), String> {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            return Ok((cur, seg.to_string()));
        }
        if !cur.contains_key(seg) {
            cur.insert(seg, Document::new());
        }
        cur = match cur.get_mut(seg) {
            Some(Bson::Document(d)) => d,
            _ => return Err(format!("cannot create field '{seg}' inside a non-document in '{path}'")),
        };
    }
    Err("empty field path".into())
}

fn set_path(root: &mut Document, path: &str, value: Bson) -> Result<bool, String> {
    let (parent, last) = traverse_to_parent(root, path)?;
    let old = parent.insert(last, value.clone());
    Ok(old.as_ref() != Some(&value))
}

fn unset_path(root: &mut Document, path: &str) -> bool {
    let mut segs: Vec<&str> = path.split('.').collect();
    let Some(last) = segs.pop() else { return false };
    let mut cur = root;
    for seg in segs {
        cur = match cur.get_mut(seg) {
            Some(Bson::Document(d)) => d,
            _ => return false,
        };
    }
    cur.remove(last).is_some()
}

fn inc_path(root: &mut Document, path: &str, by: &Bson) -> Result<bool, String> {
    let current = super::matcher::get_path(root, path).cloned().unwrap_or(Bson::Int32(0));
    let next = match (&current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => a.checked_add(*b).map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).wrapping_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.wrapping_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.wrapping_add(*b)),
        (a, b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => return Err(format!("cannot apply $inc to '{path}' with a non-numeric operand")),
        },
    };
    set_path(root, path, next)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(f) => Some(*f),
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_inc_unset() {
        let mut d = doc! { "_id": 1, "a": 1, "n": { "x": 2 } };
        let changed = apply_update(&mut d, &doc! {
            "$set": { "b": "new", "n.y": 3 },
            "$inc": { "a": 2, "c": 1.5 },
            "$unset": { "n.x": "" },
        })
        .unwrap();
        assert!(changed);
        assert_eq!(d, doc! { "_id": 1, "a": 3, "n": { "y": 3 }, "b": "new", "c": 1.5 });
    }

    #[test]
    fn setting_the_same_value_is_not_a_change() {
        let mut d = doc! { "_id": 1, "a": 1 };
        assert!(!apply_update(&mut d, &doc! { "$set": { "a": 1 } }).unwrap());
    }

    #[test]
    fn replacement_keeps_the_id() {
        let mut d = doc! { "_id": 7, "a": 1 };
        assert!(apply_update(&mut d, &doc! { "b": 2 }).unwrap());
        assert_eq!(d, doc! { "_id": 7, "b": 2 });
    }

    #[test]
    fn bad_updates_leave_the_document_alone() {
        let mut d = doc! { "_id": 1, "s": "text" };
        assert!(apply_update(&mut d, &doc! { "$inc": { "s": 1 } }).is_err());
        assert!(apply_update(&mut d, &doc! { "$set": { "_id": 2 } }).is_err());
        assert!(apply_update(&mut d, &doc! { "$push": { "a": 1 } }).is_err());
        assert!(apply_update(&mut d, &doc! { "$set": { "s.x": 1 } }).is_err());
        assert_eq!(d, doc! { "_id": 1, "s": "text" });
    }

    #[test]
    fn upsert_seeds_from_equality_fields() {
        let filter = Filter::compile(&doc! { "node_id": 222, "n": { "$gt": 1 } }).unwrap();
        let d = upsert_document(&filter, &doc! { "$set": { "node_name": "C222" } }).unwrap();
        assert_eq!(d.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(d.get("node_id"), Some(&Bson::Int32(222)));
        assert_eq!(d.get("node_name"), Some(&Bson::String("C222".into())));
        assert!(!d.contains_key("n"));
    }
}
