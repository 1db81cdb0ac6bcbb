//! Query-document evaluation for the memory server: filters, sort order and
//! projection over `bson::Document`.

use bson::{Bson, Document};
use std::cmp::Ordering;

const MAX_PATH_DEPTH: usize = 32;
const MAX_IN_SET: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A compiled query document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
}

impl Filter {
    /// Compile a query document such as `{"a": 1, "b": {"$gt": 2}}`.
    ///
    /// # Errors
    /// The message names the unknown operator or malformed operand.
    pub fn compile(query: &Document) -> Result<Self, String> {
        let mut parts = Vec::with_capacity(query.len());
        for (key, value) in query {
            parts.push(match key.as_str() {
                "$and" => Self::And(compile_list(key, value)?),
                "$or" => Self::Or(compile_list(key, value)?),
                "$nor" => Self::Not(Box::new(Self::Or(compile_list(key, value)?))),
                op if op.starts_with('$') => return Err(format!("unknown top level operator: {op}")),
                path => compile_field(path, value)?,
            });
        }
        Ok(match parts.len() {
            0 => Self::True,
            1 => parts.remove(0),
            _ => Self::And(parts),
        })
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::True => true,
            Self::And(fs) => fs.iter().all(|f| f.matches(doc)),
            Self::Or(fs) => fs.iter().any(|f| f.matches(doc)),
            Self::Not(f) => !f.matches(doc),
            Self::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
            Self::In { path, values } => get_path(doc, path).is_some_and(|v| {
                values.iter().take(MAX_IN_SET).any(|x| field_equals(v, x))
            }),
            Self::Cmp { path, op, value } => {
                let Some(v) = get_path(doc, path) else {
                    // A missing field equals null.
                    return *op == CmpOp::Eq && *value == Bson::Null;
                };
                match op {
                    CmpOp::Eq => field_equals(v, value),
                    CmpOp::Gt => comparable(v, value) && compare_bson(v, value) == Ordering::Greater,
                    CmpOp::Gte => comparable(v, value) && compare_bson(v, value) != Ordering::Less,
                    CmpOp::Lt => comparable(v, value) && compare_bson(v, value) == Ordering::Less,
                    CmpOp::Lte => comparable(v, value) && compare_bson(v, value) != Ordering::Greater,
                }
            }
        }
    }

    /// Fields a matching document is known to hold, used to seed an upsert.
    #[must_use]
    pub fn equality_fields(&self) -> Vec<(String, Bson)> {
        match self {
            Self::Cmp { path, op: CmpOp::Eq, value } => vec![(path.clone(), value.clone())],
            Self::And(fs) => fs.iter().flat_map(Self::equality_fields).collect(),
            _ => Vec::new(),
        }
    }
}

fn compile_list(op: &str, value: &Bson) -> Result<Vec<Filter>, String> {
    let Some(items) = value.as_array().filter(|a| !a.is_empty()) else {
        return Err(format!("{op} argument must be a non-empty array"));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Filter::compile(d),
            _ => Err(format!("{op} entries must be documents")),
        })
        .collect()
}

fn compile_field(path: &str, value: &Bson) -> Result<Filter, String> {
    let ops = match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => d,
        _ => return Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.clone() }),
    };
    let mut parts = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let cmp = |op| Filter::Cmp { path: path.to_string(), op, value: operand.clone() };
        parts.push(match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$ne" => Filter::Not(Box::new(cmp(CmpOp::Eq))),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$in" | "$nin" => {
                let values = operand.as_array().ok_or_else(|| format!("{op} needs an array"))?.clone();
                let f = Filter::In { path: path.to_string(), values };
                if op == "$in" { f } else { Filter::Not(Box::new(f)) }
            }
            "$exists" => Filter::Exists { path: path.to_string(), exists: truthy(operand) },
            "$not" => match operand {
                Bson::Document(inner) => Filter::Not(Box::new(compile_field(path, &Bson::Document(inner.clone()))?)),
                _ => return Err("$not needs a document".into()),
            },
            other => return Err(format!("unknown operator: {other}")),
        });
    }
    Ok(if parts.len() == 1 { parts.remove(0) } else { Filter::And(parts) })
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => compare_bson(other, &Bson::Int32(0)) != Ordering::Equal,
    }
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

// Range operators only compare within a type class.
fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Equality as a query sees it: numbers compare by value whatever their
/// width, and an array field matches any of its elements.
#[must_use]
pub fn field_equals(field: &Bson, value: &Bson) -> bool {
    if values_equal(field, value) {
        return true;
    }
    match field {
        Bson::Array(items) => items.iter().any(|item| values_equal(item, value)),
        _ => false,
    }
}

#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return compare_bson(a, b) == Ordering::Equal;
    }
    a == b
}

/// Follow a dotted path through nested documents.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut segs = path.split('.');
    let mut cur = doc.get(segs.next()?)?;
    for (depth, seg) in segs.enumerate() {
        if depth >= MAX_PATH_DEPTH {
            return None;
        }
        match cur {
            Bson::Document(d) => cur = d.get(seg)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Order two documents by a sort specification `{field: 1 | -1, ...}`.
#[must_use]
pub fn compare_docs(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            let descending = compare_bson(direction, &Bson::Int32(0)) == Ordering::Less;
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(x: &Bson) -> f64 {
        match x {
            Bson::Int32(i) => f64::from(*i),
            Bson::Int64(i) => *i as f64,
            Bson::Double(f) => *f,
            Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }
    if is_num(a) && is_num(b) {
        return as_f64(a).total_cmp(&as_f64(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// Cross-type order, numbers sharing one rank.
fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Undefined | Bson::Null => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::Symbol(_) | Bson::String(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 255,
    }
}

/// Apply a projection. Inclusion (`{a: 1}`) keeps the named top-level fields
/// and `_id` unless `_id: 0`; exclusion (`{a: 0}`) drops the named fields.
#[must_use]
pub fn project(doc: &Document, projection: &Document) -> Document {
    let keep_id = projection.get("_id").is_none_or(truthy);
    let inclusive = projection.iter().any(|(k, v)| k != "_id" && truthy(v));
    if inclusive {
        let mut out = Document::new();
        for (key, value) in doc {
            let wanted = if key == "_id" { keep_id } else { projection.get(key).is_some_and(truthy) };
            if wanted {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (key, _) in projection {
            if key != "_id" || !keep_id {
                out.remove(key);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(query: Document, doc: &Document) -> bool {
        Filter::compile(&query).unwrap().matches(doc)
    }

    #[test]
    fn equality_across_integer_widths() {
        let d = doc! { "node_id": 222_i64, "tags": ["a", "b"] };
        assert!(matches(doc! { "node_id": 222 }, &d));
        assert!(matches(doc! { "node_id": 222.0 }, &d));
        assert!(!matches(doc! { "node_id": 111 }, &d));
        assert!(matches(doc! { "tags": "b" }, &d));
        assert!(matches(doc! {}, &d));
    }

    #[test]
    fn operators_and_logic() {
        let d = doc! { "n": 5, "s": "x", "m": { "k": true } };
        assert!(matches(doc! { "n": { "$gt": 4, "$lte": 5 } }, &d));
        assert!(!matches(doc! { "n": { "$gt": "a" } }, &d));
        assert!(matches(doc! { "n": { "$in": [1, 5] } }, &d));
        assert!(matches(doc! { "n": { "$nin": [1, 2] } }, &d));
        assert!(matches(doc! { "n": { "$ne": 4 } }, &d));
        assert!(matches(doc! { "m.k": true }, &d));
        assert!(matches(doc! { "missing": { "$exists": false } }, &d));
        assert!(matches(doc! { "missing": null }, &d));
        assert!(matches(doc! { "$or": [{ "n": 1 }, { "s": "x" }] }, &d));
        assert!(!matches(doc! { "$nor": [{ "s": "x" }] }, &d));
        assert!(matches(doc! { "n": { "$not": { "$lt": 3 } } }, &d));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        assert!(Filter::compile(&doc! { "$where": "1" }).is_err());
        assert!(Filter::compile(&doc! { "a": { "$regexish": 1 } }).is_err());
        assert!(Filter::compile(&doc! { "$and": [] }).is_err());
    }

    #[test]
    fn nested_documents_resolve_on_a_single_segment() {
        let d = doc! { "m": { "k": 1 } };
        assert_eq!(get_path(&d, "m"), Some(&Bson::Document(doc! { "k": 1 })));
        assert_eq!(get_path(&d, "m.k.z"), None);
    }

    #[test]
    fn sort_and_projection() {
        let a = doc! { "_id": 1, "n": 1, "s": "b" };
        let b = doc! { "_id": 2, "n": 2, "s": "a" };
        assert_eq!(compare_docs(&a, &b, &doc! { "n": 1 }), Ordering::Less);
        assert_eq!(compare_docs(&a, &b, &doc! { "n": -1 }), Ordering::Greater);
        assert_eq!(compare_docs(&a, &b, &doc! { "x": 1, "s": 1 }), Ordering::Greater);
        assert_eq!(project(&a, &doc! { "s": 1 }), doc! { "_id": 1, "s": "b" });
        assert_eq!(project(&a, &doc! { "s": 1, "_id": 0 }), doc! { "s": "b" });
        assert_eq!(project(&a, &doc! { "s": 0 }), doc! { "_id": 1, "n": 1 });
    }

    #[test]
    fn equality_fields_seed_upserts() {
        let f = Filter::compile(&doc! { "a": 1, "b": { "$gt": 2 }, "c": { "$eq": "x" } }).unwrap();
        let fields = f.equality_fields();
        assert_eq!(fields, vec![("a".to_string(), Bson::Int32(1)), ("c".to_string(), Bson::String("x".into()))]);
    }
}
