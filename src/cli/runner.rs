use bson::Bson;
use std::io::Write;

use super::command::Command;
use crate::document::to_json;
use crate::errors::DbError;
use crate::operator::Operator;
use crate::query::{FindOptions, build_index_spec, parse_document};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Plain,
    Json,
}

/// Run `cmd` and print human-readable output to stdout.
///
/// # Errors
/// Whatever the operation fails with.
pub fn run(op: &mut Operator, cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    run_with_format(op, cmd, OutputMode::Human, &mut std::io::stdout().lock())
}

/// Run `cmd` against an initialized operator, writing results to `out`.
///
/// Found documents print one relaxed extended JSON object per line in every
/// mode, so the output of `find` can be piped as NDJSON.
///
/// # Errors
/// Operation failures and write failures on `out`.
pub fn run_with_format<W: Write>(
    op: &mut Operator,
    cmd: Command,
    mode: OutputMode,
    out: &mut W,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::Count { filter } => {
            let n = op.count(&filter)?;
            match mode {
                OutputMode::Json => writeln!(out, "{}", serde_json::json!({ "count": n }))?,
                OutputMode::Plain => writeln!(out, "{n}")?,
                OutputMode::Human => writeln!(out, "count={n}")?,
            }
        }
        Command::Find { filter, limit, skip, batch_size, sort, projection } => {
            let options = FindOptions {
                batch_size: batch_size.or(op.batch_size()),
                limit,
                skip,
                sort: sort.as_deref().map(parse_document).transpose()?,
                projection: projection.as_deref().map(parse_document).transpose()?,
            };
            op.select_with(&filter, &options)?;
            let mut n = 0_u64;
            while let Some(doc) = op.read() {
                writeln!(out, "{}", to_json(&doc))?;
                n += 1;
            }
            if !op.last_error().is_empty() {
                return Err(Box::new(DbError::Query { code: None, message: op.last_error().to_string() }));
            }
            if mode == OutputMode::Human {
                writeln!(out, "({n} documents)")?;
            }
        }
        Command::Insert { document } => {
            let report = op.insert(&document)?;
            let id = report.inserted_id;
            match mode {
                OutputMode::Json => writeln!(out, "{}", serde_json::json!({ "inserted_id": id.into_relaxed_extjson() }))?,
                OutputMode::Plain => writeln!(out, "{}", plain(&id))?,
                OutputMode::Human => writeln!(out, "inserted _id={}", plain(&id))?,
            }
        }
        Command::Update { filter, body } => {
            let report = op.update(&filter, &body)?;
            match mode {
                OutputMode::Json => {
                    let json = serde_json::json!({
                        "matched": report.matched,
                        "modified": report.modified,
                        "upserted_id": report.upserted_id.clone().map(Bson::into_relaxed_extjson),
                    });
                    writeln!(out, "{json}")?;
                }
                OutputMode::Plain => writeln!(out, "{} {}", report.matched, report.modified)?,
                OutputMode::Human => match &report.upserted_id {
                    Some(id) => writeln!(out, "upserted _id={}", plain(id))?,
                    None => writeln!(out, "matched={} modified={}", report.matched, report.modified)?,
                },
            }
        }
        Command::Remove { filter } => {
            let report = op.remove(&filter)?;
            print_deleted(out, mode, report.deleted)?;
        }
        Command::RemoveAll => {
            let report = op.remove_all()?;
            print_deleted(out, mode, report.deleted)?;
        }
        Command::CreateIndex { key, ascending, unique } => {
            op.create_index(&key, ascending, unique)?;
            let name = build_index_spec(&key, ascending, unique).options.name;
            match mode {
                OutputMode::Json => writeln!(out, "{}", serde_json::json!({ "index": name, "unique": unique }))?,
                OutputMode::Plain => writeln!(out, "{name}")?,
                OutputMode::Human => writeln!(out, "index={name} unique={unique}")?,
            }
        }
    }
    Ok(())
}

fn print_deleted<W: Write>(out: &mut W, mode: OutputMode, deleted: u64) -> std::io::Result<()> {
    match mode {
        OutputMode::Json => writeln!(out, "{}", serde_json::json!({ "deleted": deleted })),
        OutputMode::Plain => writeln!(out, "{deleted}"),
        OutputMode::Human => writeln!(out, "deleted={deleted}"),
    }
}

// Ids print bare: an ObjectId as its hex string, anything else as JSON.
fn plain(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}
