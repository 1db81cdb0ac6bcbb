mod common;

use common::{ready, server};
use docbridge::cli::{Command, OutputMode, run_with_format};
use docbridge::Operator;

fn output(op: &mut Operator, cmd: Command, mode: OutputMode) -> String {
    let mut out = Vec::new();
    run_with_format(op, cmd, mode, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn insert_count_find_in_each_mode() {
    let server = server();
    let mut op = ready(&server, "cli");
    let inserted = output(&mut op, Command::Insert { document: r#"{"_id": 1, "n": "a"}"#.into() }, OutputMode::Plain);
    assert_eq!(inserted, "1\n");
    output(&mut op, Command::Insert { document: r#"{"_id": 2, "n": "b"}"#.into() }, OutputMode::Human);

    assert_eq!(output(&mut op, Command::Count { filter: "{}".into() }, OutputMode::Human), "count=2\n");
    assert_eq!(output(&mut op, Command::Count { filter: "{}".into() }, OutputMode::Json), "{\"count\":2}\n");

    let found = output(&mut op, Command::find_all(), OutputMode::Human);
    assert_eq!(found, "{\"_id\":1,\"n\":\"a\"}\n{\"_id\":2,\"n\":\"b\"}\n(2 documents)\n");
    let sorted = output(
        &mut op,
        Command::Find {
            filter: "{}".into(),
            limit: Some(1),
            skip: None,
            batch_size: None,
            sort: Some(r#"{"_id": -1}"#.into()),
            projection: Some(r#"{"n": 1, "_id": 0}"#.into()),
        },
        OutputMode::Plain,
    );
    assert_eq!(sorted, "{\"n\":\"b\"}\n");
}

#[test]
fn update_remove_and_index_output() {
    let server = server();
    let mut op = ready(&server, "cli2");
    let upserted = output(&mut op, Command::Update { filter: r#"{"_id": 5}"#.into(), body: r#"{"v": 1}"#.into() }, OutputMode::Human);
    assert_eq!(upserted, "upserted _id=5\n");
    let updated = output(&mut op, Command::Update { filter: r#"{"_id": 5}"#.into(), body: r#"{"v": 2}"#.into() }, OutputMode::Json);
    assert_eq!(updated, "{\"matched\":1,\"modified\":1,\"upserted_id\":null}\n");
    let index = output(&mut op, Command::CreateIndex { key: "v".into(), ascending: false, unique: false }, OutputMode::Human);
    assert_eq!(index, "index=v_-1 unique=false\n");
    assert_eq!(output(&mut op, Command::Remove { filter: r#"{"_id": 5}"#.into() }, OutputMode::Plain), "1\n");
    assert_eq!(output(&mut op, Command::RemoveAll, OutputMode::Json), "{\"deleted\":0}\n");
}

#[test]
fn failures_surface_as_errors() {
    let server = server();
    let mut op = ready(&server, "cli3");
    let mut out = Vec::new();
    assert!(run_with_format(&mut op, Command::Count { filter: "{oops".into() }, OutputMode::Human, &mut out).is_err());
    let bad_sort = Command::Find {
        filter: "{}".into(),
        limit: None,
        skip: None,
        batch_size: None,
        sort: Some("nope".into()),
        projection: None,
    };
    assert!(run_with_format(&mut op, bad_sort, OutputMode::Human, &mut out).is_err());
    assert!(out.is_empty());
}
