mod common;

use bson::{Document, doc};
use common::{DB, server};
use docbridge::query::FindOptions;
use docbridge::server::MemoryServer;
use docbridge::{CollectionHandle, Connection, CursorState, DbError};

fn handle(server: &MemoryServer, name: &str) -> CollectionHandle {
    let conn = Connection::connect(&server.uri()).unwrap().into_shared();
    CollectionHandle::bind(&conn, &server.uri(), DB, name).unwrap()
}

fn seed(h: &CollectionHandle, n: i32) {
    for i in 0..n {
        h.insert_one(&doc! { "i": i, "odd": (i % 2 == 1) }).unwrap();
    }
}

fn batched(n: u32) -> FindOptions {
    FindOptions { batch_size: Some(n), ..FindOptions::default() }
}

#[test]
fn small_batches_are_fetched_on_demand() {
    let server = server();
    let h = handle(&server, "paged");
    seed(&h, 10);
    let mut cursor = h.find(doc! {}, &batched(3)).unwrap();
    assert_eq!(cursor.buffered(), 3);
    assert_ne!(cursor.id(), 0);
    assert_eq!(server.open_cursors(), 1);

    let mut seen = Vec::new();
    while let Some(d) = cursor.advance().unwrap() {
        seen.push(d.get_i32("i").unwrap());
        assert!(cursor.buffered() <= 3);
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(cursor.id(), 0);
    assert_eq!(server.open_cursors(), 0);
    assert!(cursor.advance().unwrap().is_none());
}

#[test]
fn dropping_an_active_cursor_kills_it() {
    let server = server();
    let h = handle(&server, "killed");
    seed(&h, 6);
    {
        let mut cursor = h.find(doc! {}, &batched(2)).unwrap();
        assert!(cursor.advance().unwrap().is_some());
        assert_eq!(server.open_cursors(), 1);
    }
    assert_eq!(server.open_cursors(), 0);
}

#[test]
fn explicit_close_is_final() {
    let server = server();
    let h = handle(&server, "closed");
    seed(&h, 4);
    let mut cursor = h.find(doc! {}, &batched(1)).unwrap();
    cursor.close();
    cursor.close();
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert!(cursor.advance().unwrap().is_none());
    assert_eq!(server.open_cursors(), 0);
}

#[test]
fn results_fitting_one_batch_need_no_server_cursor() {
    let server = server();
    let h = handle(&server, "single");
    seed(&h, 3);
    let cursor = h.find(doc! {}, &FindOptions::default()).unwrap();
    assert_eq!(cursor.id(), 0);
    assert_eq!(server.open_cursors(), 0);
    assert_eq!(cursor.collect::<Result<Vec<_>, _>>().unwrap().len(), 3);
}

#[test]
fn find_options_reach_the_server() {
    let server = server();
    let h = handle(&server, "opts");
    seed(&h, 10);
    let options = FindOptions {
        batch_size: Some(2),
        limit: Some(3),
        skip: Some(1),
        sort: Some(doc! { "i": -1 }),
        projection: Some(doc! { "i": 1, "_id": 0 }),
    };
    let docs: Vec<Document> = h.find(doc! { "odd": false }, &options).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(docs, vec![doc! { "i": 6 }, doc! { "i": 4 }, doc! { "i": 2 }]);
}

#[test]
fn failed_get_more_exhausts_and_reports() {
    let server = server();
    let h = handle(&server, "vanishing");
    seed(&h, 5);
    let mut cursor = h.find(doc! {}, &batched(2)).unwrap();
    assert!(cursor.advance().unwrap().is_some());
    assert!(cursor.advance().unwrap().is_some());
    h.drop_collection().unwrap();
    let err = cursor.advance().unwrap_err();
    assert!(matches!(err, DbError::Query { code: Some(43), .. }), "{err:?}");
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert!(cursor.advance().unwrap().is_none());
}

#[test]
fn server_rejected_find_is_a_query_error() {
    let server = server();
    let h = handle(&server, "rejected");
    let err = h.find(doc! { "a": { "$nope": 1 } }, &FindOptions::default()).unwrap_err();
    assert!(matches!(err, DbError::Query { code: Some(2), .. }));
}
