mod common;

use bson::doc;
use bytes::BufMut;
use common::server;
use docbridge::wire::{HEADER_LEN, MsgFlags, OpMsg, read_message, write_message};
use std::io::{Read, Write};
use std::net::TcpStream;

fn connect(server: &docbridge::server::MemoryServer) -> TcpStream {
    TcpStream::connect(server.local_addr()).unwrap()
}

#[test]
fn answers_with_the_request_id() {
    let server = server();
    let mut stream = connect(&server);
    write_message(&mut stream, 41, 0, &OpMsg::new(doc! { "ping": 1, "$db": "admin" })).unwrap();
    let (header, reply) = read_message(&mut stream).unwrap();
    assert_eq!(header.response_to, 41);
    assert_eq!(reply.body.get_f64("ok").unwrap(), 1.0);
}

#[test]
fn document_sequences_carry_inserted_documents() {
    let server = server();
    let mut stream = connect(&server);
    let mut msg = OpMsg::new(doc! { "insert": "seq", "$db": "t" });
    msg.sequences.push(("documents".into(), vec![doc! { "a": 1 }, doc! { "a": 2 }]));
    write_message(&mut stream, 1, 0, &msg).unwrap();
    let (_, reply) = read_message(&mut stream).unwrap();
    assert_eq!(reply.body.get_i64("n").unwrap(), 2);
}

#[test]
fn more_to_come_requests_get_no_reply() {
    let server = server();
    let mut stream = connect(&server);
    let mut quiet = OpMsg::new(doc! { "insert": "quiet", "$db": "t", "documents": [{ "a": 1 }] });
    quiet.flags = MsgFlags(MsgFlags::MORE_TO_COME);
    write_message(&mut stream, 1, 0, &quiet).unwrap();
    write_message(&mut stream, 2, 0, &OpMsg::new(doc! { "count": "quiet", "$db": "t" })).unwrap();
    let (header, reply) = read_message(&mut stream).unwrap();
    assert_eq!(header.response_to, 2);
    assert_eq!(reply.body.get_i64("n").unwrap(), 1);
}

#[test]
fn legacy_opcodes_get_an_error_reply() {
    let server = server();
    let mut stream = connect(&server);
    // OP_QUERY with an empty body: only the opcode matters here.
    let mut frame = bytes::BytesMut::new();
    frame.put_i32_le(i32::try_from(HEADER_LEN + 4).unwrap());
    frame.put_i32_le(9);
    frame.put_i32_le(0);
    frame.put_u32_le(2004);
    frame.put_i32_le(0);
    stream.write_all(&frame).unwrap();
    let (header, reply) = read_message(&mut stream).unwrap();
    assert_eq!(header.response_to, 9);
    assert_eq!(reply.body.get_f64("ok").unwrap(), 0.0);
}

#[test]
fn garbage_header_drops_the_connection() {
    let server = server();
    let mut stream = connect(&server);
    stream.write_all(&[0xff; HEADER_LEN]).unwrap();
    let mut buf = [0u8; 1];
    // The server closes its side; the read sees EOF or a reset.
    assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));
    // A fresh connection is still served.
    let mut again = connect(&server);
    write_message(&mut again, 1, 0, &OpMsg::new(doc! { "ping": 1, "$db": "admin" })).unwrap();
    assert!(read_message(&mut again).is_ok());
}

#[test]
fn shutdown_stops_accepting() {
    let server = server();
    let addr = server.local_addr();
    server.shutdown();
    let refused = TcpStream::connect(addr)
        .and_then(|mut s| {
            s.write_all(&[0u8; 4])?;
            let mut buf = [0u8; 1];
            s.read(&mut buf)
        });
    assert!(matches!(refused, Ok(0) | Err(_)));
}
