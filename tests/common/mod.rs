#![allow(dead_code)]

use docbridge::Operator;
use docbridge::server::MemoryServer;

pub const DB: &str = "docbridge_test";

pub fn server() -> MemoryServer {
    MemoryServer::start().expect("memory server")
}

/// An operator initialized against `server` on collection `name`.
pub fn ready(server: &MemoryServer, name: &str) -> Operator {
    let mut op = Operator::new();
    op.init(&server.uri(), DB, name).expect("init");
    op
}

/// Every document the operator's next `select_all` yields.
pub fn drain_all(op: &mut Operator) -> Vec<bson::Document> {
    op.select_all().expect("select_all");
    std::iter::from_fn(|| op.read()).collect()
}
