use bson::{Document, doc};
use parking_lot::Mutex;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use super::uri::{ClientOptions, ServerAddress};
use crate::document::{get_int, get_str, is_ok};
use crate::errors::DbError;
use crate::wire::{OpMsg, WireError, encode_op_msg, read_message};

/// The connection as shared between an operator, its collection handle and
/// its cursor.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// OP_MSG arrived with wire version 6.
const MIN_WIRE_VERSION: i64 = 6;
const COMMAND_NOT_FOUND: i32 = 59;
const UNKNOWN_ERROR: i32 = 8;
const DRIVER_NAME: &str = env!("CARGO_PKG_NAME");
const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Limits the server advertised during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub max_wire_version: i64,
    pub max_bson_object_size: usize,
    pub max_message_size: usize,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            max_wire_version: 0,
            max_bson_object_size: 16 * 1024 * 1024,
            max_message_size: crate::wire::MAX_MESSAGE_SIZE,
        }
    }
}

/// One blocking link to a server. Every command is a single request/reply
/// exchange; nothing is pipelined.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    options: ClientOptions,
    peer: Option<ServerAddress>,
    server: ServerInfo,
    next_request_id: i32,
}

impl Connection {
    /// Parse `uri`, reach the first answering seed host and handshake.
    ///
    /// # Errors
    /// `DbError::InvalidUri` for a malformed URI, `DbError::Connect` when no
    /// host can be reached or the handshake fails.
    pub fn connect(uri: &str) -> Result<Self, DbError> {
        Self::connect_with(ClientOptions::parse(uri)?)
    }

    /// # Errors
    /// `DbError::Connect` when no host answers the handshake.
    pub fn connect_with(options: ClientOptions) -> Result<Self, DbError> {
        let mut failures = Vec::new();
        for addr in &options.hosts {
            let stream = match open_stream(addr, options.connect_timeout) {
                Ok(s) => s,
                Err(e) => {
                    log::debug!("connect to {addr} failed: {e}");
                    failures.push(format!("{addr}: {e}"));
                    continue;
                }
            };
            let mut conn = Self {
                stream: Some(stream),
                options: options.clone(),
                peer: Some(addr.clone()),
                server: ServerInfo::default(),
                next_request_id: 0,
            };
            match conn.handshake() {
                Ok(()) => {
                    log::info!(
                        "connected to {addr} (wire version {})",
                        conn.server.max_wire_version
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    log::debug!("handshake with {addr} failed: {e}");
                    failures.push(format!("{addr}: {e}"));
                    conn.close();
                }
            }
        }
        Err(DbError::Connect(format!("no reachable server ({})", failures.join("; "))))
    }

    #[must_use]
    pub fn into_shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    #[must_use]
    pub const fn peer(&self) -> Option<&ServerAddress> {
        self.peer.as_ref()
    }

    #[must_use]
    pub const fn server_info(&self) -> ServerInfo {
        self.server
    }

    /// Run `command` against database `db` and return the reply body.
    ///
    /// A reply with `ok != 1` becomes `WireError::Command`. After an I/O or
    /// framing failure the connection is closed and every later call fails
    /// with `WireError::Closed`.
    ///
    /// # Errors
    /// See above.
    pub fn run_command(&mut self, db: &str, mut command: Document) -> Result<Document, WireError> {
        let name = command.keys().next().cloned().unwrap_or_default();
        command.insert("$db", db);
        log::trace!("-> {name} on {db}");
        let result = self.round_trip(command);
        if let Err(e) = &result {
            if e.breaks_connection() && self.is_open() {
                log::warn!("{name} failed on the wire, closing connection: {e}");
                self.close();
            }
        }
        let reply = result?;
        if is_ok(&reply) {
            Ok(reply)
        } else {
            let err = command_error(&reply);
            log::debug!("<- {name} rejected: {err}");
            Err(err)
        }
    }

    /// # Errors
    /// Fails when the server does not answer a `ping`.
    pub fn ping(&mut self) -> Result<(), WireError> {
        self.run_command("admin", doc! { "ping": 1 }).map(|_| ())
    }

    /// Shut the socket down. Safe on a closed or never-opened connection.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            if let Some(peer) = &self.peer {
                log::info!("closed connection to {peer}");
            }
        }
    }

    fn round_trip(&mut self, command: Document) -> Result<Document, WireError> {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let request_id = self.next_request_id;
        let frame = encode_op_msg(request_id, 0, &OpMsg::new(command))?;
        if frame.len() > self.server.max_message_size {
            return Err(WireError::Bson(format!(
                "command of {} bytes exceeds the server limit of {}",
                frame.len(),
                self.server.max_message_size
            )));
        }
        let stream = self.stream.as_mut().ok_or(WireError::Closed)?;
        stream.write_all(&frame)?;
        stream.flush()?;
        let (header, reply) = read_message(stream)?;
        if header.response_to != request_id {
            return Err(WireError::Protocol(format!(
                "reply to request {} while waiting for {request_id}",
                header.response_to
            )));
        }
        Ok(reply.into_command())
    }

    fn handshake(&mut self) -> Result<(), WireError> {
        // The handshake is bounded by the connect timeout, not the socket one.
        self.set_timeout(Some(self.options.connect_timeout))?;
        let reply = match self.run_command("admin", self.hello_command("hello")) {
            Err(WireError::Command { code: COMMAND_NOT_FOUND, .. }) => {
                self.run_command("admin", self.hello_command("isMaster"))?
            }
            other => other?,
        };
        let max_wire_version = get_int(&reply, "maxWireVersion").unwrap_or(0);
        if max_wire_version < MIN_WIRE_VERSION {
            return Err(WireError::Protocol(format!(
                "server wire version {max_wire_version} does not support OP_MSG"
            )));
        }
        let defaults = ServerInfo::default();
        self.server = ServerInfo {
            max_wire_version,
            max_bson_object_size: get_int(&reply, "maxBsonObjectSize")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_bson_object_size),
            max_message_size: get_int(&reply, "maxMessageSizeBytes")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_message_size),
        };
        self.set_timeout(self.options.socket_timeout)?;
        Ok(())
    }

    fn hello_command(&self, verb: &str) -> Document {
        let mut client = doc! {
            "driver": { "name": DRIVER_NAME, "version": DRIVER_VERSION },
            "os": { "type": std::env::consts::OS },
        };
        if let Some(app) = &self.options.app_name {
            client.insert("application", doc! { "name": app.as_str() });
        }
        let mut command = Document::new();
        command.insert(verb, 1);
        command.insert("helloOk", true);
        command.insert("client", client);
        command
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), WireError> {
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_stream(addr: &ServerAddress, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for sa in (addr.host.as_str(), addr.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&sa, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

fn command_error(reply: &Document) -> WireError {
    let code = get_int(reply, "code").and_then(|c| i32::try_from(c).ok()).unwrap_or(UNKNOWN_ERROR);
    WireError::Command {
        code,
        code_name: get_str(reply, "codeName").map(str::to_string),
        message: get_str(reply, "errmsg").unwrap_or("command failed").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_reads_code_and_message() {
        let err = command_error(&doc! { "ok": 0.0, "errmsg": "bad", "code": 2, "codeName": "BadValue" });
        match err {
            WireError::Command { code, code_name, message } => {
                assert_eq!(code, 2);
                assert_eq!(code_name.as_deref(), Some("BadValue"));
                assert_eq!(message, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(command_error(&doc! { "ok": 0 }).code(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn unreachable_host_is_a_connect_error() {
        // Port 1 on loopback is closed on any sane test host.
        let err = Connection::connect("mongodb://127.0.0.1:1/?connectTimeoutMS=200").unwrap_err();
        assert!(matches!(err, DbError::Connect(_)), "{err:?}");
    }

    #[test]
    fn close_is_idempotent() {
        let options = ClientOptions::parse("mongodb://localhost").unwrap();
        let mut conn = Connection {
            stream: None,
            options,
            peer: None,
            server: ServerInfo::default(),
            next_request_id: 0,
        };
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(matches!(conn.run_command("db", doc! { "ping": 1 }), Err(WireError::Closed)));
    }
}
