//! An in-process, in-memory server speaking the same `OP_MSG` command subset
//! as the client. It backs the integration tests and `docbridge serve`.
//!
//! The server runs its own tokio runtime on a dedicated thread so that the
//! blocking client can talk to it from ordinary synchronous code.

mod handlers;
mod matcher;
mod store;
mod update;

pub use handlers::{ServerSettings, ServerState};
pub use matcher::Filter;
pub use store::{IndexSpec, Store, StoreError};

use bson::doc;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::wire::{HEADER_LEN, MsgFlags, OpCode, OpMsg, WireError, decode_op_msg, encode_op_msg, parse_header};

/// Handle to a running memory server. Dropping it stops the server.
#[derive(Debug)]
pub struct MemoryServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MemoryServer {
    /// Listen on an ephemeral loopback port.
    ///
    /// # Errors
    /// Fails when the socket cannot be bound or the runtime cannot start.
    pub fn start() -> io::Result<Self> {
        Self::start_on("127.0.0.1:0")
    }

    /// # Errors
    /// See [`MemoryServer::start`].
    pub fn start_on(addr: &str) -> io::Result<Self> {
        Self::start_with(addr, ServerSettings::default())
    }

    /// # Errors
    /// See [`MemoryServer::start`].
    pub fn start_with(addr: &str, settings: ServerSettings) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        let state = Arc::new(ServerState::new(settings));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("docbridge-server")
            .enable_all()
            .build()?;
        let (tx, rx) = oneshot::channel();
        let task_state = Arc::clone(&state);
        let thread = std::thread::Builder::new().name("docbridge-server".into()).spawn(move || {
            runtime.block_on(async move {
                match TcpListener::from_std(listener) {
                    Ok(listener) => serve(listener, task_state, rx).await,
                    Err(e) => log::error!("memory server could not adopt its listener: {e}"),
                }
            });
        })?;
        log::info!("memory server listening on {local}");
        Ok(Self { addr: local, state, shutdown: Some(tx), thread: Some(thread) })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection string for this server.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("mongodb://{}/", self.addr)
    }

    /// Server cursors still holding results.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.state.store.lock().open_cursors()
    }

    #[must_use]
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stop accepting, drop open connections and wait for the server thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("memory server thread panicked");
            }
            log::info!("memory server on {} stopped", self.addr);
        }
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept connections until `shutdown` fires, one task per connection.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::debug!("memory server: connection from {peer}");
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        match handle_connection(stream, state).await {
                            Ok(()) => log::debug!("memory server: {peer} disconnected"),
                            Err(e) => log::warn!("memory server: connection from {peer} failed: {e}"),
                        }
                    });
                }
                Err(e) => log::warn!("memory server: accept failed: {e}"),
            },
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> Result<(), WireError> {
    stream.set_nodelay(true)?;
    let mut next_id = 0_i32;
    loop {
        let mut head = [0u8; HEADER_LEN];
        match stream.read_exact(&mut head).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let header = parse_header(&head)?;
        let mut body = vec![0u8; header.message_length as usize - HEADER_LEN];
        stream.read_exact(&mut body).await?;

        let reply = if header.op_code == OpCode::Msg {
            match decode_op_msg(&body) {
                Ok(msg) => {
                    let more_to_come = msg.flags.contains(MsgFlags::MORE_TO_COME);
                    let reply = state.handle_command(&msg.into_command());
                    if more_to_come {
                        continue;
                    }
                    reply
                }
                Err(e) => {
                    log::warn!("memory server: bad OP_MSG: {e}");
                    doc! { "ok": 0.0, "errmsg": e.to_string(), "code": 9, "codeName": "FailedToParse" }
                }
            }
        } else {
            log::warn!("memory server: unsupported opcode {:?}", header.op_code);
            doc! {
                "ok": 0.0,
                "errmsg": format!("unsupported opcode {:?}", header.op_code),
                "code": 352,
                "codeName": "UnsupportedOpQueryCommand",
            }
        };
        next_id = next_id.wrapping_add(1);
        let frame = encode_op_msg(next_id, header.request_id, &OpMsg::new(reply))?;
        stream.write_all(&frame).await?;
    }
}
