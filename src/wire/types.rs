use bson::{Bson, Document};
use thiserror::Error;

pub const HEADER_LEN: usize = 16;

/// Largest message either side accepts, header included.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Wire protocol opcodes. Only `Msg` is spoken; the rest are recognised so
/// that a peer using them gets a meaningful error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
    Compressed = 2012,
    Msg = 2013,
}

impl TryFrom<u32> for OpCode {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Reply,
            2001 => Self::Update,
            2002 => Self::Insert,
            2004 => Self::Query,
            2005 => Self::GetMore,
            2006 => Self::Delete,
            2007 => Self::KillCursors,
            2012 => Self::Compressed,
            2013 => Self::Msg,
            other => return Err(WireError::Protocol(format!("unknown opcode {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

/// OP_MSG flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgFlags(pub u32);

impl MsgFlags {
    pub const CHECKSUM_PRESENT: u32 = 1;
    pub const MORE_TO_COME: u32 = 1 << 1;
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;
    /// Bits 0-15 are "required": a receiver must reject bits it does not know.
    const REQUIRED_MASK: u32 = 0xFFFF;
    const KNOWN_REQUIRED: u32 = Self::CHECKSUM_PRESENT | Self::MORE_TO_COME;

    #[must_use]
    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    #[must_use]
    pub const fn unknown_required_bits(self) -> u32 {
        self.0 & Self::REQUIRED_MASK & !Self::KNOWN_REQUIRED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionKind {
    Body = 0,
    DocumentSequence = 1,
}

/// A decoded OP_MSG: the body plus any document sequences in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpMsg {
    pub flags: MsgFlags,
    pub body: Document,
    pub sequences: Vec<(String, Vec<Document>)>,
}

impl OpMsg {
    #[must_use]
    pub fn new(body: Document) -> Self {
        Self { flags: MsgFlags::default(), body, sequences: Vec::new() }
    }

    /// Folds document sequences into the body as arrays keyed by their
    /// identifier, which is how a command handler sees them.
    #[must_use]
    pub fn into_command(self) -> Document {
        let mut body = self.body;
        for (identifier, docs) in self.sequences {
            body.insert(identifier, Bson::Array(docs.into_iter().map(Bson::Document).collect()));
        }
        body
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("BSON error: {0}")]
    Bson(String),

    #[error("{message} (code {code})")]
    Command { code: i32, code_name: Option<String>, message: String },

    #[error("connection is closed")]
    Closed,
}

impl WireError {
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Command { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the link is left in an unknown state and must not be reused.
    #[must_use]
    pub const fn breaks_connection(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_) | Self::Closed)
    }
}
