//! Message framing for the document store's wire protocol.
//!
//! Only `OP_MSG` (opcode 2013) is produced or accepted. Every message is a
//! 16 byte header followed by flag bits and one or more sections: a single
//! body document (kind 0) and any number of document sequences (kind 1).

mod protocol;
mod types;

pub use protocol::{
    decode_op_msg, encode_op_msg, parse_header, read_message, serialize_header, write_message,
};
pub use types::{
    HEADER_LEN, MAX_MESSAGE_SIZE, MsgFlags, MsgHeader, OpCode, OpMsg, SectionKind, WireError,
};
