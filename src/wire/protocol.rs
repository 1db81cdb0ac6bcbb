use bson::Document;
use bytes::{BufMut, BytesMut};
use std::io::{Read, Write};

use super::types::{
    HEADER_LEN, MAX_MESSAGE_SIZE, MsgFlags, MsgHeader, OpCode, OpMsg, SectionKind, WireError,
};

/// Parse a message header from the first 16 bytes of `data`.
///
/// # Errors
/// Fails when fewer than 16 bytes are given, the opcode is unknown, or the
/// declared length is outside `[16, MAX_MESSAGE_SIZE]`.
pub fn parse_header(data: &[u8]) -> Result<MsgHeader, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::Protocol("header too short".into()));
    }
    let message_length = read_i32(data, 0)?;
    let request_id = read_i32(data, 4)?;
    let response_to = read_i32(data, 8)?;
    let op_code = OpCode::try_from(read_i32(data, 12)? as u32)?;
    let len = usize::try_from(message_length)
        .map_err(|_| WireError::Protocol(format!("negative message length {message_length}")))?;
    if !(HEADER_LEN..=MAX_MESSAGE_SIZE).contains(&len) {
        return Err(WireError::Protocol(format!("message length {len} out of range")));
    }
    Ok(MsgHeader { message_length, request_id, response_to, op_code })
}

pub fn serialize_header(header: &MsgHeader, buf: &mut BytesMut) {
    buf.put_i32_le(header.message_length);
    buf.put_i32_le(header.request_id);
    buf.put_i32_le(header.response_to);
    buf.put_u32_le(header.op_code as u32);
}

/// Frame `msg` as a complete OP_MSG, header included. The checksum flag is
/// never set on outgoing messages.
///
/// # Errors
/// Fails when a document cannot be encoded or the result exceeds
/// `MAX_MESSAGE_SIZE`.
pub fn encode_op_msg(request_id: i32, response_to: i32, msg: &OpMsg) -> Result<BytesMut, WireError> {
    let mut payload = BytesMut::new();
    payload.put_u32_le(msg.flags.0 & !MsgFlags::CHECKSUM_PRESENT);
    payload.put_u8(SectionKind::Body as u8);
    payload.extend_from_slice(&document_bytes(&msg.body)?);
    for (identifier, docs) in &msg.sequences {
        let mut section = BytesMut::new();
        section.extend_from_slice(identifier.as_bytes());
        section.put_u8(0);
        for doc in docs {
            section.extend_from_slice(&document_bytes(doc)?);
        }
        payload.put_u8(SectionKind::DocumentSequence as u8);
        payload.put_i32_le(to_i32(section.len() + 4)?);
        payload.extend_from_slice(&section);
    }

    let total = HEADER_LEN + payload.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(WireError::Protocol(format!("message of {total} bytes exceeds limit")));
    }
    let mut buf = BytesMut::with_capacity(total);
    serialize_header(
        &MsgHeader { message_length: to_i32(total)?, request_id, response_to, op_code: OpCode::Msg },
        &mut buf,
    );
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode the part of an OP_MSG that follows the header.
///
/// # Errors
/// Fails on truncated input, unknown required flag bits, unknown section
/// kinds, a missing or repeated body section, or invalid BSON.
pub fn decode_op_msg(data: &[u8]) -> Result<OpMsg, WireError> {
    if data.len() < 5 {
        return Err(WireError::Protocol("OP_MSG too short".into()));
    }
    let flags = MsgFlags(read_i32(data, 0)? as u32);
    if flags.unknown_required_bits() != 0 {
        return Err(WireError::Protocol(format!("unsupported OP_MSG flags {:#x}", flags.0)));
    }
    let end = if flags.contains(MsgFlags::CHECKSUM_PRESENT) {
        data.len()
            .checked_sub(4)
            .filter(|e| *e > 4)
            .ok_or_else(|| WireError::Protocol("OP_MSG too short for checksum".into()))?
    } else {
        data.len()
    };

    let mut body: Option<Document> = None;
    let mut sequences = Vec::new();
    let mut pos = 4;
    while pos < end {
        let kind = data[pos];
        pos += 1;
        if kind == SectionKind::Body as u8 {
            let (doc, used) = read_document(&data[pos..end])?;
            if body.replace(doc).is_some() {
                return Err(WireError::Protocol("OP_MSG has more than one body section".into()));
            }
            pos += used;
        } else if kind == SectionKind::DocumentSequence as u8 {
            let size = usize::try_from(read_i32(&data[..end], pos)?)
                .map_err(|_| WireError::Protocol("negative section size".into()))?;
            let section_end = pos
                .checked_add(size)
                .filter(|e| *e <= end && size >= 5)
                .ok_or_else(|| WireError::Protocol("document sequence overruns message".into()))?;
            let (identifier, used) = read_cstring(&data[pos + 4..section_end])?;
            let mut cur = pos + 4 + used;
            let mut docs = Vec::new();
            while cur < section_end {
                let (doc, used) = read_document(&data[cur..section_end])?;
                docs.push(doc);
                cur += used;
            }
            sequences.push((identifier, docs));
            pos = section_end;
        } else {
            return Err(WireError::Protocol(format!("unsupported section kind {kind}")));
        }
    }

    let body = body.ok_or_else(|| WireError::Protocol("OP_MSG has no body section".into()))?;
    Ok(OpMsg { flags, body, sequences })
}

/// Write one framed OP_MSG to a blocking stream.
///
/// # Errors
/// Propagates encoding and I/O failures.
pub fn write_message<W: Write>(
    writer: &mut W,
    request_id: i32,
    response_to: i32,
    msg: &OpMsg,
) -> Result<(), WireError> {
    let frame = encode_op_msg(request_id, response_to, msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one complete message from a blocking stream.
///
/// # Errors
/// Propagates I/O failures; non-`OP_MSG` opcodes are a protocol error.
pub fn read_message<R: Read>(reader: &mut R) -> Result<(MsgHeader, OpMsg), WireError> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head)?;
    let header = parse_header(&head)?;
    let mut body = vec![0u8; header.message_length as usize - HEADER_LEN];
    reader.read_exact(&mut body)?;
    if header.op_code != OpCode::Msg {
        return Err(WireError::Protocol(format!("unexpected opcode {:?}", header.op_code)));
    }
    Ok((header, decode_op_msg(&body)?))
}

fn document_bytes(doc: &Document) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    doc.to_writer(&mut out).map_err(|e| WireError::Bson(e.to_string()))?;
    Ok(out)
}

fn read_document(data: &[u8]) -> Result<(Document, usize), WireError> {
    let len = usize::try_from(read_i32(data, 0)?)
        .map_err(|_| WireError::Protocol("negative document length".into()))?;
    if len < 5 || len > data.len() {
        return Err(WireError::Protocol(format!("document length {len} out of range")));
    }
    let doc = Document::from_reader(&data[..len]).map_err(|e| WireError::Bson(e.to_string()))?;
    Ok((doc, len))
}

fn read_cstring(data: &[u8]) -> Result<(String, usize), WireError> {
    let nul = data
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| WireError::Protocol("unterminated identifier".into()))?;
    let s = std::str::from_utf8(&data[..nul])
        .map_err(|_| WireError::Protocol("identifier is not UTF-8".into()))?;
    Ok((s.to_string(), nul + 1))
}

fn read_i32(data: &[u8], at: usize) -> Result<i32, WireError> {
    data.get(at..at + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(i32::from_le_bytes)
        .ok_or_else(|| WireError::Protocol("truncated message".into()))
}

fn to_i32(n: usize) -> Result<i32, WireError> {
    i32::try_from(n).map_err(|_| WireError::Protocol(format!("length {n} does not fit in i32")))
}
