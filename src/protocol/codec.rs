use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::messages::*;
use crate::store::ResultSet;

const HEADER_LEN: usize = 4;

#[derive(Debug, Default, Clone)]
pub struct ProxyCodec;

impl ProxyCodec {
    pub fn new() -> Self {
        ProxyCodec
    }
}

impl Decoder for ProxyCodec {
    type Item = Packet;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = LittleEndian::read_u24(&src[..3]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let sequence = src[3];
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).to_vec();
        Ok(Some(Packet { sequence, payload }))
    }
}

impl Encoder<Response> for ProxyCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        debug!("Encoding response: {:?}", msg);
        match msg {
            Response::Handshake => encode_handshake(dst),
            Response::Ok { rows_affected } => encode_ok(rows_affected, dst),
            Response::ResultSet(rows) => encode_result_set(&rows, dst)?,
            Response::Empty => encode_empty(dst),
            Response::Error(message) => encode_error(&message, dst),
        }
        Ok(())
    }
}

/// Frame a statement the way a client sends it.
pub fn encode_packet(sequence: u8, payload: &[u8], dst: &mut BytesMut) -> io::Result<()> {
    if payload.len() > 0xff_ffff {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "packet payload too large"));
    }
    let mut header = [0u8; HEADER_LEN];
    LittleEndian::write_u24(&mut header[..3], payload.len() as u32);
    header[3] = sequence;
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&header);
    dst.put_slice(payload);
    Ok(())
}

fn encode_handshake(dst: &mut BytesMut) {
    dst.reserve(HANDSHAKE_LEN);
    dst.put_u8(PROTOCOL_VERSION);
    dst.put_slice(AUTH_PLUGIN);
    dst.put_bytes(0, HANDSHAKE_PADDING);
}

fn encode_ok(rows_affected: u64, dst: &mut BytesMut) {
    dst.reserve(10);
    dst.put_u8(OK_MARKER);
    dst.put_u64_le(wire_row_count(rows_affected));
    dst.put_u8(OK_MARKER);
}

/// Count as written in an acknowledgement. `00 FE` opens an empty-result
/// frame, so a count whose low byte is 0xFE is reported one lower.
fn wire_row_count(rows_affected: u64) -> u64 {
    if rows_affected & 0xff == EOF_MARKER as u64 {
        rows_affected - 1
    } else {
        rows_affected
    }
}

fn encode_empty(dst: &mut BytesMut) {
    dst.put_u8(OK_MARKER);
    dst.put_u8(EOF_MARKER);
}

fn encode_error(message: &str, dst: &mut BytesMut) {
    dst.reserve(1 + message.len());
    dst.put_u8(ERROR_MARKER);
    dst.put_slice(message.as_bytes());
}

/// Fields are checked before anything is written so a frame that cannot be
/// represented leaves `dst` untouched.
fn encode_result_set(rows: &ResultSet, dst: &mut BytesMut) -> io::Result<()> {
    let column_count = u8::try_from(rows.columns.len())
        .ok()
        .filter(|count| *count != ERROR_MARKER)
        .ok_or_else(|| unrepresentable(format!("{} columns", rows.columns.len())))?;

    let columns: Vec<String> = rows
        .columns
        .iter()
        .map(|name| format!("`{name}` {COLUMN_TYPE}"))
        .collect();
    let lines: Vec<String> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"))
        .collect();

    for field in columns.iter().chain(lines.iter()) {
        if !is_representable_field(field) {
            return Err(unrepresentable(format!("field of {} bytes", field.len())));
        }
    }

    dst.put_u8(column_count);
    for field in columns.iter().chain(lines.iter()) {
        dst.put_u8(field.len() as u8);
        dst.put_slice(field.as_bytes());
    }
    dst.put_u8(EOF_MARKER);
    Ok(())
}

fn is_representable_field(field: &str) -> bool {
    field.len() <= MAX_FIELD_LEN && field.len() != EOF_MARKER as usize
}

fn unrepresentable(what: String) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("result set not representable: {what} does not fit a one-byte length"),
    )
}

/// Decode one server response from the front of `buf`, as a client would.
///
/// Returns `None` while the response is incomplete. Error frames carry no
/// length, so everything after the marker is taken as the message.
pub fn decode_response(buf: &[u8]) -> Option<(DecodedResponse, usize)> {
    let (&marker, rest) = buf.split_first()?;
    match marker {
        ERROR_MARKER => Some((
            DecodedResponse::Error(String::from_utf8_lossy(rest).into_owned()),
            buf.len(),
        )),
        OK_MARKER => {
            let &next = rest.first()?;
            if next == EOF_MARKER {
                return Some((DecodedResponse::Empty, 2));
            }
            if rest.len() < 9 {
                return None;
            }
            let rows_affected = LittleEndian::read_u64(&rest[..8]);
            Some((DecodedResponse::Ok { rows_affected }, 10))
        }
        count => {
            let mut pos = 1;
            let mut columns = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (field, next) = read_field(buf, pos)?;
                columns.push(field);
                pos = next;
            }
            let mut rows = Vec::new();
            loop {
                if *buf.get(pos)? == EOF_MARKER {
                    return Some((DecodedResponse::Rows { columns, rows }, pos + 1));
                }
                let (field, next) = read_field(buf, pos)?;
                rows.push(field);
                pos = next;
            }
        }
    }
}

fn read_field(buf: &[u8], pos: usize) -> Option<(String, usize)> {
    let len = *buf.get(pos)? as usize;
    let bytes = buf.get(pos + 1..pos + 1 + len)?;
    Some((String::from_utf8_lossy(bytes).into_owned(), pos + 1 + len))
}
