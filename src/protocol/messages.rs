use crate::session::RoutingOutcome;
use crate::store::ResultSet;

/// Auth plugin name carried in the greeting.
pub const AUTH_PLUGIN: &[u8] = b"mysql_native_password";
pub const PROTOCOL_VERSION: u8 = 0x0a;
pub const HANDSHAKE_PADDING: usize = 20;
pub const HANDSHAKE_LEN: usize = 1 + AUTH_PLUGIN.len() + HANDSHAKE_PADDING;

pub const OK_MARKER: u8 = 0x00;
pub const EOF_MARKER: u8 = 0xfe;
pub const ERROR_MARKER: u8 = 0xff;

/// Placeholder type reported for every column.
pub const COLUMN_TYPE: &str = "varchar(255)";

/// Largest column definition or row a one-byte length can describe.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// One client frame: 3-byte little-endian length, sequence byte, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(sequence: u8, payload: impl Into<Vec<u8>>) -> Self {
        Packet {
            sequence,
            payload: payload.into(),
        }
    }

    /// Payload as statement text. Invalid UTF-8 sequences are dropped and the
    /// result is trimmed.
    pub fn query_text(&self) -> String {
        decode_query_text(&self.payload)
    }
}

pub fn decode_query_text(payload: &[u8]) -> String {
    let mut text = String::with_capacity(payload.len());
    for chunk in payload.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text.trim().to_string()
}

/// Everything the server writes to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Handshake,
    /// Write acknowledgement carrying an affected-row count.
    Ok { rows_affected: u64 },
    ResultSet(ResultSet),
    /// Successful statement without rows.
    Empty,
    Error(String),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    /// Frame reporting a routing outcome to the client.
    pub fn from_outcome(outcome: &RoutingOutcome) -> Self {
        if !outcome.success() {
            return Response::Error(
                outcome
                    .error_message()
                    .unwrap_or_else(|| "Query failed".to_string()),
            );
        }

        match outcome.data() {
            Some(rows) if !rows.is_empty() => Response::ResultSet(rows.clone()),
            Some(_) => Response::Empty,
            None => Response::Ok {
                rows_affected: outcome.rows_affected().unwrap_or(0),
            },
        }
    }
}

/// A server frame as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResponse {
    Ok { rows_affected: u64 },
    /// Column definitions and pipe-joined rows, as sent.
    Rows {
        columns: Vec<String>,
        rows: Vec<String>,
    },
    Empty,
    Error(String),
}

impl DecodedResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, DecodedResponse::Error(_))
    }

    /// Column names with the backticks and placeholder type removed.
    pub fn column_names(&self) -> Vec<String> {
        match self {
            DecodedResponse::Rows { columns, .. } => columns
                .iter()
                .map(|def| {
                    def.strip_suffix(COLUMN_TYPE)
                        .unwrap_or(def)
                        .trim()
                        .trim_matches('`')
                        .to_string()
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Rows split back into their pipe-separated values.
    pub fn row_values(&self) -> Vec<Vec<String>> {
        match self {
            DecodedResponse::Rows { rows, .. } => rows
                .iter()
                .map(|row| row.split('|').map(str::to_string).collect())
                .collect(),
            _ => Vec::new(),
        }
    }
}
