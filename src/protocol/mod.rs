// Module for the client-facing wire protocol
pub mod codec;
pub mod connection;
pub mod messages;

pub use codec::{ProxyCodec, decode_response, encode_packet};
pub use connection::Connection;
pub use messages::*;
