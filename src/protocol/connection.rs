use futures::{FutureExt, SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::DataProxyError;
use crate::protocol::{Packet, ProxyCodec, Response};
use crate::query::normalize_sql;
use crate::session::{QueryRouter, RoutedTo, SessionPhase, SessionState};

/// One client connection driven through its lifecycle.
///
/// Queries are handled strictly one at a time. A read failure, a cancelled
/// token or a fault while answering a query closes the connection.
pub struct Connection<S> {
    framed: Framed<S, ProxyCodec>,
    state: SessionState,
    router: Arc<QueryRouter>,
    shutdown: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        id: u64,
        peer: SocketAddr,
        router: Arc<QueryRouter>,
        shutdown: CancellationToken,
    ) -> Self {
        Connection {
            framed: Framed::new(stream, ProxyCodec::new()),
            state: SessionState::new(id, peer),
            router,
            shutdown,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session until the client leaves, the server shuts down or a
    /// fault ends it.
    pub async fn run(mut self) -> Result<(), DataProxyError> {
        let result = self.drive().await;
        self.state.close();
        info!("Client {} ({}) disconnected", self.state.id, self.state.peer);
        result
    }

    async fn drive(&mut self) -> Result<(), DataProxyError> {
        self.framed.send(Response::Handshake).await?;
        self.state.advance(SessionPhase::HandshakeSent);

        self.state.advance(SessionPhase::AuthPending);
        if self.next_packet().await?.is_none() {
            debug!("Client {} left before authenticating", self.state.id);
            return Ok(());
        }
        self.framed.send(Response::Ok { rows_affected: 0 }).await?;
        self.state.advance(SessionPhase::Authenticated);
        info!("Client {} authenticated", self.state.id);

        self.state.advance(SessionPhase::QueryWait);
        while let Some(packet) = self.next_packet().await? {
            let query = packet.query_text();
            if query.is_empty() {
                continue;
            }

            self.state.advance(SessionPhase::QueryExec);
            self.handle_query(&query).await?;
            self.state.advance(SessionPhase::QueryWait);
        }
        Ok(())
    }

    /// Next frame, or `None` when the peer closed or the server is shutting
    /// down.
    async fn next_packet(&mut self) -> Result<Option<Packet>, DataProxyError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("Client {} closed by server shutdown", self.state.id);
                Ok(None)
            }
            packet = self.framed.next() => match packet {
                Some(Ok(packet)) => Ok(Some(packet)),
                Some(Err(e)) => Err(DataProxyError::Protocol(format!("failed to read packet: {e}"))),
                None => Ok(None),
            },
        }
    }

    async fn handle_query(&mut self, query: &str) -> Result<(), DataProxyError> {
        info!(
            "Client {} query: {}",
            self.state.id,
            query.chars().take(100).collect::<String>()
        );

        if let Some(database) = parse_use_statement(query) {
            debug!("Client {} selected database {}", self.state.id, database);
            self.state.current_database = Some(database);
            self.framed.send(Response::Ok { rows_affected: 0 }).await?;
            return Ok(());
        }

        let router = self.router.clone();
        let outcome = match AssertUnwindSafe(router.route(query)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Client {}: query handler panicked", self.state.id);
                return self.fail("Internal error: query handler failed").await;
            }
        };

        match outcome.routed_to() {
            RoutedTo::Local => info!("Query routed to local database"),
            RoutedTo::Production => info!("Query routed to production database"),
            RoutedTo::Rejected | RoutedTo::Error => {
                warn!(
                    "Query failed: {}",
                    outcome.error_message().unwrap_or_default()
                );
            }
        }

        match self.framed.send(Response::from_outcome(&outcome)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                error!("Client {}: error sending results: {}", self.state.id, e);
                self.fail(&format!("Failed to send results: {e}")).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Report a fault to the client and end the session.
    async fn fail(&mut self, message: &str) -> Result<(), DataProxyError> {
        self.framed.send(Response::error(message)).await?;
        Err(DataProxyError::Protocol(message.to_string()))
    }
}

/// Database named by a `USE <db>` statement. Comments are ignored.
pub fn parse_use_statement(query: &str) -> Option<String> {
    let normalized = normalize_sql(query);
    let mut words = normalized.trim_end_matches(';').split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("USE") {
        return None;
    }
    let name = words.next()?.trim_end_matches(';').trim_matches('`');
    if name.is_empty() || words.next().is_some() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_response, encode_packet};
    use crate::protocol::{DecodedResponse, HANDSHAKE_LEN};
    use crate::store::mock::MockStore;
    use crate::store::{BackingStore, Target};
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[test]
    fn test_parse_use_statement() {
        assert_eq!(parse_use_statement("USE analytics"), Some("analytics".into()));
        assert_eq!(parse_use_statement("use `shop`;"), Some("shop".into()));
        assert_eq!(parse_use_statement("USE shop -- pick db"), Some("shop".into()));
        assert_eq!(parse_use_statement("USE shop;  /* x */"), Some("shop".into()));
        assert_eq!(parse_use_statement("/* warm up */ USE shop ;"), Some("shop".into()));
        assert_eq!(parse_use_statement("USE shop extra"), None);
        assert_eq!(parse_use_statement("USE"), None);
        assert_eq!(parse_use_statement("USER_VIEW"), None);
        assert_eq!(parse_use_statement("SELECT 1"), None);
    }

    struct Client {
        stream: DuplexStream,
        buf: Vec<u8>,
    }

    impl Client {
        async fn send(&mut self, sql: &str) {
            let mut frame = BytesMut::new();
            encode_packet(0, sql.as_bytes(), &mut frame).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }

        async fn response(&mut self) -> DecodedResponse {
            loop {
                if let Some((decoded, used)) = decode_response(&self.buf) {
                    self.buf.drain(..used);
                    return decoded;
                }
                let mut chunk = [0u8; 512];
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    async fn connect(store: Arc<MockStore>) -> (Client, tokio::task::JoinHandle<Result<(), DataProxyError>>, CancellationToken) {
        let (client, server) = tokio::io::duplex(4096);
        let backing: Arc<dyn BackingStore> = store;
        let router = Arc::new(QueryRouter::new(backing));
        let token = CancellationToken::new();
        let conn = Connection::new(server, 1, "127.0.0.1:9".parse().unwrap(), router, token.clone());
        let handle = tokio::spawn(conn.run());

        let mut client = Client { stream: client, buf: Vec::new() };
        let mut greeting = [0u8; HANDSHAKE_LEN];
        client.stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting[0], 0x0a);
        client.send("any credentials").await;
        assert_eq!(client.response().await, DecodedResponse::Ok { rows_affected: 0 });
        (client, handle, token)
    }

    #[tokio::test]
    async fn test_write_is_acknowledged() {
        let store = Arc::new(MockStore::default().with_production_table("logs"));
        let (mut client, _handle, _token) = connect(store.clone()).await;

        client.send("INSERT INTO logs (name) VALUES ('x')").await;
        assert_eq!(client.response().await, DecodedResponse::Ok { rows_affected: 1 });
        assert!(store.executed_on(Target::Production).is_empty());
    }

    #[tokio::test]
    async fn test_rejection_keeps_session_open() {
        let store = Arc::new(MockStore::default());
        let (mut client, _handle, _token) = connect(store).await;

        client.send("DROP DATABASE prod").await;
        assert!(client.response().await.is_error());

        client.send("USE shop").await;
        assert_eq!(client.response().await, DecodedResponse::Ok { rows_affected: 0 });
    }

    #[tokio::test]
    async fn test_commented_use_is_intercepted() {
        let store = Arc::new(MockStore::default());
        let (mut client, _handle, _token) = connect(store.clone()).await;

        client.send("USE shop -- pick db").await;
        assert_eq!(client.response().await, DecodedResponse::Ok { rows_affected: 0 });
        assert!(store.executed_on(Target::Production).is_empty());
        assert!(store.executed_on(Target::Local).is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_gets_no_response() {
        let store = Arc::new(MockStore::default());
        let (mut client, _handle, _token) = connect(store.clone()).await;

        client.send("   ").await;
        client.send("SELECT 1").await;
        assert_eq!(client.response().await, DecodedResponse::Empty);
        assert_eq!(store.executed_on(Target::Production), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_unrepresentable_result_closes_session() {
        let rows = crate::store::ResultSet::new(
            vec!["body".into()],
            vec![vec![crate::store::Value::Text("x".repeat(400))]],
        );
        let store = Arc::new(MockStore::default().with_rows(Target::Production, "SELECT body FROM notes", rows));
        let (mut client, handle, _token) = connect(store).await;

        client.send("SELECT body FROM notes").await;
        assert!(client.response().await.is_error());
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_ends_session() {
        let store = Arc::new(MockStore::default());
        let (_client, handle, token) = connect(store).await;
        token.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_a_protocol_error() {
        let store = Arc::new(MockStore::default());
        let (mut client, handle, _token) = connect(store).await;
        client.stream.write_all(&[0x10, 0x00, 0x00, 0x00, b'S']).await.unwrap();
        drop(client);
        assert!(matches!(handle.await.unwrap(), Err(DataProxyError::Protocol(_))));
    }
}
