use bytes::BytesMut;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use dataproxy::ProxyServer;
use dataproxy::config::Config;
use dataproxy::protocol::{DecodedResponse, HANDSHAKE_LEN, decode_response, encode_packet};
use dataproxy::session::QueryRouter;
use dataproxy::store::{BackingStore, SqliteBackends};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub const PRODUCTION_SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        status TEXT DEFAULT 'active'
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL,
        total REAL
    );
    INSERT INTO users (name, email) VALUES ('alice', 'alice@example.com');
    INSERT INTO users (name, email) VALUES ('bob', 'bob@example.com');
    INSERT INTO orders (id, user_id, total) VALUES (1, 1, 12.5);
";

pub struct TestServer {
    pub server: Arc<ProxyServer>,
    pub store: Arc<SqliteBackends>,
    pub dir: TempDir,
    pub serve_handle: tokio::task::JoinHandle<dataproxy::Result<()>>,
}

impl TestServer {
    pub fn production_path(&self) -> PathBuf {
        self.dir.path().join("production.db")
    }

    pub fn local_path(&self) -> PathBuf {
        self.dir.path().join("local.db")
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(&self.server).await
    }

    /// Row count of `table` read directly from a database file.
    #[allow(dead_code)]
    pub fn count_rows(&self, path: PathBuf, table: &str) -> i64 {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[allow(dead_code)]
    pub async fn stop(self) {
        self.server.shutdown();
        self.serve_handle.await.unwrap().unwrap();
        self.store.close().await;
    }
}

/// Seed a production database in a temp dir and serve it on an ephemeral
/// port.
pub async fn setup_test_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let production = dir.path().join("production.db");
    let local = dir.path().join("local.db");

    rusqlite::Connection::open(&production)
        .unwrap()
        .execute_batch(PRODUCTION_SCHEMA)
        .unwrap();

    let config = Config::for_stores(
        production.to_string_lossy().into_owned(),
        local.to_string_lossy().into_owned(),
    );
    config.validate().unwrap();

    let store = Arc::new(
        SqliteBackends::open(&config.production_db, &config.local_db, config.pool_size).unwrap(),
    );
    store.init_local_metadata().await.unwrap();

    let backing: Arc<dyn BackingStore> = store.clone();
    let router = Arc::new(QueryRouter::new(backing));
    let server = Arc::new(ProxyServer::bind(&config, router).await.unwrap());

    let serve_handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    TestServer {
        server,
        store,
        dir,
        serve_handle,
    }
}

/// Speaks the proxy's framing over a raw socket.
pub struct TestClient {
    pub stream: TcpStream,
    buf: Vec<u8>,
    sequence: u8,
}

impl TestClient {
    /// Connect, read the greeting and authenticate.
    pub async fn connect(server: &ProxyServer) -> TestClient {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut client = TestClient {
            stream,
            buf: Vec::new(),
            sequence: 0,
        };

        let greeting = client.read_handshake().await;
        assert_eq!(greeting[0], 0x0a);
        assert_eq!(&greeting[1..22], b"mysql_native_password");

        client.send_raw(b"user=test").await;
        assert_eq!(client.response().await, DecodedResponse::Ok { rows_affected: 0 });
        client
    }

    pub async fn read_handshake(&mut self) -> Vec<u8> {
        let mut greeting = vec![0u8; HANDSHAKE_LEN];
        tokio::time::timeout(READ_TIMEOUT, self.stream.read_exact(&mut greeting))
            .await
            .expect("timed out waiting for handshake")
            .unwrap();
        greeting
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        let mut frame = BytesMut::new();
        encode_packet(self.sequence, payload, &mut frame).unwrap();
        self.sequence = self.sequence.wrapping_add(1);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn response(&mut self) -> DecodedResponse {
        loop {
            if let Some((decoded, used)) = decode_response(&self.buf) {
                self.buf.drain(..used);
                return decoded;
            }
            let mut chunk = [0u8; 1024];
            let n = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for response")
                .unwrap();
            assert!(n > 0, "server closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn query(&mut self, sql: &str) -> DecodedResponse {
        self.send_raw(sql.as_bytes()).await;
        self.response().await
    }

    /// True once the server has closed the socket.
    #[allow(dead_code)]
    pub async fn is_closed(&mut self) -> bool {
        let mut chunk = [0u8; 64];
        match tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }
}
