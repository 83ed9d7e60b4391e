use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::protocol::Connection;
use crate::session::QueryRouter;
use crate::{DataProxyError, Result};

type SessionRegistry = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Accepts client connections and runs one session task per connection.
pub struct ProxyServer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    router: Arc<QueryRouter>,
    running: AtomicBool,
    next_session_id: AtomicU64,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
}

impl ProxyServer {
    /// Bind the listening socket. Failure here is the only fatal startup
    /// error.
    pub async fn bind(config: &Config, router: Arc<QueryRouter>) -> Result<Self> {
        let address = tokio::net::lookup_host(config.listen_address())
            .await?
            .next()
            .ok_or_else(|| {
                DataProxyError::Config(format!("cannot resolve {}", config.listen_address()))
            })?;

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;
        let listener = socket.listen(config.backlog)?;
        let local_addr = listener.local_addr()?;

        info!("DataProxy listening on {} (backlog {})", local_addr, config.backlog);

        Ok(ProxyServer {
            listener: Mutex::new(Some(listener)),
            local_addr,
            router,
            running: AtomicBool::new(false),
            next_session_id: AtomicU64::new(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<QueryRouter> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Accept connections until `shutdown` is called. The listening socket
    /// is closed when this returns.
    pub async fn serve(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| DataProxyError::Protocol("server is already serving".to_string()))?;
        self.running.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => {
                        if !self.is_running() {
                            break;
                        }
                        error!("Error accepting connection: {}", e);
                    }
                },
            }
        }

        info!("Stopped accepting connections on {}", self.local_addr);
        Ok(())
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        info!("New connection from {} (client {})", peer, id);

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for client {}: {}", id, e);
        }

        let token = self.shutdown.child_token();
        self.sessions.lock().insert(id, token.clone());

        let sessions = self.sessions.clone();
        let router = self.router.clone();
        tokio::spawn(async move {
            let connection = Connection::new(stream, id, peer, router, token);
            if let Err(e) = connection.run().await {
                error!("Client {} ({}) session error: {}", id, peer, e);
            }
            sessions.lock().remove(&id);
        });
    }

    /// Stop accepting connections. Sessions waiting for a frame close at
    /// once. A session running a statement closes once that statement returns.
    pub fn shutdown(&self) {
        info!("Shutting down DataProxy server");
        self.running.store(false, Ordering::SeqCst);
        for (id, token) in self.sessions.lock().iter() {
            debug!("Closing client {}", id);
            token.cancel();
        }
        self.shutdown.cancel();
    }
}
