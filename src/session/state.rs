use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// Where a client connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    HandshakeSent,
    AuthPending,
    Authenticated,
    QueryWait,
    QueryExec,
    Closed,
}

impl SessionPhase {
    /// Whether `next` may follow `self`. `Closed` is reachable from anywhere
    /// and leads nowhere.
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Init, HandshakeSent)
            | (HandshakeSent, AuthPending)
            | (AuthPending, Authenticated)
            | (Authenticated, QueryWait)
            | (QueryWait, QueryExec)
            | (QueryExec, QueryWait) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Init => "INIT",
            SessionPhase::HandshakeSent => "HANDSHAKE_SENT",
            SessionPhase::AuthPending => "AUTH_PENDING",
            SessionPhase::Authenticated => "AUTHENTICATED",
            SessionPhase::QueryWait => "QUERY_WAIT",
            SessionPhase::QueryExec => "QUERY_EXEC",
            SessionPhase::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Per-connection state, owned by the task driving the connection.
#[derive(Debug)]
pub struct SessionState {
    pub id: u64,
    pub peer: SocketAddr,
    pub authenticated: bool,
    pub current_database: Option<String>,
    phase: SessionPhase,
}

impl SessionState {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        SessionState {
            id,
            peer,
            authenticated: false,
            current_database: None,
            phase: SessionPhase::Init,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Move to `next`. Illegal transitions are ignored and reported as false.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            debug!("Session {}: ignoring transition {} -> {}", self.id, self.phase, next);
            return false;
        }
        debug!("Session {}: {} -> {}", self.id, self.phase, next);
        if next == SessionPhase::Authenticated {
            self.authenticated = true;
        }
        self.phase = next;
        true
    }

    pub fn close(&mut self) {
        self.advance(SessionPhase::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState::new(1, "127.0.0.1:4000".parse().unwrap())
    }

    #[test]
    fn test_full_lifecycle() {
        let mut s = session();
        for phase in [
            SessionPhase::HandshakeSent,
            SessionPhase::AuthPending,
            SessionPhase::Authenticated,
            SessionPhase::QueryWait,
            SessionPhase::QueryExec,
            SessionPhase::QueryWait,
            SessionPhase::QueryExec,
            SessionPhase::QueryWait,
        ] {
            assert!(s.advance(phase), "{phase}");
        }
        assert!(s.authenticated);
        s.close();
        assert!(s.is_closed());
    }

    #[test]
    fn test_cannot_skip_authentication() {
        let mut s = session();
        assert!(s.advance(SessionPhase::HandshakeSent));
        assert!(!s.advance(SessionPhase::QueryWait));
        assert_eq!(s.phase(), SessionPhase::HandshakeSent);
        assert!(!s.authenticated);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut s = session();
        s.close();
        assert!(!s.advance(SessionPhase::HandshakeSent));
        assert!(s.is_closed());
    }
}
