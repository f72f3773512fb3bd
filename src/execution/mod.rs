//! Execution bridge: one engine socket per running execution, a dedicated
//! stream-reader task, interactive input forwarding, and bounded teardown.

pub mod bridge;
pub mod framing;
pub mod reader;

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shared handle to the write half of an engine socket. Request bytes and
/// interactive input both go through this, serialized by the mutex.
pub type EngineWriter = Arc<Mutex<OwnedWriteHalf>>;

/// State of one in-flight execution, keyed by the originating connection id.
pub struct ExecutionSession {
    pub writer: EngineWriter,
    /// Reader task handle; `None` only during the brief window between
    /// session insert and task spawn.
    pub reader: Option<JoinHandle<()>>,
    pub started_at: Instant,
}

/// Registry of active executions. At most one session per connection id;
/// removal is the single point of teardown, so double-release is a no-op.
#[derive(Default)]
pub struct ExecutionManager {
    sessions: DashMap<String, ExecutionSession>,
}

impl ExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection_id: &str, session: ExecutionSession) {
        self.sessions.insert(connection_id.to_string(), session);
    }

    /// Attach the reader handle after spawn. If the session vanished in the
    /// meantime (engine hung up immediately), the orphan task is aborted.
    pub fn attach_reader(&self, connection_id: &str, handle: JoinHandle<()>) {
        match self.sessions.get_mut(connection_id) {
            Some(mut session) => session.reader = Some(handle),
            None => handle.abort(),
        }
    }

    /// Remove and return the session. Returns `None` if already released.
    pub fn release(&self, connection_id: &str) -> Option<ExecutionSession> {
        self.sessions
            .remove(connection_id)
            .map(|(_, session)| session)
    }

    pub fn writer_of(&self, connection_id: &str) -> Option<EngineWriter> {
        self.sessions
            .get(connection_id)
            .map(|s| s.writer.clone())
    }

    /// Start instant of the active session, if any. The watchdog compares
    /// this against the instant it captured at launch so it never bounds a
    /// later execution that reused the connection id.
    pub fn started_at(&self, connection_id: &str) -> Option<Instant> {
        self.sessions.get(connection_id).map(|s| s.started_at)
    }

    pub fn is_active(&self, connection_id: &str) -> bool {
        self.sessions.contains_key(connection_id)
    }

    /// Server shutdown: close every engine socket and cancel every reader.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(session) = self.release(&id) {
                if let Some(handle) = &session.reader {
                    handle.abort();
                }
                let mut writer = session.writer.lock().await;
                let _ = writer.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_session() -> (ExecutionSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_, write_half) = client.unwrap().into_split();
        (
            ExecutionSession {
                writer: Arc::new(Mutex::new(write_half)),
                reader: None,
                started_at: Instant::now(),
            },
            server.unwrap().0,
        )
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let manager = ExecutionManager::new();
        let (session, _peer) = loopback_session().await;
        manager.insert("c1", session);

        assert!(manager.is_active("c1"));
        assert!(manager.release("c1").is_some());
        assert!(manager.release("c1").is_none());
        assert!(!manager.is_active("c1"));
    }

    #[tokio::test]
    async fn insert_replaces_previous_session() {
        let manager = ExecutionManager::new();
        let (first, _p1) = loopback_session().await;
        let (second, _p2) = loopback_session().await;
        let second_start = second.started_at;

        manager.insert("c1", first);
        manager.insert("c1", second);

        assert_eq!(manager.started_at("c1"), Some(second_start));
        assert!(manager.release("c1").is_some());
        assert!(manager.release("c1").is_none());
    }
}
