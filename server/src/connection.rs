//! Connection lifecycle management for the competition server.
//!
//! This module handles the server-side tracking of client connections:
//! - Per-connection write serialization and graceful socket shutdown
//! - Registry of live connections for broadcast shutdown
//! - Connection identity (id, peer address, bound country)
//!
//! The read half of each socket stays with the session task that owns the
//! read loop; the [`Connection`] keeps the write half behind an async mutex
//! so the same connection never has two in-flight writes. Shutdown is
//! idempotent: the first call flips the active flag, wakes the read loop,
//! and closes the write direction.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;

/// One live client connection.
///
/// Created on accept and inserted into the [`ConnectionRegistry`]; removed on
/// peer close, read error, `FINAL_REQUEST` completion, or server shutdown.
/// The registry drops its handle before the underlying socket is destroyed.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    active: AtomicBool,
    closed: Notify,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl Connection {
    fn new(id: u64, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            active: AtomicBool::new(true),
            closed: Notify::new(),
            writer: tokio::sync::Mutex::new(Some(writer)),
        }
    }

    /// Registry-assigned connection identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of the client.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the connection has not been shut down yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Writes the full payload and flushes it as a single frame.
    ///
    /// Writes are serialized by the internal mutex. After [`shutdown`] the
    /// call is a no-op that reports success, matching the lifecycle contract
    /// that a closed connection silently swallows late writes.
    ///
    /// [`shutdown`]: Connection::shutdown
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(payload).await?;
                writer.flush().await
            }
            None => Ok(()),
        }
    }

    /// Gracefully shuts the connection down. Idempotent.
    ///
    /// Flips the active flag, wakes any task waiting in [`closed`], and
    /// closes the write direction of the socket. The read half is dropped by
    /// the session task once it observes the wake-up, which completes the
    /// socket teardown.
    ///
    /// [`closed`]: Connection::closed
    pub async fn shutdown(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("connection {} ({}) shutting down", self.id, self.peer);
            self.closed.notify_one();
            let mut guard = self.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }
    }

    /// Completes once the connection has been shut down.
    ///
    /// Session tasks select over this and their pending read so a broadcast
    /// shutdown interrupts a blocked `read_line`.
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_active() {
            return;
        }
        notified.await;
    }
}

/// Tracked set of live connections.
///
/// Used by the acceptor to register new sessions and by the orchestrator to
/// broadcast shutdown. The internal lock is never held across I/O; shutdown
/// drains the map first and closes the sockets afterwards.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Connection ids start from 1.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a freshly accepted socket's write half.
    ///
    /// Assigns the next connection id and returns the shared handle that the
    /// session task and the registry both hold.
    pub fn insert(&self, peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(Connection::new(id, peer, writer));
        self.lock().insert(id, Arc::clone(&connection));
        info!("connection {} accepted from {}", id, peer);
        connection
    }

    /// Removes a connection from the tracked set.
    ///
    /// Returns the handle if it was still present; removal happens before the
    /// socket itself is destroyed.
    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        let removed = self.lock().remove(&id);
        if let Some(connection) = &removed {
            info!("connection {} ({}) removed", id, connection.peer());
        }
        removed
    }

    /// Shuts down every tracked connection and clears the set.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<Connection>> = self.lock().drain().map(|(_, c)| c).collect();
        for connection in drained {
            connection.shutdown().await;
        }
    }

    /// Number of currently tracked connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _keep_a) = socket_pair().await;
        let (b, _keep_b) = socket_pair().await;

        let peer_a = a.peer_addr().unwrap();
        let peer_b = b.peer_addr().unwrap();
        let (_, writer_a) = a.into_split();
        let (_, writer_b) = b.into_split();

        let conn_a = registry.insert(peer_a, writer_a);
        let conn_b = registry.insert(peer_b, writer_b);

        assert_eq!(conn_a.id(), 1);
        assert_eq!(conn_b.id(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_returns_tracked_connection() {
        let registry = ConnectionRegistry::new();
        let (stream, _keep) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let (_, writer) = stream.into_split();

        let conn = registry.insert(peer, writer);
        assert!(registry.remove(conn.id()).is_some());
        assert!(registry.remove(conn.id()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let registry = ConnectionRegistry::new();
        let (stream, mut other) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let (_read, writer) = stream.into_split();

        let conn = registry.insert(peer, writer);
        conn.send(b"1,50\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = other.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"1,50\n");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_silences_writes() {
        let registry = ConnectionRegistry::new();
        let (stream, _keep) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let (_read, writer) = stream.into_split();

        let conn = registry.insert(peer, writer);
        conn.shutdown().await;
        conn.shutdown().await;
        assert!(!conn.is_active());
        // Post-shutdown writes are swallowed, not errors.
        assert!(conn.send(b"ignored\n").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_wakes_waiting_task() {
        let registry = ConnectionRegistry::new();
        let (stream, _keep) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let (_read, writer) = stream.into_split();

        let conn = registry.insert(peer, writer);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        conn.shutdown().await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_returns_immediately_after_shutdown() {
        let registry = ConnectionRegistry::new();
        let (stream, _keep) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let (_read, writer) = stream.into_split();

        let conn = registry.insert(peer, writer);
        conn.shutdown().await;
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_shutdown_all_clears_registry() {
        let registry = ConnectionRegistry::new();
        let mut conns = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (stream, other) = socket_pair().await;
            let peer = stream.peer_addr().unwrap();
            let (_, writer) = stream.into_split();
            conns.push(registry.insert(peer, writer));
            keep.push(other);
        }

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        for conn in conns {
            assert!(!conn.is_active());
        }
    }
}
