use std::{fmt, io, net::SocketAddr};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, MutexGuard, watch},
};
use tracing::debug;

use crate::protocol::write_line;

/// Identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The write side of one peer's stream.
///
/// Sessions keep the read side to themselves; everything else (registry,
/// broadcaster) only ever holds an `Arc<Connection>`. Writes are serialized
/// by an internal lock so concurrent broadcasts never interleave within a
/// line.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer,
            writer: Mutex::new(Box::new(writer)),
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writes one line to the peer. Fails once the connection is closed.
    pub async fn send(&self, line: &str) -> io::Result<()> {
        let mut writer = self.lock_writer().await?;
        write_line(&mut *writer, line).await
    }

    /// Takes the writer lock directly so a caller can order other work before
    /// any concurrent sender gets a turn.
    pub async fn lock_writer(&self) -> io::Result<MutexGuard<'_, BoxedWriter>> {
        let writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        Ok(writer)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Marks the connection closed and shuts the write side down. Idempotent.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            debug!(connection = %self.id, ?error, "failed to shut down writer");
        }
    }

    /// Writes `line` as the last thing the peer sees, then closes.
    ///
    /// The line and the close happen under one writer lock, so a concurrent
    /// sender either gets in before `line` or fails. The write is best effort.
    pub async fn close_with(&self, line: &str) {
        let mut writer = self.writer.lock().await;
        if self.closed.send_replace(true) {
            return;
        }

        if let Err(error) = write_line(&mut *writer, line).await {
            debug!(connection = %self.id, ?error, "failed to write final line");
        }
        if let Err(error) = writer.shutdown().await {
            debug!(connection = %self.id, ?error, "failed to shut down writer");
        }
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
