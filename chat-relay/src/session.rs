//! Per-connection control loop.
//!
//! A session moves through three states: it waits for the peer's username,
//! relays the peer's lines while active, and finally tears itself down. The
//! teardown runs once on every path out of the active loop.

use std::{io, sync::Arc};

use thiserror::Error;
use tokio::{io::AsyncBufRead, select};
use tracing::info;

use crate::{
    broadcaster::Broadcaster,
    config::HandshakeMode,
    connection::Connection,
    protocol::{
        CONNECTED, GOODBYE, USERNAME_PROMPT, chat_line, is_quit, joined_notice, left_notice,
        read_line, write_line,
    },
};

/// Why a session never got past the username exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed before a username was sent")]
    Closed,
    #[error("username was empty")]
    EmptyUsername,
    #[error("handshake I/O failed")]
    Io(#[from] io::Error),
}

/// Why an admitted session ended.
#[derive(Debug)]
pub enum SessionExit {
    /// The peer sent the quit sentinel.
    Quit,
    /// The peer closed its side of the stream.
    Disconnected,
    ReadFailed(io::Error),
    /// A broadcast could not be delivered and the connection was dropped.
    Evicted,
}

pub struct Session<R> {
    connection: Arc<Connection>,
    reader: R,
    broadcaster: Broadcaster,
    handshake: HandshakeMode,
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        connection: Arc<Connection>,
        reader: R,
        broadcaster: Broadcaster,
        handshake: HandshakeMode,
    ) -> Self {
        Self {
            connection,
            reader,
            broadcaster,
            handshake,
        }
    }

    /// Drives the session to completion. The connection is closed on return.
    pub async fn run(mut self) -> Result<SessionExit, HandshakeError> {
        let username = match self.handshake().await {
            Ok(username) => username,
            Err(error) => {
                self.connection.close().await;
                return Err(error);
            }
        };

        let id = self.connection.id();
        info!(connection = %id, peer = ?self.connection.peer(), %username, "peer joined");
        self.broadcaster
            .broadcast(&joined_notice(&username), Some(id))
            .await;

        let exit = self.relay(&username).await;
        self.teardown(&username, &exit).await;
        Ok(exit)
    }

    async fn handshake(&mut self) -> Result<String, HandshakeError> {
        if self.handshake == HandshakeMode::Prompt {
            self.connection.send(USERNAME_PROMPT).await?;
        }

        let username = match read_line(&mut self.reader).await? {
            Some(line) => line.trim().to_string(),
            None => return Err(HandshakeError::Closed),
        };
        if username.is_empty() {
            return Err(HandshakeError::EmptyUsername);
        }

        self.admit(&username).await?;
        Ok(username)
    }

    /// Registers the peer and confirms admission. The writer lock is held
    /// across both steps so no broadcast can reach the peer ahead of the
    /// confirmation.
    async fn admit(&self, username: &str) -> io::Result<()> {
        let registry = self.broadcaster.registry();
        let mut writer = self.connection.lock_writer().await?;

        registry
            .register(self.connection.clone(), username.to_string())
            .await;
        if let Err(error) = write_line(&mut *writer, CONNECTED).await {
            registry.unregister(self.connection.id()).await;
            return Err(error);
        }

        Ok(())
    }

    async fn relay(&mut self, username: &str) -> SessionExit {
        let id = self.connection.id();

        loop {
            // An evicted peer's queued input must not be relayed.
            let line = select! {
                biased;
                _ = self.connection.closed() => return SessionExit::Evicted,
                line = read_line(&mut self.reader) => line,
            };

            let text = match line {
                Ok(Some(text)) => text,
                Ok(None) => return SessionExit::Disconnected,
                Err(error) => return SessionExit::ReadFailed(error),
            };

            if is_quit(&text) {
                return SessionExit::Quit;
            }
            if text.trim().is_empty() {
                continue;
            }
            if self.connection.is_closed() {
                return SessionExit::Evicted;
            }

            info!(connection = %id, %username, %text, "relaying message");
            self.broadcaster
                .broadcast(&chat_line(username, &text), Some(id))
                .await;
        }
    }

    async fn teardown(&self, username: &str, exit: &SessionExit) {
        let id = self.connection.id();

        self.broadcaster.registry().unregister(id).await;
        if matches!(exit, SessionExit::Quit) {
            self.connection.close_with(GOODBYE).await;
        }

        info!(connection = %id, %username, reason = ?exit, "peer left");
        self.broadcaster
            .broadcast(&left_notice(username), Some(id))
            .await;
        self.connection.close().await;
    }
}
