use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, error, info, warn};

use crate::{
    broadcaster::Broadcaster,
    config::{HandshakeMode, ServerConfig},
    connection::Connection,
    registry::Registry,
    session::{HandshakeError, Session},
};

/// Pause after an accept error that is not tied to a single connection.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
/// Consecutive non-transient accept errors tolerated before giving up.
const MAX_ACCEPT_FAILURES: u32 = 10;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listener failed to accept connections")]
    Accept(#[source] io::Error),
}

pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    handshake: HandshakeMode,
}

impl Server {
    pub fn new(listener: TcpListener, handshake: HandshakeMode) -> Self {
        Self {
            listener,
            broadcaster: Broadcaster::new(Arc::new(Registry::new())),
            handshake,
        }
    }

    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;
        Ok(Self::new(listener, config.handshake))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// Accepts connections until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            broadcaster,
            handshake,
        } = self;
        tokio::pin!(shutdown);
        let mut accept_failures = AcceptFailures::default();

        loop {
            let accept_result = select! {
                _ = &mut shutdown => {
                    info!("chat relay shutting down");
                    break;
                }
                accept_result = listener.accept() => accept_result,
            };

            let err = match accept_result {
                Ok((stream, peer)) => {
                    accept_failures.reset();
                    spawn_session(stream, peer, &broadcaster, handshake);
                    continue;
                }
                Err(err) => err,
            };

            match accept_failures.record(&err) {
                AcceptAction::Continue => {
                    warn!(error = ?err, "failed to accept connection");
                }
                AcceptAction::Backoff => {
                    error!(
                        error = ?err,
                        failures = accept_failures.count(),
                        "accept failed; backing off"
                    );
                    select! {
                        _ = &mut shutdown => {
                            info!("chat relay shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
                AcceptAction::Fail => {
                    error!(
                        error = ?err,
                        failures = accept_failures.count(),
                        "giving up on listener"
                    );
                    return Err(ServerError::Accept(err));
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptAction {
    /// The error belonged to one connection; accept the next one right away.
    Continue,
    Backoff,
    /// Too many listener errors in a row.
    Fail,
}

/// Counts listener-level accept errors since the last successful accept or
/// per-connection error.
#[derive(Debug, Default)]
struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn count(&self) -> u32 {
        self.consecutive
    }

    fn record(&mut self, err: &io::Error) -> AcceptAction {
        if is_connection_error(err) {
            self.reset();
            return AcceptAction::Continue;
        }

        self.consecutive += 1;
        if self.consecutive >= MAX_ACCEPT_FAILURES {
            AcceptAction::Fail
        } else {
            AcceptAction::Backoff
        }
    }
}

/// Errors that concern only the connection being accepted, not the listener.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &Broadcaster,
    handshake: HandshakeMode,
) {
    let registry = broadcaster.registry();
    let (reader, writer) = stream.into_split();
    let connection = Arc::new(Connection::new(registry.next_id(), Some(peer), writer));
    let session = Session::new(
        connection,
        BufReader::new(reader),
        broadcaster.clone(),
        handshake,
    );

    tokio::spawn(async move {
        match session.run().await {
            Ok(exit) => debug!(peer = %peer, ?exit, "session finished"),
            Err(HandshakeError::Io(err)) => {
                warn!(peer = %peer, error = ?err, "handshake failed")
            }
            Err(err) => debug!(peer = %peer, error = %err, "handshake aborted"),
        }
    });
}
