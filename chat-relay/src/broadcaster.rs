use std::sync::Arc;

use tracing::warn;

use crate::{connection::ConnectionId, registry::Registry};

/// Outcome of one [`Broadcaster::broadcast`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Fans a line out to every registered connection.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends `message` to every member except `exclude`.
    ///
    /// Peers are written to one after another from a snapshot of the
    /// registry. A peer whose write fails is closed and unregistered; the
    /// remaining peers still get the message.
    pub async fn broadcast(
        &self,
        message: &str,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for member in self.registry.snapshot().await {
            let connection = member.connection;
            if Some(connection.id()) == exclude {
                continue;
            }

            match connection.send(message).await {
                Ok(()) => report.delivered += 1,
                // Already closed by its own session or an earlier eviction.
                Err(_) if connection.is_closed() => {}
                Err(error) => {
                    warn!(
                        connection = %connection.id(),
                        username = %member.username,
                        ?error,
                        "evicting peer after failed write"
                    );
                    connection.close().await;
                    self.registry.unregister(connection.id()).await;
                    report.evicted.push(connection.id());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{BufReader, DuplexStream};

    use super::*;
    use crate::{connection::Connection, protocol::read_line};

    async fn join(
        registry: &Arc<Registry>,
        username: &str,
    ) -> (Arc<Connection>, BufReader<DuplexStream>) {
        let (server, client) = tokio::io::duplex(1024);
        let connection = Arc::new(Connection::new(registry.next_id(), None, server));
        registry
            .register(connection.clone(), username.to_string())
            .await;
        (connection, BufReader::new(client))
    }

    #[tokio::test]
    async fn excluded_sender_does_not_receive_its_own_message() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (alice, mut alice_rx) = join(&registry, "alice").await;
        let (_bob, mut bob_rx) = join(&registry, "bob").await;
        let (_carol, mut carol_rx) = join(&registry, "carol").await;

        let report = broadcaster.broadcast("alice: hi", Some(alice.id())).await;
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        assert_eq!(read_line(&mut bob_rx).await.unwrap().as_deref(), Some("alice: hi"));
        assert_eq!(read_line(&mut carol_rx).await.unwrap().as_deref(), Some("alice: hi"));

        // Nothing is pending for alice: the next line she sees is a later broadcast.
        broadcaster.broadcast("system", None).await;
        assert_eq!(read_line(&mut alice_rx).await.unwrap().as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn failed_peer_is_evicted_without_blocking_others() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (_alice, mut alice_rx) = join(&registry, "alice").await;
        let (dead, dead_rx) = join(&registry, "dead").await;
        let (_carol, mut carol_rx) = join(&registry, "carol").await;
        drop(dead_rx);

        let report = broadcaster.broadcast("first", None).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![dead.id()]);
        assert!(dead.is_closed());
        assert!(!registry.contains(dead.id()).await);

        let report = broadcaster.broadcast("second", None).await;
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        for rx in [&mut alice_rx, &mut carol_rx] {
            assert_eq!(read_line(&mut *rx).await.unwrap().as_deref(), Some("first"));
            assert_eq!(read_line(&mut *rx).await.unwrap().as_deref(), Some("second"));
        }
    }

    #[tokio::test]
    async fn closed_member_is_skipped_without_eviction() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (leaving, _leaving_rx) = join(&registry, "leaving").await;
        let (_alice, mut alice_rx) = join(&registry, "alice").await;
        leaving.close().await;

        let report = broadcaster.broadcast("hello", None).await;
        assert_eq!(report.delivered, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(read_line(&mut alice_rx).await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry_is_harmless() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry);

        let report = broadcaster.broadcast("anyone?", None).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn only_member_excluded_reaches_nobody() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (alice, _alice_rx) = join(&registry, "alice").await;

        let report = broadcaster.broadcast("echo?", Some(alice.id())).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(registry.len().await, 1);
    }
}
