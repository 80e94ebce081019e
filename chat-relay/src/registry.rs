use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionId};

/// One admitted peer.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection: Arc<Connection>,
    pub username: String,
}

/// Live connections and the usernames they joined with.
///
/// Every operation takes the same lock and releases it before returning, so
/// callers never iterate or write to peers while holding it.
#[derive(Debug)]
pub struct Registry {
    members: Mutex<BTreeMap<ConnectionId, Member>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Admits `connection` under `username`. Usernames need not be unique;
    /// registering the same connection again replaces its username.
    pub async fn register(&self, connection: Arc<Connection>, username: String) {
        let mut members = self.members.lock().await;
        members.insert(
            connection.id(),
            Member {
                connection,
                username,
            },
        );
    }

    /// Removes the entry for `id`, returning the username it held.
    /// Returns `None` when the connection was never registered or is already gone.
    pub async fn unregister(&self, id: ConnectionId) -> Option<String> {
        let mut members = self.members.lock().await;
        members.remove(&id).map(|member| member.username)
    }

    /// Point-in-time copy in join order.
    pub async fn snapshot(&self) -> Vec<Member> {
        let members = self.members.lock().await;
        members.values().cloned().collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}
