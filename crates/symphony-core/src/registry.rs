//! Live membership registry.
//!
//! Tracks which users are connected and, per chat, which of its members are
//! reachable right now. The persisted chat service stays the source of truth
//! for membership; the registry only answers "who gets this event".
//!
//! All three maps sit behind one reader/writer lock so every structural change
//! keeps them consistent:
//!
//! - every connection in a chat's live set is the one stored for that user in
//!   the client map
//! - no chat maps to an empty live set
//! - the reverse index lists exactly the live chats of each connected user

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use symphony_protocol::{ChatId, UserId};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::connection::Connection;

#[derive(Default)]
struct RegistryState {
    clients: HashMap<UserId, Arc<Connection>>,
    chats: HashMap<ChatId, HashMap<UserId, Arc<Connection>>>,
    user_chats: HashMap<UserId, HashSet<ChatId>>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Connected users.
    pub client_count: usize,
    /// Chats with at least one live member.
    pub chat_count: usize,
    /// Sum of live set sizes.
    pub membership_count: usize,
}

/// Connected users and the live member sets of their chats.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's connection and add it to the live sets of `chats`.
    ///
    /// A connection already registered for the user is replaced, and every
    /// live set that pointed at it now points at the new one. Returns the
    /// replaced connection.
    pub async fn register(
        &self,
        connection: &Arc<Connection>,
        chats: &[ChatId],
    ) -> Option<Arc<Connection>> {
        let user = connection.user_id();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let previous = state.clients.insert(user, connection.clone());

        let joined = state.user_chats.entry(user).or_default();
        joined.extend(chats.iter().copied());
        for chat in joined.iter() {
            state
                .chats
                .entry(*chat)
                .or_default()
                .insert(user, connection.clone());
        }

        debug!(
            user = %user,
            connection = %connection.id(),
            chats = joined.len(),
            replaced = previous.is_some(),
            "Client registered"
        );
        previous
    }

    /// Remove a user's connection from the client map and every live set.
    ///
    /// Does nothing unless `connection` is the one currently registered, so a
    /// connection replaced by a newer login cannot evict its successor.
    pub async fn deregister(&self, connection: &Connection) -> bool {
        let user = connection.user_id();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        match state.clients.get(&user) {
            Some(current) if current.id() == connection.id() => {}
            _ => {
                trace!(user = %user, connection = %connection.id(), "Stale deregistration ignored");
                return false;
            }
        }

        state.clients.remove(&user);
        let chats = state.user_chats.remove(&user).unwrap_or_default();
        for chat in &chats {
            remove_member(&mut state.chats, *chat, user);
        }

        debug!(user = %user, connection = %connection.id(), chats = chats.len(), "Client deregistered");
        true
    }

    /// Add a connected user to a chat's live set.
    ///
    /// Returns `false` if the user has no live connection.
    pub async fn join_chat(&self, chat: ChatId, user: UserId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(connection) = state.clients.get(&user).cloned() else {
            trace!(chat = %chat, user = %user, "Join skipped, user offline");
            return false;
        };

        state.chats.entry(chat).or_default().insert(user, connection);
        state.user_chats.entry(user).or_default().insert(chat);
        debug!(chat = %chat, user = %user, "Joined live set");
        true
    }

    /// Remove a user from a chat's live set, returning the connection removed.
    pub async fn leave_chat(&self, chat: ChatId, user: UserId) -> Option<Arc<Connection>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(joined) = state.user_chats.get_mut(&user) {
            joined.remove(&chat);
        }
        let removed = remove_member(&mut state.chats, chat, user);
        if removed.is_some() {
            debug!(chat = %chat, user = %user, "Left live set");
        }
        removed
    }

    /// Remove a connection from the live sets of `chats`.
    ///
    /// Does nothing unless `connection` is the one currently registered.
    /// Returns how many live sets it was removed from.
    pub async fn forget_chats(&self, connection: &Connection, chats: &[ChatId]) -> usize {
        let user = connection.user_id();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if !state
            .clients
            .get(&user)
            .is_some_and(|current| current.id() == connection.id())
        {
            return 0;
        }

        let mut removed = 0;
        for chat in chats {
            if let Some(joined) = state.user_chats.get_mut(&user) {
                joined.remove(chat);
            }
            if remove_member(&mut state.chats, *chat, user).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop a chat's live set, returning the connections it held.
    pub async fn remove_chat(&self, chat: ChatId) -> Vec<Arc<Connection>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(members) = state.chats.remove(&chat) else {
            return Vec::new();
        };
        for user in members.keys() {
            if let Some(joined) = state.user_chats.get_mut(user) {
                joined.remove(&chat);
            }
        }

        debug!(chat = %chat, members = members.len(), "Live set removed");
        members.into_values().collect()
    }

    /// Get a user's registered connection.
    pub async fn client(&self, user: UserId) -> Option<Arc<Connection>> {
        self.state.read().await.clients.get(&user).cloned()
    }

    /// Snapshot a chat's live set.
    pub async fn live_members(&self, chat: ChatId) -> Vec<Arc<Connection>> {
        self.state
            .read()
            .await
            .chats
            .get(&chat)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a user is in a chat's live set.
    pub async fn is_live_member(&self, chat: ChatId, user: UserId) -> bool {
        self.state
            .read()
            .await
            .chats
            .get(&chat)
            .is_some_and(|members| members.contains_key(&user))
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            client_count: state.clients.len(),
            chat_count: state.chats.len(),
            membership_count: state.chats.values().map(HashMap::len).sum(),
        }
    }

    /// Panic if the cross-map invariants do not hold.
    #[cfg(test)]
    pub(crate) async fn assert_consistent(&self) {
        let state = self.state.read().await;

        for (chat, members) in &state.chats {
            assert!(!members.is_empty(), "chat {chat} has an empty live set");
            for (user, connection) in members {
                let client = state
                    .clients
                    .get(user)
                    .unwrap_or_else(|| panic!("user {user} in chat {chat} is not connected"));
                assert_eq!(client.id(), connection.id(), "chat {chat} holds a stale connection");
                assert!(
                    state.user_chats.get(user).is_some_and(|c| c.contains(chat)),
                    "reverse index misses {user} in {chat}"
                );
            }
        }

        for (user, chats) in &state.user_chats {
            assert!(state.clients.contains_key(user), "reverse index holds offline user {user}");
            for chat in chats {
                assert!(
                    state.chats.get(chat).is_some_and(|m| m.contains_key(user)),
                    "reverse index lists {chat} for {user} but the live set does not"
                );
            }
        }
    }
}

/// Remove one user from a live set, pruning the set if it empties.
fn remove_member(
    chats: &mut HashMap<ChatId, HashMap<UserId, Arc<Connection>>>,
    chat: ChatId,
    user: UserId,
) -> Option<Arc<Connection>> {
    let members = chats.get_mut(&chat)?;
    let removed = members.remove(&user);
    if members.is_empty() {
        chats.remove(&chat);
        trace!(chat = %chat, "Empty live set pruned");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionHandler};
    use async_trait::async_trait;
    use bytes::Bytes;
    use symphony_transport::memory;

    struct Noop;

    #[async_trait]
    impl ConnectionHandler for Noop {
        async fn handle_frame(&self, _connection: &Arc<Connection>, _frame: Bytes) {}
        async fn connection_closed(&self, _connection: &Arc<Connection>) {}
    }

    fn connection(user: UserId) -> Arc<Connection> {
        let (transport, _peer) = memory::pair(8);
        Connection::new(Box::new(transport), user, ConnectionConfig::default(), &Arc::new(Noop))
    }

    #[tokio::test]
    async fn test_register_replaces_previous() {
        let registry = Registry::new();
        let user = UserId::generate();
        let chat = ChatId::generate();
        let first = connection(user);
        let second = connection(user);

        assert!(registry.register(&first, &[chat]).await.is_none());
        let replaced = registry.register(&second, &[]).await.unwrap();
        assert_eq!(replaced.id(), first.id());

        assert_eq!(registry.client(user).await.unwrap().id(), second.id());
        let members = registry.live_members(chat).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id(), second.id());
        assert_eq!(registry.stats().await.client_count, 1);
        registry.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_stale_deregistration_is_ignored() {
        let registry = Registry::new();
        let user = UserId::generate();
        let first = connection(user);
        let second = connection(user);

        registry.register(&first, &[]).await;
        registry.register(&second, &[]).await;

        assert!(!registry.deregister(&first).await);
        assert_eq!(registry.client(user).await.unwrap().id(), second.id());

        assert!(registry.deregister(&second).await);
        assert!(!registry.deregister(&second).await);
        assert!(registry.client(user).await.is_none());
    }

    #[tokio::test]
    async fn test_deregister_clears_live_sets() {
        let registry = Registry::new();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (shared, solo) = (ChatId::generate(), ChatId::generate());
        let alice_conn = connection(alice);

        registry.register(&alice_conn, &[shared, solo]).await;
        registry.register(&connection(bob), &[shared]).await;

        registry.deregister(&alice_conn).await;

        assert!(!registry.is_live_member(shared, alice).await);
        assert!(registry.is_live_member(shared, bob).await);
        assert!(registry.live_members(solo).await.is_empty());
        assert_eq!(
            registry.stats().await,
            RegistryStats {
                client_count: 1,
                chat_count: 1,
                membership_count: 1,
            }
        );
        registry.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_join_requires_connection() {
        let registry = Registry::new();
        let user = UserId::generate();
        let chat = ChatId::generate();

        assert!(!registry.join_chat(chat, user).await);
        assert_eq!(registry.stats().await.chat_count, 0);

        registry.register(&connection(user), &[]).await;
        assert!(registry.join_chat(chat, user).await);
        assert!(registry.is_live_member(chat, user).await);
        registry.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_leave_prunes_empty_set() {
        let registry = Registry::new();
        let user = UserId::generate();
        let chat = ChatId::generate();

        registry.register(&connection(user), &[chat]).await;
        assert!(registry.leave_chat(chat, user).await.is_some());
        assert!(registry.leave_chat(chat, user).await.is_none());

        assert_eq!(registry.stats().await.chat_count, 0);
        registry.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_forget_chats_only_touches_current_connection() {
        let registry = Registry::new();
        let user = UserId::generate();
        let (kept, dropped) = (ChatId::generate(), ChatId::generate());
        let first = connection(user);
        let second = connection(user);

        registry.register(&first, &[kept, dropped]).await;
        registry.register(&second, &[]).await;
        assert_eq!(registry.forget_chats(&first, &[dropped]).await, 0);
        assert!(registry.is_live_member(dropped, user).await);

        assert_eq!(registry.forget_chats(&second, &[dropped]).await, 1);
        assert!(!registry.is_live_member(dropped, user).await);
        assert!(registry.is_live_member(kept, user).await);
        assert_eq!(registry.stats().await.chat_count, 1);
        registry.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_remove_chat_returns_snapshot() {
        let registry = Registry::new();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let chat = ChatId::generate();

        registry.register(&connection(alice), &[chat]).await;
        registry.register(&connection(bob), &[chat]).await;

        assert_eq!(registry.remove_chat(chat).await.len(), 2);
        assert!(registry.remove_chat(chat).await.is_empty());
        assert!(!registry.is_live_member(chat, alice).await);
        registry.assert_consistent().await;
    }
}
