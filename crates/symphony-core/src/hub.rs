//! The chat hub.
//!
//! The hub owns the live [`Registry`] and turns every inbound action into a
//! [`ChatService`] call followed by registry bookkeeping, a result for the
//! actor and an event for the other live members of the chat.
//!
//! Dispatch runs on the calling connection's processing task. The registry
//! lock is only held for bookkeeping; delivery works on a snapshot of the
//! recipients taken after the mutation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use symphony_protocol::{
    codec, unix_millis, ActionRequest, ActionResult, AdminDemoted, AdminPromoted, ChatCreated,
    ChatId, ChatRef, ChatRenamed, Event, MemberAdded, MemberRemoved, UserId,
};
use symphony_transport::Transport;
use tracing::{debug, error, info, trace, warn};

use crate::chat::{ChatError, ChatService};
use crate::connection::{Connection, ConnectionConfig, ConnectionHandler};
use crate::registry::{Registry, RegistryStats};

/// Failure code sent when a frame names an actor other than its sender.
pub const ACTOR_MISMATCH: &str = "ACTOR_MISMATCH";

/// Failure code sent when a success payload cannot be encoded.
const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Configuration applied to every connection the hub creates.
    pub connection: ConnectionConfig,
}

/// What a successful action produced.
struct Outcome {
    result: ActionResult,
    event: Option<Event>,
    /// Connections the event goes to, before the actor is filtered out.
    recipients: Vec<Arc<Connection>>,
}

impl Outcome {
    fn reply_only(result: ActionResult) -> Self {
        Self {
            result,
            event: None,
            recipients: Vec::new(),
        }
    }

    fn broadcast(result: ActionResult, event: Event, recipients: Vec<Arc<Connection>>) -> Self {
        Self {
            result,
            event: Some(event),
            recipients,
        }
    }
}

/// Connection registry and action dispatcher.
pub struct Hub {
    registry: Registry,
    chats: Arc<dyn ChatService>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub backed by a chat service.
    #[must_use]
    pub fn new(chats: Arc<dyn ChatService>) -> Self {
        Self::with_config(chats, HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(chats: Arc<dyn ChatService>, config: HubConfig) -> Self {
        info!("Creating hub");
        Self {
            registry: Registry::new(),
            chats,
            config,
        }
    }

    /// Get the live registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Wrap an authenticated transport in a connection, register it and
    /// start its tasks.
    pub async fn connect(self: &Arc<Self>, transport: Box<dyn Transport>, user_id: UserId) -> Arc<Connection> {
        let connection = Connection::new(transport, user_id, self.config.connection.clone(), self);
        self.register_connection(&connection).await;
        connection.start();
        connection
    }

    /// Register a connection, seeding the live sets of the user's chats.
    ///
    /// A connection already registered for the same user is replaced but not
    /// closed.
    pub async fn register_connection(&self, connection: &Arc<Connection>) {
        let user = connection.user_id();
        let seeded = match self.chats.chats_of_user(user).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(user = %user, error = %e, "Chat lookup failed, registering without chats");
                Vec::new()
            }
        };

        if let Some(previous) = self.registry.register(connection, &seeded).await {
            info!(user = %user, replaced = %previous.id(), "Previous connection replaced");
        }
        if !seeded.is_empty() {
            self.prune_stale_seeds(connection, &seeded).await;
        }
        info!(user = %user, connection = %connection.id(), chats = seeded.len(), "Client connected");
    }

    /// Drop seeded chats the user left while the registration was in flight.
    ///
    /// A leave, kick or delete that lands between the lookup and the insert
    /// finds no live entry to remove. Any such change is visible to a second
    /// lookup made after the insert; later ones find the entry themselves.
    async fn prune_stale_seeds(&self, connection: &Arc<Connection>, seeded: &[ChatId]) {
        let user = connection.user_id();
        let current = match self.chats.chats_of_user(user).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(user = %user, error = %e, "Chat re-check failed, keeping seeded chats");
                return;
            }
        };

        let stale: Vec<ChatId> = seeded
            .iter()
            .copied()
            .filter(|chat| !current.contains(chat))
            .collect();
        if !stale.is_empty() {
            let pruned = self.registry.forget_chats(connection, &stale).await;
            debug!(user = %user, pruned, "Pruned chats left during registration");
        }
    }

    /// Remove a connection from the registry.
    ///
    /// Returns `false` if it was not the user's registered connection.
    pub async fn deregister_connection(&self, connection: &Connection) -> bool {
        let removed = self.registry.deregister(connection).await;
        if removed {
            info!(user = %connection.user_id(), connection = %connection.id(), "Client disconnected");
        }
        removed
    }

    /// Decode and dispatch one raw action envelope.
    ///
    /// Malformed frames are logged and dropped.
    pub async fn dispatch(&self, raw: &[u8]) {
        match codec::decode_request(raw) {
            Ok(request) => self.dispatch_request(request).await,
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }

    /// Dispatch one decoded action that did not arrive over a connection.
    ///
    /// The result goes to the actor's registered connection, if any.
    pub async fn dispatch_request(&self, request: ActionRequest) {
        let actor = request.actor();
        let connection = self.registry.client(actor).await;
        if connection.is_none() {
            warn!(user = %actor, action = %request.kind(), "Acting user has no live connection");
        }
        self.dispatch_from(connection.as_ref(), request).await;
    }

    /// Run an action and answer on `origin`, the connection that sent it.
    async fn dispatch_from(&self, origin: Option<&Arc<Connection>>, request: ActionRequest) {
        let actor = request.actor();
        let action = request.kind();

        match self.execute(request).await {
            Ok(outcome) => {
                debug!(user = %actor, action = %action, "Action succeeded");
                reply(origin, &outcome.result);
                if let Some(event) = &outcome.event {
                    let delivered = broadcast(event, &outcome.recipients, actor);
                    trace!(event = event.event_type(), chat = %event.chat_id(), delivered, "Event delivered");
                }
            }
            Err(e) => {
                warn!(user = %actor, action = %action, error = %e, "Action failed");
                reply(origin, &ActionResult::failure(e.code(), &e));
            }
        }
    }

    /// Run the domain operation, then update the registry and pick the
    /// event recipients.
    async fn execute(&self, request: ActionRequest) -> Result<Outcome, ChatError> {
        let outcome = match request {
            ActionRequest::CreateChat { user_id, chat_name } => {
                let chat = self.chats.create_chat(user_id, &chat_name).await?;
                self.registry.join_chat(chat.id, user_id).await;

                Outcome::reply_only(success(&ChatCreated {
                    chat_id: chat.id,
                    chat_name: chat.name,
                    chat_created_at: chat.created_at,
                }))
            }

            ActionRequest::DeleteChat { chat_id, user_id } => {
                self.chats.delete_chat(chat_id, user_id).await?;
                let recipients = self.registry.remove_chat(chat_id).await;

                Outcome::broadcast(
                    success(&ChatRef { chat_id }),
                    Event::ChatDeleted { chat_id, user_id },
                    recipients,
                )
            }

            ActionRequest::RenameChat {
                chat_id,
                user_id,
                new_chat_name,
            } => {
                let name = self.chats.rename_chat(chat_id, &new_chat_name, user_id).await?;

                Outcome::broadcast(
                    success(&ChatRenamed {
                        chat_id,
                        new_chat_name: name.clone(),
                    }),
                    Event::ChatNameUpdated {
                        chat_id,
                        user_id,
                        new_chat_name: name,
                    },
                    self.registry.live_members(chat_id).await,
                )
            }

            ActionRequest::LeaveChat { chat_id, user_id } => {
                self.chats.leave(chat_id, user_id).await?;
                self.registry.leave_chat(chat_id, user_id).await;

                Outcome::broadcast(
                    success(&ChatRef { chat_id }),
                    Event::UserLeftChat {
                        chat_id,
                        user_id,
                        left_at: unix_millis(),
                    },
                    self.registry.live_members(chat_id).await,
                )
            }

            ActionRequest::AddMemberToChat {
                chat_id,
                user_id,
                invited_user_id,
            } => {
                self.chats.add_member(chat_id, user_id, invited_user_id).await?;
                self.registry.join_chat(chat_id, invited_user_id).await;

                Outcome::broadcast(
                    success(&MemberAdded {
                        chat_id,
                        inviter_user_id: user_id,
                        invited_user_id,
                    }),
                    Event::UserEnteredChat {
                        chat_id,
                        inviter_user_id: user_id,
                        invited_user_id,
                    },
                    self.registry.live_members(chat_id).await,
                )
            }

            ActionRequest::RemoveMemberFromChat {
                chat_id,
                user_id,
                removing_user_id,
            } => {
                self.chats.remove_member(chat_id, user_id, removing_user_id).await?;
                let kicked = self.registry.leave_chat(chat_id, removing_user_id).await;

                let mut recipients = self.registry.live_members(chat_id).await;
                recipients.extend(kicked);

                Outcome::broadcast(
                    success(&MemberRemoved {
                        chat_id,
                        kicker_user_id: user_id,
                        kicked_user_id: removing_user_id,
                    }),
                    Event::UserWasKickedFromChat {
                        chat_id,
                        kicker_user_id: user_id,
                        kicked_user_id: removing_user_id,
                    },
                    recipients,
                )
            }

            ActionRequest::PromoteUserToChatAdmin {
                chat_id,
                user_id,
                promoted_user_id,
            } => {
                self.chats.promote(chat_id, user_id, promoted_user_id).await?;

                Outcome::broadcast(
                    success(&AdminPromoted {
                        chat_id,
                        promoter_user_id: user_id,
                        promoted_user_id,
                    }),
                    Event::UserWasPromotedToChatAdmin {
                        chat_id,
                        promoter_user_id: user_id,
                        promoted_user_id,
                    },
                    self.registry.live_members(chat_id).await,
                )
            }

            ActionRequest::DemoteChatAdminToChatMember {
                chat_id,
                user_id,
                admin_user_id,
            } => {
                self.chats.demote(chat_id, user_id, admin_user_id).await?;

                Outcome::broadcast(
                    success(&AdminDemoted {
                        chat_id,
                        demoter_user_id: user_id,
                        demoted_user_id: admin_user_id,
                    }),
                    Event::UserWasDemotedFromChatAdmin {
                        chat_id,
                        demoter_user_id: user_id,
                        demoted_user_id: admin_user_id,
                    },
                    self.registry.live_members(chat_id).await,
                )
            }
        };

        Ok(outcome)
    }
}

#[async_trait]
impl ConnectionHandler for Hub {
    async fn handle_frame(&self, connection: &Arc<Connection>, frame: Bytes) {
        let request = match codec::decode_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    connection = %connection.id(),
                    user = %connection.user_id(),
                    error = %e,
                    "Dropping malformed frame"
                );
                return;
            }
        };

        if request.actor() != connection.user_id() {
            warn!(
                connection = %connection.id(),
                user = %connection.user_id(),
                claimed = %request.actor(),
                action = %request.kind(),
                "Rejecting action on behalf of another user"
            );
            let result = ActionResult::failure(ACTOR_MISMATCH, "user_id does not match the connection");
            reply(Some(connection), &result);
            return;
        }

        self.dispatch_from(Some(connection), request).await;
    }

    async fn connection_closed(&self, connection: &Arc<Connection>) {
        self.deregister_connection(connection).await;
    }
}

fn success<P: Serialize>(payload: &P) -> ActionResult {
    ActionResult::success(payload).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode result payload");
        ActionResult::failure(INTERNAL_ERROR, e)
    })
}

fn reply(connection: Option<&Arc<Connection>>, result: &ActionResult) {
    let Some(connection) = connection else {
        return;
    };

    match codec::encode_result(result) {
        Ok(frame) => {
            connection.enqueue(frame);
        }
        Err(e) => error!(user = %connection.user_id(), error = %e, "Failed to encode result"),
    }
}

/// Deliver an event to every live recipient except the actor.
fn broadcast(event: &Event, recipients: &[Arc<Connection>], actor: UserId) -> usize {
    let frame = match codec::encode_event(event) {
        Ok(frame) => frame,
        Err(e) => {
            error!(event = event.event_type(), error = %e, "Failed to encode event");
            return 0;
        }
    };

    recipients
        .iter()
        .filter(|connection| connection.user_id() != actor && connection.is_live())
        .filter(|connection| connection.enqueue(frame.clone()))
        .count()
}
