//! In-memory chat service.
//!
//! Chats and their participants live in a sharded map. Each operation checks
//! the actor's permission and applies its mutation while holding the chat's
//! entry, so the check cannot go stale before the write lands.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use symphony_protocol::{unix_millis, ChatId, UserId};
use tracing::debug;

use crate::chat::{validate_chat_name, Chat, ChatError, ChatService, Participant, Permission, Role};

struct ChatRecord {
    chat: Chat,
    participants: HashMap<UserId, Participant>,
}

impl ChatRecord {
    fn authorize(&self, actor: UserId, permission: Permission) -> Result<(), ChatError> {
        let participant = self
            .participants
            .get(&actor)
            .ok_or(ChatError::ParticipantNotFound)?;

        if participant.role.allows(permission) {
            Ok(())
        } else {
            Err(ChatError::InsufficientPermissions)
        }
    }

    /// Look up a participant whose role the actor wants to change.
    fn mutable_target(&mut self, target: UserId) -> Result<&mut Participant, ChatError> {
        let participant = self
            .participants
            .get_mut(&target)
            .ok_or(ChatError::ParticipantNotFound)?;

        if participant.role == Role::Owner {
            return Err(ChatError::OwnerRoleImmutable);
        }
        Ok(participant)
    }
}

/// A [`ChatService`] that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryChatService {
    chats: DashMap<ChatId, ChatRecord>,
}

impl MemoryChatService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a chat by id.
    #[must_use]
    pub fn chat(&self, chat: ChatId) -> Option<Chat> {
        self.chats.get(&chat).map(|record| record.chat.clone())
    }

    /// Get a user's membership in a chat.
    #[must_use]
    pub fn participant(&self, chat: ChatId, user: UserId) -> Option<Participant> {
        self.chats
            .get(&chat)
            .and_then(|record| record.participants.get(&user).cloned())
    }

    /// Number of stored chats.
    #[must_use]
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }
}

#[async_trait]
impl ChatService for MemoryChatService {
    async fn create_chat(&self, actor: UserId, name: &str) -> Result<Chat, ChatError> {
        validate_chat_name(name)?;

        let now = unix_millis();
        let chat = Chat {
            id: ChatId::generate(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        let owner = Participant {
            user_id: actor,
            role: Role::Owner,
            joined_at: now,
        };
        let mut participants = HashMap::new();
        participants.insert(actor, owner);

        self.chats.insert(
            chat.id,
            ChatRecord {
                chat: chat.clone(),
                participants,
            },
        );

        debug!(chat = %chat.id, owner = %actor, "Chat created");
        Ok(chat)
    }

    async fn delete_chat(&self, chat: ChatId, actor: UserId) -> Result<(), ChatError> {
        {
            let record = self.chats.get(&chat).ok_or(ChatError::ChatNotFound)?;
            record.authorize(actor, Permission::DeleteChat)?;
        }

        // Re-checked under the removal lock in case roles changed meanwhile.
        self.chats
            .remove_if(&chat, |_, record| {
                record.authorize(actor, Permission::DeleteChat).is_ok()
            })
            .ok_or(ChatError::ChatNotFound)?;

        debug!(chat = %chat, actor = %actor, "Chat deleted");
        Ok(())
    }

    async fn rename_chat(
        &self,
        chat: ChatId,
        new_name: &str,
        actor: UserId,
    ) -> Result<String, ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record.authorize(actor, Permission::UpdateChatName)?;
        validate_chat_name(new_name)?;

        record.chat.name = new_name.to_string();
        record.chat.updated_at = unix_millis();
        Ok(record.chat.name.clone())
    }

    async fn add_member(
        &self,
        chat: ChatId,
        actor: UserId,
        target: UserId,
    ) -> Result<(), ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record.authorize(actor, Permission::AddMemberToChat)?;

        if record.participants.contains_key(&target) {
            return Err(ChatError::AlreadyParticipant);
        }

        record.participants.insert(
            target,
            Participant {
                user_id: target,
                role: Role::Member,
                joined_at: unix_millis(),
            },
        );
        Ok(())
    }

    async fn remove_member(
        &self,
        chat: ChatId,
        actor: UserId,
        target: UserId,
    ) -> Result<(), ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record.authorize(actor, Permission::RemoveMemberFromChat)?;
        record.mutable_target(target)?;

        record.participants.remove(&target);
        Ok(())
    }

    async fn promote(&self, chat: ChatId, actor: UserId, target: UserId) -> Result<(), ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record.authorize(actor, Permission::ManageRolesOfChat)?;
        record.mutable_target(target)?.role = Role::Admin;
        Ok(())
    }

    async fn demote(&self, chat: ChatId, actor: UserId, target: UserId) -> Result<(), ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record.authorize(actor, Permission::ManageRolesOfChat)?;
        record.mutable_target(target)?.role = Role::Member;
        Ok(())
    }

    async fn leave(&self, chat: ChatId, user: UserId) -> Result<(), ChatError> {
        let mut record = self.chats.get_mut(&chat).ok_or(ChatError::ChatNotFound)?;
        record
            .participants
            .remove(&user)
            .map(|_| ())
            .ok_or(ChatError::ParticipantNotFound)
    }

    async fn chats_of_user(&self, user: UserId) -> Result<Vec<ChatId>, ChatError> {
        Ok(self
            .chats
            .iter()
            .filter(|record| record.participants.contains_key(&user))
            .map(|record| *record.key())
            .collect())
    }
}
