//! Chat domain types and the chat service interface consumed by the hub.
//!
//! The hub never checks permissions itself. Every [`ChatService`] operation
//! re-validates the actor's role against persisted data and returns a
//! [`ChatError`] the hub reports back to the actor verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use symphony_protocol::{ChatId, UserId};
use thiserror::Error;

/// Maximum chat name length in characters.
pub const MAX_CHAT_NAME_LENGTH: usize = 15;

/// Validate a chat name.
///
/// # Errors
///
/// Returns [`ChatError::WrongChatName`] if the name is empty or too long.
pub fn validate_chat_name(name: &str) -> Result<(), ChatError> {
    let length = name.chars().count();
    if length == 0 || length > MAX_CHAT_NAME_LENGTH {
        return Err(ChatError::WrongChatName);
    }
    Ok(())
}

/// A persisted chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    /// Creation time in Unix milliseconds.
    pub created_at: u64,
    /// Last update time in Unix milliseconds.
    pub updated_at: u64,
}

/// A permission a chat role may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    AddMemberToChat,
    RemoveMemberFromChat,
    ManageRolesOfChat,
    DeleteChat,
    UpdateChatName,
    AddMessageToChat,
}

/// Role of a participant within one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    /// Permissions granted by this role.
    #[must_use]
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Owner => &[
                Permission::AddMemberToChat,
                Permission::RemoveMemberFromChat,
                Permission::ManageRolesOfChat,
                Permission::DeleteChat,
                Permission::UpdateChatName,
                Permission::AddMessageToChat,
            ],
            Role::Admin => &[
                Permission::AddMemberToChat,
                Permission::RemoveMemberFromChat,
                Permission::UpdateChatName,
                Permission::AddMessageToChat,
            ],
            Role::Member => &[Permission::AddMessageToChat],
        }
    }

    /// Check whether this role grants a permission.
    #[must_use]
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("OWNER"),
            Role::Admin => f.write_str("ADMIN"),
            Role::Member => f.write_str("MEMBER"),
        }
    }
}

/// A user's membership in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    /// Join time in Unix milliseconds.
    pub joined_at: u64,
}

/// Errors returned by chat service operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Chat name is empty or too long.
    #[error("wrong chat name")]
    WrongChatName,

    /// Chat does not exist.
    #[error("chat not found")]
    ChatNotFound,

    /// User is not a participant of the chat.
    #[error("chat participant not found")]
    ParticipantNotFound,

    /// User is already a participant of the chat.
    #[error("user is already a chat participant")]
    AlreadyParticipant,

    /// Actor's role lacks the required permission.
    #[error("user does not have required permissions for this action")]
    InsufficientPermissions,

    /// The chat owner's membership cannot be changed by others.
    #[error("chat owner role cannot be changed")]
    OwnerRoleImmutable,

    /// Backing storage failed. Persistent services report driver errors here.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::WrongChatName => "WRONG_CHAT_NAME",
            ChatError::ChatNotFound => "CHAT_NOT_FOUND",
            ChatError::ParticipantNotFound => "CHAT_PARTICIPANT_NOT_FOUND",
            ChatError::AlreadyParticipant => "ALREADY_CHAT_PARTICIPANT",
            ChatError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ChatError::OwnerRoleImmutable => "OWNER_ROLE_IMMUTABLE",
            ChatError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Permission-checked chat lifecycle and membership operations.
///
/// Implementations are the source of truth for membership; the hub only
/// mirrors who is reachable right now.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Create a chat owned by `actor`.
    async fn create_chat(&self, actor: UserId, name: &str) -> Result<Chat, ChatError>;

    /// Delete a chat with all its participants.
    async fn delete_chat(&self, chat: ChatId, actor: UserId) -> Result<(), ChatError>;

    /// Rename a chat, returning the stored name.
    async fn rename_chat(
        &self,
        chat: ChatId,
        new_name: &str,
        actor: UserId,
    ) -> Result<String, ChatError>;

    /// Add `target` to a chat as a member.
    async fn add_member(&self, chat: ChatId, actor: UserId, target: UserId)
        -> Result<(), ChatError>;

    /// Remove `target` from a chat.
    async fn remove_member(
        &self,
        chat: ChatId,
        actor: UserId,
        target: UserId,
    ) -> Result<(), ChatError>;

    /// Promote `target` to chat admin.
    async fn promote(&self, chat: ChatId, actor: UserId, target: UserId) -> Result<(), ChatError>;

    /// Demote chat admin `target` to member.
    async fn demote(&self, chat: ChatId, actor: UserId, target: UserId) -> Result<(), ChatError>;

    /// Remove `user` from a chat at their own request.
    async fn leave(&self, chat: ChatId, user: UserId) -> Result<(), ChatError>;

    /// Chats `user` currently participates in.
    async fn chats_of_user(&self, user: UserId) -> Result<Vec<ChatId>, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_name_validation() {
        assert!(validate_chat_name("Trip").is_ok());
        // Length is counted in characters, not bytes.
        assert!(validate_chat_name(&"é".repeat(MAX_CHAT_NAME_LENGTH)).is_ok());
        assert_eq!(validate_chat_name(""), Err(ChatError::WrongChatName));
        assert_eq!(
            validate_chat_name(&"a".repeat(MAX_CHAT_NAME_LENGTH + 1)),
            Err(ChatError::WrongChatName)
        );
    }

    #[test]
    fn test_role_permissions() {
        assert!(Role::Owner.allows(Permission::DeleteChat));
        assert!(Role::Owner.allows(Permission::ManageRolesOfChat));
        assert!(Role::Admin.allows(Permission::AddMemberToChat));
        assert!(!Role::Admin.allows(Permission::DeleteChat));
        assert!(!Role::Admin.allows(Permission::ManageRolesOfChat));
        assert!(!Role::Member.allows(Permission::UpdateChatName));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ChatError::InsufficientPermissions.code(),
            "INSUFFICIENT_PERMISSIONS"
        );
        assert_eq!(ChatError::Storage("down".into()).code(), "STORAGE_ERROR");
    }
}
