//! Envelope types exchanged between chat clients and the hub.
//!
//! There are three wire shapes:
//!
//! - [`ActionRequest`] - `{"chat_action": TAG, "payload": {...}}`, client to server
//! - [`ActionResult`] - `{"chat_action_result": "SUCCESS"|"FAILED", "payload": {...}}`,
//!   sent only to the client that issued the action
//! - [`Event`] - `{"event_type": TAG, "payload": {...}}`, fanned out to live chat members
//!
//! Request and event payloads are closed tagged unions, so a frame missing a
//! required key (or carrying a malformed id) fails to decode.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ChatId, UserId};

/// Action tags accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateChat,
    DeleteChat,
    RenameChat,
    LeaveChat,
    AddMemberToChat,
    RemoveMemberFromChat,
    PromoteUserToChatAdmin,
    DemoteChatAdminToChatMember,
}

impl ActionKind {
    /// Wire tag of this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateChat => "CREATE_CHAT",
            ActionKind::DeleteChat => "DELETE_CHAT",
            ActionKind::RenameChat => "RENAME_CHAT",
            ActionKind::LeaveChat => "LEAVE_CHAT",
            ActionKind::AddMemberToChat => "ADD_MEMBER_TO_CHAT",
            ActionKind::RemoveMemberFromChat => "REMOVE_MEMBER_FROM_CHAT",
            ActionKind::PromoteUserToChatAdmin => "PROMOTE_USER_TO_CHAT_ADMIN",
            ActionKind::DemoteChatAdminToChatMember => "DEMOTE_CHAT_ADMIN_TO_CHAT_MEMBER",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound action request.
///
/// `user_id` is always the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "chat_action",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum ActionRequest {
    CreateChat {
        user_id: UserId,
        chat_name: String,
    },
    DeleteChat {
        chat_id: ChatId,
        user_id: UserId,
    },
    RenameChat {
        chat_id: ChatId,
        user_id: UserId,
        new_chat_name: String,
    },
    LeaveChat {
        chat_id: ChatId,
        user_id: UserId,
    },
    AddMemberToChat {
        chat_id: ChatId,
        user_id: UserId,
        invited_user_id: UserId,
    },
    RemoveMemberFromChat {
        chat_id: ChatId,
        user_id: UserId,
        removing_user_id: UserId,
    },
    PromoteUserToChatAdmin {
        chat_id: ChatId,
        user_id: UserId,
        promoted_user_id: UserId,
    },
    DemoteChatAdminToChatMember {
        chat_id: ChatId,
        user_id: UserId,
        admin_user_id: UserId,
    },
}

impl ActionRequest {
    /// Get the action tag.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::CreateChat { .. } => ActionKind::CreateChat,
            ActionRequest::DeleteChat { .. } => ActionKind::DeleteChat,
            ActionRequest::RenameChat { .. } => ActionKind::RenameChat,
            ActionRequest::LeaveChat { .. } => ActionKind::LeaveChat,
            ActionRequest::AddMemberToChat { .. } => ActionKind::AddMemberToChat,
            ActionRequest::RemoveMemberFromChat { .. } => ActionKind::RemoveMemberFromChat,
            ActionRequest::PromoteUserToChatAdmin { .. } => ActionKind::PromoteUserToChatAdmin,
            ActionRequest::DemoteChatAdminToChatMember { .. } => {
                ActionKind::DemoteChatAdminToChatMember
            }
        }
    }

    /// The user performing the action.
    #[must_use]
    pub fn actor(&self) -> UserId {
        match self {
            ActionRequest::CreateChat { user_id, .. }
            | ActionRequest::DeleteChat { user_id, .. }
            | ActionRequest::RenameChat { user_id, .. }
            | ActionRequest::LeaveChat { user_id, .. }
            | ActionRequest::AddMemberToChat { user_id, .. }
            | ActionRequest::RemoveMemberFromChat { user_id, .. }
            | ActionRequest::PromoteUserToChatAdmin { user_id, .. }
            | ActionRequest::DemoteChatAdminToChatMember { user_id, .. } => *user_id,
        }
    }

    /// The chat the action targets, if it already exists.
    #[must_use]
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            ActionRequest::CreateChat { .. } => None,
            ActionRequest::DeleteChat { chat_id, .. }
            | ActionRequest::RenameChat { chat_id, .. }
            | ActionRequest::LeaveChat { chat_id, .. }
            | ActionRequest::AddMemberToChat { chat_id, .. }
            | ActionRequest::RemoveMemberFromChat { chat_id, .. }
            | ActionRequest::PromoteUserToChatAdmin { chat_id, .. }
            | ActionRequest::DemoteChatAdminToChatMember { chat_id, .. } => Some(*chat_id),
        }
    }

    /// Create a CREATE_CHAT request.
    #[must_use]
    pub fn create_chat(user_id: UserId, chat_name: impl Into<String>) -> Self {
        ActionRequest::CreateChat {
            user_id,
            chat_name: chat_name.into(),
        }
    }

    /// Create a RENAME_CHAT request.
    #[must_use]
    pub fn rename_chat(chat_id: ChatId, user_id: UserId, new_chat_name: impl Into<String>) -> Self {
        ActionRequest::RenameChat {
            chat_id,
            user_id,
            new_chat_name: new_chat_name.into(),
        }
    }

    /// Create an ADD_MEMBER_TO_CHAT request.
    #[must_use]
    pub fn add_member(chat_id: ChatId, user_id: UserId, invited_user_id: UserId) -> Self {
        ActionRequest::AddMemberToChat {
            chat_id,
            user_id,
            invited_user_id,
        }
    }

    /// Create a REMOVE_MEMBER_FROM_CHAT request.
    #[must_use]
    pub fn remove_member(chat_id: ChatId, user_id: UserId, removing_user_id: UserId) -> Self {
        ActionRequest::RemoveMemberFromChat {
            chat_id,
            user_id,
            removing_user_id,
        }
    }
}

/// Outcome tag of an [`ActionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failed,
}

/// Direct response to the client that issued an action.
///
/// On failure the payload carries `error` (human readable) and `code`.
/// On success it carries one of the typed payloads below, which clients
/// can recover with `serde_json::from_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub chat_action_result: ActionStatus,
    pub payload: serde_json::Value,
}

impl ActionResult {
    /// Create a success result from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn success<P: Serialize>(payload: &P) -> Result<Self, serde_json::Error> {
        Ok(Self {
            chat_action_result: ActionStatus::Success,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Create a failure result.
    #[must_use]
    pub fn failure(code: &str, error: impl fmt::Display) -> Self {
        Self {
            chat_action_result: ActionStatus::Failed,
            payload: serde_json::json!({
                "error": error.to_string(),
                "code": code,
            }),
        }
    }

    /// Check whether the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.chat_action_result == ActionStatus::Success
    }

    /// The error message of a failed result.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(|e| e.as_str())
    }

    /// The error code of a failed result.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.payload.get("code").and_then(|e| e.as_str())
    }
}

/// CREATE_CHAT success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCreated {
    pub chat_id: ChatId,
    pub chat_name: String,
    pub chat_created_at: u64,
}

/// DELETE_CHAT and LEAVE_CHAT success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_id: ChatId,
}

/// RENAME_CHAT success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRenamed {
    pub chat_id: ChatId,
    pub new_chat_name: String,
}

/// ADD_MEMBER_TO_CHAT success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub chat_id: ChatId,
    pub inviter_user_id: UserId,
    pub invited_user_id: UserId,
}

/// REMOVE_MEMBER_FROM_CHAT success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub chat_id: ChatId,
    pub kicker_user_id: UserId,
    pub kicked_user_id: UserId,
}

/// PROMOTE_USER_TO_CHAT_ADMIN success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminPromoted {
    pub chat_id: ChatId,
    pub promoter_user_id: UserId,
    pub promoted_user_id: UserId,
}

/// DEMOTE_CHAT_ADMIN_TO_CHAT_MEMBER success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDemoted {
    pub chat_id: ChatId,
    pub demoter_user_id: UserId,
    pub demoted_user_id: UserId,
}

/// A broadcast notification describing a state change of a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event_type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum Event {
    UserEnteredChat {
        chat_id: ChatId,
        inviter_user_id: UserId,
        invited_user_id: UserId,
    },
    UserLeftChat {
        chat_id: ChatId,
        user_id: UserId,
        left_at: u64,
    },
    ChatNameUpdated {
        chat_id: ChatId,
        user_id: UserId,
        new_chat_name: String,
    },
    UserWasKickedFromChat {
        chat_id: ChatId,
        kicker_user_id: UserId,
        kicked_user_id: UserId,
    },
    UserWasPromotedToChatAdmin {
        chat_id: ChatId,
        promoter_user_id: UserId,
        promoted_user_id: UserId,
    },
    UserWasDemotedFromChatAdmin {
        chat_id: ChatId,
        demoter_user_id: UserId,
        demoted_user_id: UserId,
    },
    ChatDeleted {
        chat_id: ChatId,
        user_id: UserId,
    },
}

impl Event {
    /// Wire tag of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::UserEnteredChat { .. } => "USER_ENTERED_CHAT",
            Event::UserLeftChat { .. } => "USER_LEFT_CHAT",
            Event::ChatNameUpdated { .. } => "CHAT_NAME_UPDATED",
            Event::UserWasKickedFromChat { .. } => "USER_WAS_KICKED_FROM_CHAT",
            Event::UserWasPromotedToChatAdmin { .. } => "USER_WAS_PROMOTED_TO_CHAT_ADMIN",
            Event::UserWasDemotedFromChatAdmin { .. } => "USER_WAS_DEMOTED_FROM_CHAT_ADMIN",
            Event::ChatDeleted { .. } => "CHAT_DELETED",
        }
    }

    /// The chat this event concerns.
    #[must_use]
    pub fn chat_id(&self) -> ChatId {
        match self {
            Event::UserEnteredChat { chat_id, .. }
            | Event::UserLeftChat { chat_id, .. }
            | Event::ChatNameUpdated { chat_id, .. }
            | Event::UserWasKickedFromChat { chat_id, .. }
            | Event::UserWasPromotedToChatAdmin { chat_id, .. }
            | Event::UserWasDemotedFromChatAdmin { chat_id, .. }
            | Event::ChatDeleted { chat_id, .. } => *chat_id,
        }
    }
}
