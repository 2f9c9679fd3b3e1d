/// Shared wire types for the Chyloo API
///
/// Field names follow the server's JSON (`_id`, camelCase). References that the server
/// sometimes populates and sometimes sends as a bare id (`senderId`, `chatId`) deserialize
/// from either form.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Free-form per-user preferences (`theme`, ...) as stored by the server
pub type UserSettings = serde_json::Map<String, serde_json::Value>;

/// A user as embedded in other entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserRefRepr")]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserRef {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Best label for display: name, then username, then id
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserRefRepr {
    Id(String),
    Full {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
}

impl From<UserRefRepr> for UserRef {
    fn from(repr: UserRefRepr) -> Self {
        match repr {
            UserRefRepr::Id(id) => UserRef::from_id(id),
            UserRefRepr::Full {
                id,
                username,
                name,
                avatar,
            } => UserRef {
                id,
                username,
                name,
                avatar,
            },
        }
    }
}

/// Visibility of the viewer's account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Public,
    Private,
}

/// The authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub account_status: AccountStatus,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: UserSettings,
}

impl Session {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }

    /// Merge a partial profile update; id and email survive when the update omits them and
    /// settings are merged key by key
    pub fn merge(&mut self, mut update: Session) {
        let id = if update.id.is_empty() {
            std::mem::take(&mut self.id)
        } else {
            std::mem::take(&mut update.id)
        };
        let email = update.email.take().or_else(|| self.email.take());
        let mut settings = std::mem::take(&mut self.settings);
        settings.extend(std::mem::take(&mut update.settings));
        *self = Session {
            id,
            email,
            settings,
            ..update
        };
    }
}

// ─── Messaging ───────────────────────────────────────────────────────────────

/// Conversation metadata as embedded in a message's `chatId`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChatRefRepr", rename_all = "camelCase")]
pub struct ChatRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub members: Vec<UserRef>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_icon: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatRefRepr {
    Id(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(rename = "_id")]
        id: String,
        #[serde(default)]
        members: Vec<UserRef>,
        #[serde(default)]
        is_group: bool,
        #[serde(default)]
        group_name: Option<String>,
        #[serde(default)]
        group_icon: Option<String>,
    },
}

impl From<ChatRefRepr> for ChatRef {
    fn from(repr: ChatRefRepr) -> Self {
        match repr {
            ChatRefRepr::Id(id) => ChatRef {
                id,
                ..Default::default()
            },
            ChatRefRepr::Full {
                id,
                members,
                is_group,
                group_name,
                group_icon,
            } => ChatRef {
                id,
                members,
                is_group,
                group_name,
                group_icon,
            },
        }
    }
}

impl ChatRef {
    /// Only the id was sent
    pub fn is_bare(&self) -> bool {
        self.members.is_empty() && self.group_name.is_none() && self.group_icon.is_none()
    }
}

/// Summary of one conversation thread (for the list view)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(flatten)]
    pub chat: ChatRef,
    /// Denormalized latest message; `None` renders as "no messages"
    #[serde(default, alias = "lastMessageId", skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub seen_by: Vec<String>,
    #[serde(default)]
    pub has_new_messages: bool,
}

impl Conversation {
    pub fn id(&self) -> &str {
        &self.chat.id
    }
}

/// Seen/unread status that accompanies a pushed message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStatus {
    #[serde(default)]
    pub seen_by: Vec<String>,
    #[serde(default)]
    pub has_new_messages: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    #[serde(other)]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
}

/// Who a deletion applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteScope {
    #[serde(rename = "everyone")]
    Everyone,
    #[serde(rename = "me")]
    SelfOnly,
}

impl DeleteScope {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteScope::Everyone => "everyone",
            DeleteScope::SelfOnly => "me",
        }
    }
}

/// Deletion state of a message kept in the list as a tombstone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deletion {
    #[default]
    Visible,
    /// Permanent, visible to every member
    DeletedForEveryone,
    /// Hidden for the current viewer only
    DeletedForSelf,
}

impl Deletion {
    pub fn from_scope(scope: DeleteScope) -> Self {
        match scope {
            DeleteScope::Everyone => Deletion::DeletedForEveryone,
            DeleteScope::SelfOnly => Deletion::DeletedForSelf,
        }
    }

    pub fn is_deleted(self) -> bool {
        self != Deletion::Visible
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageRepr", into = "MessageRepr")]
pub struct Message {
    pub id: String,
    pub chat: ChatRef,
    pub sender: UserRef,
    pub text: Option<String>,
    pub media: Vec<MediaAttachment>,
    pub created_at: Option<Timestamp>,
    pub deletion: Deletion,
}

impl Message {
    pub fn chat_id(&self) -> &str {
        &self.chat.id
    }

    /// Drop content and mark as a tombstone
    pub fn tombstone(&mut self, scope: DeleteScope) {
        self.text = None;
        self.media.clear();
        self.deletion = Deletion::from_scope(scope);
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRepr {
    #[serde(rename = "_id")]
    id: String,
    chat_id: ChatRef,
    sender_id: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default)]
    media: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete_type: Option<DeleteScope>,
}

impl From<MessageRepr> for Message {
    fn from(r: MessageRepr) -> Self {
        let deletion = match (r.is_deleted, r.delete_type) {
            (false, _) => Deletion::Visible,
            (true, Some(DeleteScope::SelfOnly)) => Deletion::DeletedForSelf,
            (true, _) => Deletion::DeletedForEveryone,
        };
        Message {
            id: r.id,
            chat: r.chat_id,
            sender: r.sender_id,
            text: r.text,
            media: r.media,
            created_at: r.created_at,
            deletion,
        }
    }
}

impl From<Message> for MessageRepr {
    fn from(m: Message) -> Self {
        let delete_type = match m.deletion {
            Deletion::Visible => None,
            Deletion::DeletedForEveryone => Some(DeleteScope::Everyone),
            Deletion::DeletedForSelf => Some(DeleteScope::SelfOnly),
        };
        MessageRepr {
            id: m.id,
            chat_id: m.chat,
            sender_id: m.sender,
            text: m.text,
            media: m.media,
            created_at: m.created_at,
            is_deleted: m.deletion.is_deleted(),
            delete_type,
        }
    }
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LikePost,
    LikeComment,
    Comment,
    Follow,
    FollowAccept,
    FollowRequest,
    #[serde(other)]
    Other,
}

impl NotificationKind {
    /// Grouping used for icons and filters
    pub fn category(self) -> &'static str {
        match self {
            NotificationKind::LikePost | NotificationKind::LikeComment => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::FollowAccept => "follow_accept",
            NotificationKind::FollowRequest => "follow_request",
            NotificationKind::Other => "general",
        }
    }

    /// Only follow requests carry accept/decline actions
    pub fn is_follow_request(self) -> bool {
        self == NotificationKind::FollowRequest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(rename = "senderId")]
    pub sender: UserRef,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub pagination: Pagination,
}

// ─── Posts, stories, profiles ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: UserRef,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_saved: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// One author's active stories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryGroup {
    pub user: UserRef,
    #[serde(default)]
    pub stories: Vec<Story>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowStatus {
    #[default]
    NotFollowing,
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: UserRef,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub follower_count: u32,
    #[serde(default)]
    pub following_count: u32,
    #[serde(default)]
    pub follow_status: FollowStatus,
    #[serde(default)]
    pub account_status: AccountStatus,
}

/// Explicit lifecycle of a fetched collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed(String),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadState::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}
