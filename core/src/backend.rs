/// The REST surface this client consumes
///
/// Every store talks to the server through `Backend`, so the reconciliation logic can be
/// driven by the real `HttpBackend` or by an in-memory fake.
use crate::error::Result;
use crate::models::{
    AccountStatus, Conversation, DeleteScope, Message, NotificationPage, Post, Profile, Session,
    StoryGroup, UserRef, UserSettings,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file attached to an outgoing multipart request
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Profile form submitted from the settings page; every text field is sent
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub username: String,
    pub bio: String,
    pub avatar: Option<OutgoingFile>,
}

/// Preference changes; absent fields are left untouched on the server
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_status: Option<AccountStatus>,
}

/// What `PUT /api/settings/preferences` answers with
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesOutcome {
    #[serde(default)]
    pub settings: UserSettings,
    #[serde(default)]
    pub account_status: Option<AccountStatus>,
    /// Full user, when the server chose to send one
    #[serde(default)]
    pub user: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowRequestAction {
    Accept,
    Decline,
}

impl FollowRequestAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowRequestAction::Accept => "accept",
            FollowRequestAction::Decline => "decline",
        }
    }
}

/// Authoritative like state returned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub is_liked: bool,
    #[serde(default)]
    pub likes_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub feed_days_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExplorePage {
    #[serde(default)]
    pub posts: Vec<Post>,
    /// `None` when the server sent no pagination block
    #[serde(default)]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub users: Vec<UserRef>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// `None` when the ambient session cookie is missing or expired
    async fn current_user(&self) -> Result<Option<Session>>;
    async fn login(&self, username: &str, password: &str) -> Result<Session>;
    async fn register(&self, form: &Registration) -> Result<Session>;
    async fn forgot_password(&self, username: &str) -> Result<()>;
    async fn reset_password(&self, token: &str, password: &str) -> Result<()>;
    async fn logout(&self) -> Result<()>;

    /// True when the server reports `status: "ok"`
    async fn health(&self) -> Result<bool>;

    async fn conversations(&self) -> Result<Vec<Conversation>>;
    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>>;
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        files: Vec<OutgoingFile>,
    ) -> Result<Message>;
    async fn delete_message(&self, message_id: &str, scope: DeleteScope) -> Result<()>;
    async fn mark_seen(&self, chat_id: &str) -> Result<()>;

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage>;
    async fn mark_notification_read(&self, notification_id: &str) -> Result<()>;
    async fn mark_all_notifications_read(&self) -> Result<()>;
    async fn follow_request(&self, sender_id: &str, action: FollowRequestAction) -> Result<()>;
    async fn delete_notification(&self, notification_id: &str) -> Result<()>;
    async fn delete_notifications(&self, notification_ids: &[String]) -> Result<()>;
    /// Where a tap on the notification should navigate
    async fn notification_action(&self, notification_id: &str) -> Result<Option<String>>;

    async fn like_post(&self, post_id: &str) -> Result<LikeOutcome>;
    /// Returns the viewer's saved post ids after the toggle
    async fn save_post(&self, post_id: &str) -> Result<Vec<String>>;
    async fn follow(&self, user_id: &str) -> Result<()>;
    async fn unfollow(&self, user_id: &str) -> Result<()>;
    async fn profile(&self, username: &str) -> Result<Profile>;

    /// Returns the updated user
    async fn update_profile(&self, update: ProfileUpdate) -> Result<Session>;
    async fn remove_avatar(&self) -> Result<Session>;
    async fn update_preferences(&self, update: &PreferencesUpdate)
        -> Result<PreferencesOutcome>;

    async fn feed(&self) -> Result<FeedPage>;
    async fn explore(&self, page: u32) -> Result<ExplorePage>;
    /// Keyed by author id
    async fn followed_stories(&self) -> Result<BTreeMap<String, StoryGroup>>;
    async fn delete_story(&self, story_id: &str) -> Result<()>;
    async fn search(&self, query: &str) -> Result<SearchResults>;
}
