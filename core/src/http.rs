/// `Backend` over HTTP with a cookie-backed session
///
/// The server answers with JSON envelopes `{ "success": bool, ...payload }`. Non-2xx
/// responses are mapped to `SyncError::Api` with the server's `message`, `error` or
/// `errors[0].message`, falling back to a generic text.
use crate::backend::{
    Backend, ExplorePage, FeedPage, FollowRequestAction, LikeOutcome, OutgoingFile,
    PreferencesOutcome, PreferencesUpdate, ProfileUpdate, Registration, SearchResults,
};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{
    Conversation, DeleteScope, Message, NotificationPage, Profile, Session, StoryGroup,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: Config,
}

impl HttpBackend {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// Share the cookie jar with other components (the SSE transport)
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!("{} {}", method, path);
        self.client.request(method, self.config.url(path))
    }

    /// Send and return the parsed JSON body of a 2xx response
    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let resp = builder.send().await?;
        read_envelope(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, field: &str) -> Result<T> {
        let body = self.send(self.request(Method::GET, path)).await?;
        take_field(body, field)
    }

    async fn call(&self, method: Method, path: &str) -> Result<Value> {
        self.send(self.request(method, path)).await
    }
}

async fn read_envelope(resp: Response) -> Result<Value> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    if !status.is_success() {
        return Err(SyncError::api(status.as_u16(), server_message(&body)));
    }
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(SyncError::api(status.as_u16(), server_message(&body)));
    }
    Ok(body)
}

/// Pull the human-readable error text out of an error body
pub(crate) fn server_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| {
            body.get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

/// Extract a payload field; `data.<field>` is accepted for enveloped payloads
fn file_part(file: OutgoingFile) -> Result<Part> {
    Ok(Part::bytes(file.bytes)
        .file_name(file.name)
        .mime_str(&file.mime)?)
}

fn take_field<T: DeserializeOwned>(mut body: Value, field: &str) -> Result<T> {
    let value = match body.get_mut(field) {
        Some(v) => v.take(),
        None => body
            .get_mut("data")
            .and_then(|d| d.get_mut(field))
            .map(Value::take)
            .unwrap_or(Value::Null),
    };
    Ok(serde_json::from_value(value)?)
}

#[derive(Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

#[async_trait]
impl Backend for HttpBackend {
    async fn current_user(&self) -> Result<Option<Session>> {
        let resp = self.request(Method::GET, "/api/users/me").send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        let body = read_envelope(resp).await?;
        take_field(body, "user")
    }

    async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let body = self
            .send(
                self.request(Method::POST, "/api/auth/login")
                    .json(&json!({ "username": username, "password": password })),
            )
            .await?;
        take_field(body, "user")
    }

    async fn register(&self, form: &Registration) -> Result<Session> {
        let body = self
            .send(self.request(Method::POST, "/api/auth/register").json(form))
            .await?;
        take_field(body, "user")
    }

    async fn forgot_password(&self, username: &str) -> Result<()> {
        self.send(
            self.request(Method::POST, "/api/auth/forgot-password")
                .json(&json!({ "username": username })),
        )
        .await?;
        Ok(())
    }

    async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        let path = format!("/api/auth/reset-password/{}", urlencoding::encode(token));
        self.send(
            self.request(Method::POST, &path)
                .json(&json!({ "password": password })),
        )
        .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.call(Method::POST, "/api/auth/logout").await?;
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        let resp = self.request(Method::GET, "/api/health").send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: HealthBody = resp.json().await?;
        Ok(body.status == "ok")
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.get("/api/messages/conversations", "conversations").await
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let path = format!("/api/messages/{}", urlencoding::encode(chat_id));
        self.get(&path, "messages").await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        files: Vec<OutgoingFile>,
    ) -> Result<Message> {
        let mut form = Form::new()
            .text("text", text.to_string())
            .text("chatId", chat_id.to_string());
        for file in files {
            form = form.part("media", file_part(file)?);
        }
        let body = self
            .send(self.request(Method::POST, "/api/messages").multipart(form))
            .await?;
        take_field(body, "message")
    }

    async fn delete_message(&self, message_id: &str, scope: DeleteScope) -> Result<()> {
        let path = format!(
            "/api/messages/{}?deleteType={}",
            urlencoding::encode(message_id),
            scope.as_str()
        );
        self.call(Method::DELETE, &path).await?;
        Ok(())
    }

    async fn mark_seen(&self, chat_id: &str) -> Result<()> {
        self.send(
            self.request(Method::POST, "/api/messages/seen")
                .json(&json!({ "chatId": chat_id })),
        )
        .await?;
        Ok(())
    }

    async fn notifications(&self, page: u32, limit: u32) -> Result<NotificationPage> {
        let path = format!("/api/notifications?page={}&limit={}", page, limit);
        let body = self.call(Method::GET, &path).await?;
        take_field(body, "data")
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<()> {
        let path = format!(
            "/api/notifications/{}/read",
            urlencoding::encode(notification_id)
        );
        self.call(Method::PUT, &path).await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        self.call(Method::PUT, "/api/notifications/read-all").await?;
        Ok(())
    }

    async fn follow_request(&self, sender_id: &str, action: FollowRequestAction) -> Result<()> {
        let path = format!(
            "/api/users/{}/{}",
            urlencoding::encode(sender_id),
            action.as_str()
        );
        self.call(Method::POST, &path).await?;
        Ok(())
    }

    async fn delete_notification(&self, notification_id: &str) -> Result<()> {
        let path = format!("/api/notifications/{}", urlencoding::encode(notification_id));
        self.call(Method::DELETE, &path).await?;
        Ok(())
    }

    async fn delete_notifications(&self, notification_ids: &[String]) -> Result<()> {
        self.send(
            self.request(Method::POST, "/api/notifications/bulk-delete")
                .json(&json!({ "notificationIds": notification_ids })),
        )
        .await?;
        Ok(())
    }

    async fn notification_action(&self, notification_id: &str) -> Result<Option<String>> {
        let path = format!(
            "/api/notifications/{}/action",
            urlencoding::encode(notification_id)
        );
        let body = self.call(Method::GET, &path).await?;
        take_field(body, "actionUrl")
    }

    async fn like_post(&self, post_id: &str) -> Result<LikeOutcome> {
        let path = format!("/api/posts/{}/like", urlencoding::encode(post_id));
        let body = self.call(Method::POST, &path).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn save_post(&self, post_id: &str) -> Result<Vec<String>> {
        let path = format!("/api/posts/{}/save", urlencoding::encode(post_id));
        let body = self.call(Method::POST, &path).await?;
        take_field(body, "savedPosts")
    }

    async fn follow(&self, user_id: &str) -> Result<()> {
        let path = format!("/api/users/{}/follow", urlencoding::encode(user_id));
        self.call(Method::POST, &path).await?;
        Ok(())
    }

    async fn unfollow(&self, user_id: &str) -> Result<()> {
        let path = format!("/api/users/{}/unfollow", urlencoding::encode(user_id));
        self.call(Method::DELETE, &path).await?;
        Ok(())
    }

    async fn profile(&self, username: &str) -> Result<Profile> {
        let path = format!("/api/users/{}", urlencoding::encode(username));
        self.get(&path, "user").await
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<Session> {
        let mut form = Form::new()
            .text("name", update.name.trim().to_string())
            .text("username", update.username.trim().to_string())
            .text("bio", update.bio.trim().to_string());
        if let Some(file) = update.avatar {
            let part = file_part(file)?;
            form = form.part("avatar", part);
        }
        let body = self
            .send(self.request(Method::PUT, "/api/settings/profile").multipart(form))
            .await?;
        take_field(body, "user")
    }

    async fn remove_avatar(&self) -> Result<Session> {
        let body = self.call(Method::DELETE, "/api/settings/avatar").await?;
        take_field(body, "user")
    }

    async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<PreferencesOutcome> {
        let body = self
            .send(self.request(Method::PUT, "/api/settings/preferences").json(update))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn feed(&self) -> Result<FeedPage> {
        let body = self.call(Method::GET, "/api/feed").await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn explore(&self, page: u32) -> Result<ExplorePage> {
        let path = format!("/api/feed/explore?page={}", page);
        let body = self.call(Method::GET, &path).await?;
        let has_more = body
            .get("pagination")
            .and_then(|p| p.get("hasMore"))
            .and_then(Value::as_bool);
        let posts = take_field(body, "posts").unwrap_or_default();
        Ok(ExplorePage { posts, has_more })
    }

    async fn followed_stories(&self) -> Result<BTreeMap<String, StoryGroup>> {
        let body = self.call(Method::GET, "/api/stories/following").await?;
        let stories: Option<BTreeMap<String, StoryGroup>> = take_field(body, "stories")?;
        Ok(stories.unwrap_or_default())
    }

    async fn delete_story(&self, story_id: &str) -> Result<()> {
        let path = format!("/api/stories/{}", urlencoding::encode(story_id));
        self.call(Method::DELETE, &path).await?;
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<SearchResults> {
        let path = format!("/api/search/?q={}", urlencoding::encode(query));
        let body = self.call(Method::GET, &path).await?;
        Ok(serde_json::from_value(body)?)
    }
}
