/// Account settings: profile edits, avatar removal and preferences
///
/// Every successful response is folded into the shared `SessionManager`, so anything
/// watching the identity (connection, headers) sees the new name or avatar right away.
use crate::backend::{Backend, PreferencesUpdate, ProfileUpdate};
use crate::error::{Result, SyncError};
use crate::models::Session;
use crate::session::SessionManager;
use std::sync::Arc;
use tracing::{error, info};

const MIN_USERNAME_LEN: usize = 3;
const MAX_BIO_LEN: usize = 160;

/// Checks the profile form the same way the server would reject it
pub fn validate_profile(update: &ProfileUpdate) -> Result<()> {
    if update.name.trim().is_empty() {
        return Err(SyncError::Validation("Name is required".to_string()));
    }
    let username = update.username.trim();
    if username.is_empty() {
        return Err(SyncError::Validation("Username is required".to_string()));
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(SyncError::Validation(format!(
            "Username must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    if update.bio.trim().chars().count() > MAX_BIO_LEN {
        return Err(SyncError::Validation(format!(
            "Bio must be {} characters or less",
            MAX_BIO_LEN
        )));
    }
    Ok(())
}

pub struct SettingsService {
    backend: Arc<dyn Backend>,
    sessions: Arc<SessionManager>,
}

impl SettingsService {
    pub fn new(backend: Arc<dyn Backend>, sessions: Arc<SessionManager>) -> Self {
        Self { backend, sessions }
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Session> {
        self.sessions.require()?;
        validate_profile(&update)?;

        let user = self.backend.update_profile(update).await.map_err(|e| {
            error!("Failed to update profile: {}", e);
            e
        })?;
        info!("Profile updated for {}", user.username);
        self.sessions.update_user(user);
        self.sessions.require()
    }

    pub async fn remove_avatar(&self) -> Result<Session> {
        self.sessions.require()?;
        let user = self.backend.remove_avatar().await.map_err(|e| {
            error!("Failed to delete avatar: {}", e);
            e
        })?;
        self.sessions.update_user(user);
        self.sessions.require()
    }

    /// Returned settings are merged over the cached ones; a full user in the reply wins
    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Result<Session> {
        if update == PreferencesUpdate::default() {
            return Err(SyncError::Validation("Nothing to update".to_string()));
        }
        let mut next = self.sessions.require()?;

        let outcome = self.backend.update_preferences(&update).await.map_err(|e| {
            error!("Failed to update settings: {}", e);
            e
        })?;
        next.settings.extend(outcome.settings);
        if let Some(status) = outcome.account_status {
            next.account_status = status;
        }
        self.sessions.update_user(next);
        if let Some(user) = outcome.user {
            self.sessions.update_user(user);
        }
        self.sessions.require()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{session, FakeBackend};
    use crate::backend::{OutgoingFile, PreferencesOutcome};
    use crate::models::AccountStatus;

    async fn logged_in() -> (SettingsService, Arc<SessionManager>, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        let sessions = Arc::new(SessionManager::new(backend.clone()));
        sessions.login("ada", "pw").await.unwrap();
        let service = SettingsService::new(backend.clone(), sessions.clone());
        (service, sessions, backend)
    }

    fn form(name: &str, username: &str, bio: &str) -> ProfileUpdate {
        ProfileUpdate {
            name: name.into(),
            username: username.into(),
            bio: bio.into(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn test_profile_update_reaches_watchers() {
        let (service, sessions, backend) = logged_in().await;
        let mut watcher = sessions.subscribe();
        watcher.borrow_and_update();

        let mut update = form("Ada L", "ada_l", "hello");
        update.avatar = Some(OutgoingFile {
            name: "me.png".into(),
            mime: "image/png".into(),
            bytes: vec![1, 2, 3],
        });
        let user = service.update_profile(update).await.unwrap();
        assert_eq!(user.id, "ada");
        assert_eq!(user.username, "ada_l");
        assert_eq!(user.avatar.as_deref(), Some("/uploads/me.png"));

        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update().as_ref().unwrap().username, "ada_l");
        assert_eq!(backend.count("update_profile:ada_l:me.png"), 1);
    }

    #[tokio::test]
    async fn test_invalid_profile_is_not_sent() {
        let (service, _, backend) = logged_in().await;
        for bad in [
            form("  ", "ada_l", ""),
            form("Ada", "ab", ""),
            form("Ada", "ada_l", &"x".repeat(161)),
        ] {
            assert!(matches!(
                service.update_profile(bad).await,
                Err(SyncError::Validation(_))
            ));
        }
        assert_eq!(backend.count("update_profile"), 0);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_session() {
        let (service, sessions, backend) = logged_in().await;
        backend.fail("update_profile");
        assert!(service.update_profile(form("Ada L", "ada_l", "")).await.is_err());
        assert_eq!(sessions.session().unwrap().username, "user_ada");
    }

    #[tokio::test]
    async fn test_remove_avatar() {
        let (service, sessions, backend) = logged_in().await;
        let mut with_avatar = session("ada");
        with_avatar.avatar = Some("/uploads/old.png".into());
        sessions.update_user(with_avatar);

        let user = service.remove_avatar().await.unwrap();
        assert_eq!(user.avatar, None);
        assert_eq!(sessions.session().unwrap().avatar, None);
        assert_eq!(backend.calls().last().unwrap(), "remove_avatar:");
    }

    #[tokio::test]
    async fn test_preferences_merge_into_session() {
        let (service, sessions, _) = logged_in().await;
        service
            .update_preferences(PreferencesUpdate {
                theme: Some("light".into()),
                account_status: None,
            })
            .await
            .unwrap();
        let user = service
            .update_preferences(PreferencesUpdate {
                theme: None,
                account_status: Some(AccountStatus::Private),
            })
            .await
            .unwrap();

        // the second reply carried no theme, so the first one is kept
        assert_eq!(user.settings["theme"], "light");
        assert_eq!(user.account_status, AccountStatus::Private);
        assert_eq!(sessions.session().unwrap(), user);
    }

    #[tokio::test]
    async fn test_server_user_in_preferences_reply_wins() {
        let (service, _, backend) = logged_in().await;
        let mut server_user = session("ada");
        server_user.username = "ada_server".into();
        *backend.preferences_reply.lock().unwrap() = Some(PreferencesOutcome {
            settings: Default::default(),
            account_status: Some(AccountStatus::Private),
            user: Some(server_user),
        });

        let user = service
            .update_preferences(PreferencesUpdate {
                theme: None,
                account_status: Some(AccountStatus::Private),
            })
            .await
            .unwrap();
        assert_eq!(user.username, "ada_server");
        assert_eq!(
            backend.calls().last().unwrap(),
            r#"update_preferences:{"accountStatus":"private"}"#
        );
    }

    #[tokio::test]
    async fn test_settings_require_login() {
        let backend = Arc::new(FakeBackend::new());
        let sessions = Arc::new(SessionManager::new(backend.clone()));
        let service = SettingsService::new(backend.clone(), sessions);
        assert!(matches!(
            service.remove_avatar().await,
            Err(SyncError::NotAuthenticated)
        ));
        assert!(matches!(
            service
                .update_preferences(PreferencesUpdate {
                    theme: Some("dark".into()),
                    account_status: None,
                })
                .await,
            Err(SyncError::NotAuthenticated)
        ));
        assert!(backend.calls().is_empty());
    }
}
