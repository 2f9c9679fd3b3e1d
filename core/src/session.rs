/// Authenticated identity, passed explicitly to whoever needs it
use crate::backend::{Backend, Registration};
use crate::error::{Result, SyncError};
use crate::models::Session;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Owns the current identity and publishes every change on a watch channel
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    current: watch::Sender<Option<Session>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (current, _) = watch::channel(None);
        Self { backend, current }
    }

    /// Current identity, if any
    pub fn session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn require(&self) -> Result<Session> {
        self.session().ok_or(SyncError::NotAuthenticated)
    }

    /// Follow identity changes (login, logout, profile edits)
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    /// Restore the session from the ambient cookie. Any failure means logged out.
    pub async fn check_status(&self) -> Option<Session> {
        let session = match self.backend.current_user().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Auth status check failed: {}", e);
                None
            }
        };
        self.current.send_replace(session.clone());
        session
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(SyncError::Validation(
                "Username and password are required".to_string(),
            ));
        }
        let session = self.backend.login(username.trim(), password).await?;
        info!("Logged in as {}", session.username);
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub async fn register(&self, form: &Registration) -> Result<Session> {
        let session = self.backend.register(form).await?;
        info!("Registered {}", session.username);
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub async fn forgot_password(&self, username: &str) -> Result<()> {
        self.backend.forgot_password(username).await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        self.backend.reset_password(token, password).await
    }

    /// The local session is cleared even when the server call fails
    pub async fn logout(&self) {
        if let Err(e) = self.backend.logout().await {
            warn!("Logout API call failed: {}", e);
        }
        self.current.send_replace(None);
    }

    /// Apply a profile/settings response to the cached identity
    pub fn update_user(&self, update: Session) {
        self.current.send_modify(|current| match current {
            Some(existing) => existing.merge(update),
            None => *current = Some(update),
        });
    }
}
