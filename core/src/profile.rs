/// Profile page follow state
///
/// Following a private account leaves the request pending; only a transition into or out
/// of `Accepted` changes the follower count.
use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::models::{AccountStatus, FollowStatus, Profile};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{error, info};

/// Status after a successful follow request
pub fn status_after_follow(account: AccountStatus) -> FollowStatus {
    match account {
        AccountStatus::Private => FollowStatus::Pending,
        AccountStatus::Public => FollowStatus::Accepted,
    }
}

pub struct ProfileView {
    backend: Arc<dyn Backend>,
    profile: RwLock<Option<Profile>>,
}

impl ProfileView {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            profile: RwLock::new(None),
        }
    }

    pub async fn view(&self) -> RwLockReadGuard<'_, Option<Profile>> {
        self.profile.read().await
    }

    pub async fn load(&self, username: &str) -> Result<()> {
        match self.backend.profile(username).await {
            Ok(profile) => {
                *self.profile.write().await = Some(profile);
                Ok(())
            }
            Err(e) => {
                error!("Failed to load profile {}: {}", username, e);
                *self.profile.write().await = None;
                Err(e)
            }
        }
    }

    async fn target(&self) -> Result<(String, FollowStatus, AccountStatus)> {
        self.profile
            .read()
            .await
            .as_ref()
            .map(|p| (p.user.id.clone(), p.follow_status, p.account_status))
            .ok_or_else(|| SyncError::Validation("No profile loaded".to_string()))
    }

    /// No-op when already following or pending
    pub async fn follow(&self) -> Result<FollowStatus> {
        let (user_id, status, account) = self.target().await?;
        if status != FollowStatus::NotFollowing {
            return Ok(status);
        }
        self.backend.follow(&user_id).await.map_err(|e| {
            error!("Failed to follow {}: {}", user_id, e);
            e
        })?;

        let next = status_after_follow(account);
        info!("Follow {} -> {:?}", user_id, next);
        Ok(self.apply(&user_id, next).await)
    }

    /// Also withdraws a pending request
    pub async fn unfollow(&self) -> Result<FollowStatus> {
        let (user_id, status, _) = self.target().await?;
        if status == FollowStatus::NotFollowing {
            return Ok(status);
        }
        self.backend.unfollow(&user_id).await.map_err(|e| {
            error!("Failed to unfollow {}: {}", user_id, e);
            e
        })?;
        Ok(self.apply(&user_id, FollowStatus::NotFollowing).await)
    }

    async fn apply(&self, user_id: &str, next: FollowStatus) -> FollowStatus {
        let mut guard = self.profile.write().await;
        // The page may have switched to another user during the request
        let Some(profile) = guard.as_mut().filter(|p| p.user.id == user_id) else {
            return next;
        };
        let was_accepted = profile.follow_status == FollowStatus::Accepted;
        let now_accepted = next == FollowStatus::Accepted;
        if now_accepted && !was_accepted {
            profile.follower_count += 1;
        } else if was_accepted && !now_accepted {
            profile.follower_count = profile.follower_count.saturating_sub(1);
        }
        profile.follow_status = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::models::UserRef;

    fn profile(id: &str, account: AccountStatus, followers: u32) -> Profile {
        Profile {
            user: UserRef::from_id(id),
            bio: None,
            follower_count: followers,
            following_count: 0,
            follow_status: FollowStatus::NotFollowing,
            account_status: account,
        }
    }

    async fn loaded(account: AccountStatus) -> (ProfileView, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        backend
            .profiles
            .lock()
            .unwrap()
            .insert("ana".into(), profile("u-ana", account, 10));
        let view = ProfileView::new(backend.clone());
        view.load("ana").await.unwrap();
        (view, backend)
    }

    #[tokio::test]
    async fn test_follow_public_account() {
        let (view, backend) = loaded(AccountStatus::Public).await;
        assert_eq!(view.follow().await.unwrap(), FollowStatus::Accepted);
        assert_eq!(view.view().await.as_ref().unwrap().follower_count, 11);

        assert_eq!(view.unfollow().await.unwrap(), FollowStatus::NotFollowing);
        assert_eq!(view.view().await.as_ref().unwrap().follower_count, 10);
        assert_eq!(
            backend.calls(),
            vec!["profile:ana", "follow:u-ana", "unfollow:u-ana"]
        );
    }

    #[tokio::test]
    async fn test_private_account_goes_pending() {
        let (view, _) = loaded(AccountStatus::Private).await;
        assert_eq!(view.follow().await.unwrap(), FollowStatus::Pending);
        assert_eq!(view.view().await.as_ref().unwrap().follower_count, 10);

        // following again while pending sends nothing
        assert_eq!(view.follow().await.unwrap(), FollowStatus::Pending);

        assert_eq!(view.unfollow().await.unwrap(), FollowStatus::NotFollowing);
        assert_eq!(view.view().await.as_ref().unwrap().follower_count, 10);
    }

    #[tokio::test]
    async fn test_failed_follow_keeps_state() {
        let (view, backend) = loaded(AccountStatus::Public).await;
        backend.fail("follow");
        assert!(view.follow().await.is_err());
        let profile = view.view().await;
        let profile = profile.as_ref().unwrap();
        assert_eq!(profile.follow_status, FollowStatus::NotFollowing);
        assert_eq!(profile.follower_count, 10);
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let view = ProfileView::new(Arc::new(FakeBackend::new()));
        assert!(view.load("ghost").await.is_err());
        assert!(matches!(view.follow().await, Err(SyncError::Validation(_))));
    }
}
