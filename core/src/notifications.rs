/// Notification list with read-state reconciliation
///
/// Local read marks and `notification_read` pushes describe the same transition, so
/// marking is idempotent and the unread counter never goes below zero.
use crate::backend::{Backend, FollowRequestAction};
use crate::connection::PushEvent;
use crate::error::{Result, SyncError};
use crate::models::{LoadState, Notification, NotificationPage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
pub struct NotificationStore {
    items: Vec<Notification>,
    unread_count: u32,
    page: u32,
    pages: u32,
    state: LoadState,
    /// Read acknowledgements for entries not loaded yet, so a repeat is not counted twice
    acknowledged: HashSet<String>,
    /// Set by mark-all-read until the next page load: every unloaded entry is read already
    all_read: bool,
    banner: Option<String>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.page < self.pages
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Last action error, for the dismissible banner
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn begin_load(&mut self) {
        self.state = LoadState::Loading;
    }

    pub fn fail_load(&mut self, msg: String) {
        self.state = LoadState::Failed(msg);
    }

    /// Replace, or append to the tail when `append`; counters come from the server
    pub fn apply_page(&mut self, page: u32, append: bool, data: NotificationPage) {
        if append {
            for n in data.notifications {
                if self.get(&n.id).is_none() {
                    self.items.push(n);
                }
            }
        } else {
            self.items = data.notifications;
        }
        self.unread_count = data.pagination.unread_count;
        self.pages = data.pagination.pages;
        self.page = page;
        self.acknowledged.clear();
        self.all_read = false;
        self.state = LoadState::Ready;
    }

    /// Returns true when this call changed the unread state
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if n.is_read => false,
            Some(n) => {
                n.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            None if self.all_read => false,
            None => {
                if self.acknowledged.insert(id.to_string()) {
                    self.unread_count = self.unread_count.saturating_sub(1);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.items {
            n.is_read = true;
        }
        self.unread_count = 0;
        self.all_read = true;
    }

    /// Drop an entry; an unread one also leaves the counter
    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let pos = self.items.iter().position(|n| n.id == id)?;
        let removed = self.items.remove(pos);
        if !removed.is_read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    /// Live push: prepend unless already present
    pub fn on_new_notification(&mut self, notification: Notification) -> bool {
        if self.get(&notification.id).is_some() {
            return false;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.items.insert(0, notification);
        true
    }

    pub fn on_notification_read(&mut self, id: &str) -> bool {
        self.mark_read(id)
    }
}

/// Notification screen state plus the server calls that drive it
#[derive(Clone)]
pub struct NotificationCenter {
    backend: Arc<dyn Backend>,
    store: Arc<RwLock<NotificationStore>>,
    page_size: u32,
}

impl NotificationCenter {
    pub fn new(backend: Arc<dyn Backend>, page_size: u32) -> Self {
        Self {
            backend,
            store: Arc::new(RwLock::new(NotificationStore::new())),
            page_size,
        }
    }

    pub async fn view(&self) -> RwLockReadGuard<'_, NotificationStore> {
        self.store.read().await
    }

    pub async fn dismiss_banner(&self) {
        self.store.write().await.dismiss_banner();
    }

    pub async fn fetch_notifications(&self, page: u32, append: bool) -> Result<()> {
        self.store.write().await.begin_load();
        match self.backend.notifications(page, self.page_size).await {
            Ok(data) => {
                debug!("Fetched notification page {} ({} items)", page, data.notifications.len());
                self.store.write().await.apply_page(page, append, data);
                Ok(())
            }
            Err(e) => {
                error!("Error fetching notifications: {}", e);
                self.store.write().await.fail_load(e.user_message());
                Err(e)
            }
        }
    }

    /// Next page, if there is one and nothing is loading
    pub async fn load_more(&self) -> Result<bool> {
        let next = {
            let store = self.store.read().await;
            if !store.has_more() || store.state().is_loading() {
                return Ok(false);
            }
            store.page() + 1
        };
        self.fetch_notifications(next, true).await?;
        Ok(true)
    }

    pub async fn refetch(&self) -> Result<()> {
        self.fetch_notifications(1, false).await
    }

    /// Optimistic; the server call runs in the background and failures are only logged
    pub async fn mark_as_read(&self, id: &str) -> Option<JoinHandle<()>> {
        if !self.store.write().await.mark_read(id) {
            return None;
        }
        let backend = self.backend.clone();
        let id = id.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = backend.mark_notification_read(&id).await {
                warn!("Error marking notification {} as read: {}", id, e);
            }
        }))
    }

    pub async fn mark_all_as_read(&self) -> JoinHandle<()> {
        self.store.write().await.mark_all_read();
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.mark_all_notifications_read().await {
                warn!("Error marking all notifications as read: {}", e);
            }
        })
    }

    /// Accept or decline; the entry leaves the list only once the server agreed
    pub async fn handle_follow_request(
        &self,
        notification_id: &str,
        action: FollowRequestAction,
    ) -> Result<()> {
        let sender_id = {
            let store = self.store.read().await;
            let n = store.get(notification_id).ok_or_else(|| {
                SyncError::Validation(format!("unknown notification {}", notification_id))
            })?;
            if !n.kind.is_follow_request() {
                return Err(SyncError::Validation(
                    "notification is not a follow request".to_string(),
                ));
            }
            n.sender.id.clone()
        };

        match self.backend.follow_request(&sender_id, action).await {
            Ok(()) => {
                self.store.write().await.remove(notification_id);
                Ok(())
            }
            Err(e) => {
                error!("Error handling follow request ({}): {}", action.as_str(), e);
                self.store.write().await.banner =
                    Some(format!("Failed to {} follow request", action.as_str()));
                Err(e)
            }
        }
    }

    pub async fn delete_notification(&self, id: &str) -> Result<()> {
        if let Err(e) = self.backend.delete_notification(id).await {
            error!("Error deleting notification: {}", e);
            self.store.write().await.banner = Some("Failed to delete notification".to_string());
            return Err(e);
        }
        self.store.write().await.remove(id);
        Ok(())
    }

    pub async fn delete_notifications(&self, ids: &[String]) -> Result<()> {
        if let Err(e) = self.backend.delete_notifications(ids).await {
            error!("Error deleting notifications: {}", e);
            self.store.write().await.banner = Some("Failed to delete notifications".to_string());
            return Err(e);
        }
        let mut store = self.store.write().await;
        for id in ids {
            store.remove(id);
        }
        Ok(())
    }

    /// Navigation target for a tapped notification
    pub async fn notification_action(&self, id: &str) -> Option<String> {
        match self.backend.notification_action(id).await {
            Ok(url) => url,
            Err(e) => {
                error!("Error handling notification click: {}", e);
                self.store.write().await.banner = Some("Failed to process notification".to_string());
                None
            }
        }
    }

    /// Apply a push event; events for other stores are ignored
    pub async fn handle_event(&self, event: &PushEvent) {
        match event {
            PushEvent::NewNotification(n) => {
                self.store.write().await.on_new_notification(n.clone());
            }
            PushEvent::NotificationRead { notification_id } => {
                self.store.write().await.on_notification_read(notification_id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::models::{NotificationKind, Pagination, UserRef};

    fn notif(id: &str, kind: NotificationKind, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            kind,
            sender: UserRef::from_id(format!("sender-{}", id)),
            message: String::new(),
            is_read,
            created_at: None,
        }
    }

    fn page(items: Vec<Notification>, pages: u32, unread: u32) -> NotificationPage {
        NotificationPage {
            notifications: items,
            pagination: Pagination {
                page: 1,
                pages,
                total: 0,
                unread_count: unread,
            },
        }
    }

    #[test]
    fn test_mark_read_is_optimistic_and_idempotent() {
        let mut store = NotificationStore::new();
        store.apply_page(
            1,
            false,
            page(
                vec![
                    notif("n1", NotificationKind::Comment, false),
                    notif("n2", NotificationKind::Follow, false),
                ],
                1,
                3,
            ),
        );

        assert!(store.mark_read("n1"));
        assert_eq!(store.unread_count(), 2);
        assert!(store.get("n1").unwrap().is_read);

        // the matching push arrives later
        assert!(!store.on_notification_read("n1"));
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_mark_all_then_push_never_underflows() {
        let mut store = NotificationStore::new();
        store.apply_page(1, false, page(vec![notif("n1", NotificationKind::Comment, false)], 1, 1));
        store.mark_all_read();
        assert_eq!(store.unread_count(), 0);
        store.on_notification_read("n1");
        store.on_notification_read("unloaded");
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_read_push_for_unloaded_entry_counts_once() {
        let mut store = NotificationStore::new();
        store.apply_page(1, false, page(vec![], 3, 5));
        assert!(store.on_notification_read("n40"));
        assert!(!store.on_notification_read("n40"));
        assert_eq!(store.unread_count(), 4);
    }

    #[test]
    fn test_read_push_after_mark_all_ignores_unloaded_entry() {
        let mut store = NotificationStore::new();
        store.apply_page(1, false, page(vec![], 3, 5));
        store.mark_all_read();
        assert!(store.on_new_notification(notif("n99", NotificationKind::Comment, false)));
        assert_eq!(store.unread_count(), 1);

        assert!(!store.on_notification_read("n40"));
        assert_eq!(store.unread_count(), 1);

        // the fresh entry is still tracked individually
        assert!(store.on_notification_read("n99"));
        assert_eq!(store.unread_count(), 0);

        // a reload hands the counter back to the server
        store.apply_page(1, false, page(vec![], 3, 2));
        assert!(store.on_notification_read("n40"));
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_new_notification_prepends_once() {
        let mut store = NotificationStore::new();
        store.apply_page(1, false, page(vec![notif("n1", NotificationKind::Comment, true)], 1, 0));
        let fresh = notif("n2", NotificationKind::LikePost, false);
        assert!(store.on_new_notification(fresh.clone()));
        assert!(!store.on_new_notification(fresh));
        assert_eq!(store.items()[0].id, "n2");
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_append_pages() {
        let mut store = NotificationStore::new();
        store.apply_page(1, false, page(vec![notif("n1", NotificationKind::Comment, true)], 2, 0));
        assert!(store.has_more());
        store.apply_page(
            2,
            true,
            page(
                vec![
                    notif("n1", NotificationKind::Comment, true),
                    notif("n2", NotificationKind::Comment, true),
                ],
                2,
                0,
            ),
        );
        assert_eq!(store.items().len(), 2);
        assert!(!store.has_more());
    }

    async fn center_with(items: Vec<Notification>, unread: u32) -> (NotificationCenter, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        backend
            .notification_pages
            .lock()
            .unwrap()
            .insert(1, page(items, 2, unread));
        let center = NotificationCenter::new(backend.clone(), 20);
        center.fetch_notifications(1, false).await.unwrap();
        (center, backend)
    }

    #[tokio::test]
    async fn test_mark_as_read_scenario() {
        let (center, backend) = center_with(
            vec![
                notif("n1", NotificationKind::Comment, false),
                notif("n2", NotificationKind::Comment, false),
                notif("n3", NotificationKind::Comment, false),
            ],
            3,
        )
        .await;
        backend.fail("mark_read");

        let handle = center.mark_as_read("n1").await.unwrap();
        {
            let view = center.view().await;
            assert_eq!(view.unread_count(), 2);
            assert!(view.get("n1").unwrap().is_read);
        }
        handle.await.unwrap();

        // no rollback after the server failed
        assert_eq!(center.view().await.unread_count(), 2);
        assert!(center.mark_as_read("n1").await.is_none());
        assert_eq!(backend.count("notifications:1:20"), 1);
    }

    #[tokio::test]
    async fn test_follow_request_removed_only_on_success() {
        let (center, backend) = center_with(
            vec![
                notif("n1", NotificationKind::FollowRequest, false),
                notif("n2", NotificationKind::FollowRequest, true),
            ],
            1,
        )
        .await;

        backend.fail("follow_request");
        assert!(center
            .handle_follow_request("n1", FollowRequestAction::Accept)
            .await
            .is_err());
        assert_eq!(center.view().await.items().len(), 2);
        assert_eq!(
            center.view().await.banner(),
            Some("Failed to accept follow request")
        );

        backend.failing.lock().unwrap().clear();
        center
            .handle_follow_request("n2", FollowRequestAction::Decline)
            .await
            .unwrap();
        assert_eq!(center.view().await.unread_count(), 1);

        center
            .handle_follow_request("n1", FollowRequestAction::Accept)
            .await
            .unwrap();
        let view = center.view().await;
        assert!(view.items().is_empty());
        assert_eq!(view.unread_count(), 0);
        assert!(backend
            .calls()
            .contains(&"follow_request:sender-n1:accept".to_string()));
    }

    #[tokio::test]
    async fn test_follow_request_rejects_other_kinds() {
        let (center, backend) =
            center_with(vec![notif("n1", NotificationKind::Comment, false)], 1).await;
        assert!(matches!(
            center
                .handle_follow_request("n1", FollowRequestAction::Accept)
                .await,
            Err(SyncError::Validation(_))
        ));
        assert_eq!(backend.count("follow_request"), 0);
    }

    #[tokio::test]
    async fn test_load_more_stops_at_last_page() {
        let (center, backend) =
            center_with(vec![notif("n1", NotificationKind::Comment, true)], 0).await;
        backend.notification_pages.lock().unwrap().insert(
            2,
            page(vec![notif("n2", NotificationKind::Comment, true)], 2, 0),
        );

        assert!(center.load_more().await.unwrap());
        assert_eq!(center.view().await.items().len(), 2);
        assert!(!center.load_more().await.unwrap());
        assert_eq!(backend.count("notifications"), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_state() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail("notifications");
        let center = NotificationCenter::new(backend, 20);
        assert!(center.refetch().await.is_err());
        assert!(center.view().await.state().error().is_some());
    }

    #[tokio::test]
    async fn test_push_events() {
        let (center, _) = center_with(vec![notif("n1", NotificationKind::Comment, false)], 1).await;
        center
            .handle_event(&PushEvent::NewNotification(notif(
                "n9",
                NotificationKind::Follow,
                false,
            )))
            .await;
        center
            .handle_event(&PushEvent::NotificationRead {
                notification_id: "n1".into(),
            })
            .await;
        let view = center.view().await;
        assert_eq!(view.items()[0].id, "n9");
        assert_eq!(view.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_bulk_delete() {
        let (center, backend) = center_with(
            vec![
                notif("n1", NotificationKind::Comment, false),
                notif("n2", NotificationKind::Comment, true),
                notif("n3", NotificationKind::Comment, true),
            ],
            1,
        )
        .await;
        center
            .delete_notifications(&["n1".to_string(), "n3".to_string()])
            .await
            .unwrap();
        let view = center.view().await;
        assert_eq!(view.items().len(), 1);
        assert_eq!(view.unread_count(), 0);
        assert_eq!(backend.count("delete_notifications:n1,n3"), 1);
    }
}
