/// Home feed, explore pagination, followed stories and search
use crate::backend::{Backend, ExplorePage, FeedPage, SearchResults};
use crate::error::Result;
use crate::models::{LoadState, Post, StoryGroup};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error};

#[derive(Debug)]
pub struct FeedStore {
    posts: Vec<Post>,
    feed_days_limit: Option<u32>,
    explore: Vec<Post>,
    explore_page: u32,
    explore_has_more: bool,
    state: LoadState,
}

impl Default for FeedStore {
    fn default() -> Self {
        Self {
            posts: Vec::new(),
            feed_days_limit: None,
            explore: Vec::new(),
            explore_page: 0,
            explore_has_more: true,
            state: LoadState::Idle,
        }
    }
}

impl FeedStore {
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// How far back the server looked when building the feed
    pub fn feed_days_limit(&self) -> Option<u32> {
        self.feed_days_limit
    }

    pub fn explore(&self) -> &[Post] {
        &self.explore
    }

    pub fn explore_page(&self) -> u32 {
        self.explore_page
    }

    pub fn has_more(&self) -> bool {
        self.explore_has_more
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn replace_feed(&mut self, page: FeedPage) {
        self.posts = page.posts;
        self.feed_days_limit = page.feed_days_limit;
    }

    /// Append one explore page. An empty page ends pagination even without a
    /// `hasMore` flag.
    pub fn apply_explore(&mut self, page: u32, result: ExplorePage) {
        let ended = result.posts.is_empty();
        if page <= 1 {
            self.explore.clear();
        }
        let known: HashSet<String> = self.explore.iter().map(|p| p.id.clone()).collect();
        self.explore
            .extend(result.posts.into_iter().filter(|p| !known.contains(&p.id)));
        self.explore_page = page;
        self.explore_has_more = !ended && result.has_more.unwrap_or(true);
    }

    pub fn reset_explore(&mut self) {
        self.explore.clear();
        self.explore_page = 0;
        self.explore_has_more = true;
    }
}

#[derive(Debug, Default)]
pub struct StoriesStore {
    groups: BTreeMap<String, StoryGroup>,
    state: LoadState,
}

impl StoriesStore {
    /// Keyed by author id
    pub fn groups(&self) -> &BTreeMap<String, StoryGroup> {
        &self.groups
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn story_count(&self) -> usize {
        self.groups.values().map(|g| g.stories.len()).sum()
    }
}

#[derive(Clone)]
pub struct FeedService {
    backend: Arc<dyn Backend>,
    feed: Arc<RwLock<FeedStore>>,
    stories: Arc<RwLock<StoriesStore>>,
    search: Arc<RwLock<SearchResults>>,
}

impl FeedService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            feed: Arc::new(RwLock::new(FeedStore::default())),
            stories: Arc::new(RwLock::new(StoriesStore::default())),
            search: Arc::new(RwLock::new(SearchResults::default())),
        }
    }

    pub async fn feed(&self) -> RwLockReadGuard<'_, FeedStore> {
        self.feed.read().await
    }

    pub async fn stories(&self) -> RwLockReadGuard<'_, StoriesStore> {
        self.stories.read().await
    }

    pub async fn search_results(&self) -> RwLockReadGuard<'_, SearchResults> {
        self.search.read().await
    }

    pub async fn load_feed(&self) -> Result<()> {
        self.feed.write().await.state = LoadState::Loading;
        let result = self.backend.feed().await;
        let mut feed = self.feed.write().await;
        match result {
            Ok(page) => {
                feed.replace_feed(page);
                feed.state = LoadState::Ready;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load feed: {}", e);
                feed.state = LoadState::Failed(e.user_message());
                Err(e)
            }
        }
    }

    /// Fetch the next explore page. Returns false when there was nothing left to load.
    pub async fn load_more_explore(&self) -> Result<bool> {
        let next = {
            let feed = self.feed.read().await;
            if !feed.explore_has_more {
                return Ok(false);
            }
            feed.explore_page + 1
        };
        let page = self.backend.explore(next).await.map_err(|e| {
            error!("Failed to load explore page {}: {}", next, e);
            e
        })?;
        debug!("explore page {} returned {} posts", next, page.posts.len());
        self.feed.write().await.apply_explore(next, page);
        Ok(true)
    }

    pub async fn refresh_explore(&self) -> Result<bool> {
        self.feed.write().await.reset_explore();
        self.load_more_explore().await
    }

    pub async fn load_stories(&self) -> Result<()> {
        self.stories.write().await.state = LoadState::Loading;
        let result = self.backend.followed_stories().await;
        let mut stories = self.stories.write().await;
        match result {
            Ok(groups) => {
                stories.groups = groups;
                stories.state = LoadState::Ready;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load stories: {}", e);
                stories.state = LoadState::Failed(e.user_message());
                Err(e)
            }
        }
    }

    /// The server owns grouping, so a delete is followed by a full refetch
    pub async fn delete_story(&self, story_id: &str) -> Result<()> {
        self.backend.delete_story(story_id).await.map_err(|e| {
            error!("Failed to delete story {}: {}", story_id, e);
            e
        })?;
        self.load_stories().await
    }

    /// A blank query clears results without a request
    pub async fn search(&self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            *self.search.write().await = SearchResults::default();
            return Ok(());
        }
        let results = self.backend.search(query).await?;
        *self.search.write().await = results;
        Ok(())
    }
}
