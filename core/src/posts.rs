/// Optimistic like/save on a post
///
/// The local state flips before the request leaves. A success reconciles to the server's
/// value, a failure restores the value from before the action. A new like cancels the
/// previous in-flight one, and only the newest like's outcome is ever applied.
use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::models::Post;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostState {
    pub is_liked: bool,
    pub likes_count: u32,
    pub is_saved: bool,
}

impl From<&Post> for PostState {
    fn from(post: &Post) -> Self {
        Self {
            is_liked: post.is_liked,
            likes_count: post.likes_count,
            is_saved: post.is_saved,
        }
    }
}

#[derive(Default)]
struct LikeSlot {
    seq: u64,
    abort: Option<oneshot::Sender<()>>,
}

pub struct PostActions {
    backend: Arc<dyn Backend>,
    post_id: String,
    state: Mutex<PostState>,
    like: Mutex<LikeSlot>,
}

fn flipped_count(count: u32, now_liked: bool) -> u32 {
    if now_liked {
        count + 1
    } else {
        count.saturating_sub(1)
    }
}

impl PostActions {
    pub fn new(backend: Arc<dyn Backend>, post: &Post) -> Self {
        Self {
            backend,
            post_id: post.id.clone(),
            state: Mutex::new(PostState::from(post)),
            like: Mutex::new(LikeSlot::default()),
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn state(&self) -> PostState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut PostState)) -> PostState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
        *state
    }

    /// Returns `Err(SyncError::Aborted)` when a newer like superseded this one
    pub async fn toggle_like(&self) -> Result<PostState> {
        let (abort_tx, abort_rx) = oneshot::channel();
        let seq = {
            let mut slot = self.like.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = slot.abort.replace(abort_tx) {
                let _ = previous.send(());
            }
            slot.seq += 1;
            slot.seq
        };

        let before = self.state();
        let guess = self.update(|s| {
            s.is_liked = !before.is_liked;
            s.likes_count = flipped_count(before.likes_count, s.is_liked);
        });
        debug!("like {} -> {} (request {})", self.post_id, guess.is_liked, seq);

        let outcome = tokio::select! {
            biased;
            _ = abort_rx => Err(SyncError::Aborted),
            result = self.backend.like_post(&self.post_id) => result,
        };

        {
            let mut slot = self.like.lock().unwrap_or_else(|e| e.into_inner());
            if slot.seq != seq {
                return Err(SyncError::Aborted);
            }
            slot.abort = None;
        }

        match outcome {
            Ok(server) => Ok(self.update(|s| {
                if server.is_liked != guess.is_liked {
                    s.is_liked = server.is_liked;
                    s.likes_count = flipped_count(before.likes_count, server.is_liked);
                }
                if let Some(count) = server.likes_count {
                    s.likes_count = count;
                }
            })),
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                error!("Failed to like post {}: {}", self.post_id, e);
                self.update(|s| {
                    s.is_liked = before.is_liked;
                    s.likes_count = before.likes_count;
                });
                Err(e)
            }
        }
    }

    pub async fn toggle_save(&self) -> Result<PostState> {
        let before = self.state();
        self.update(|s| s.is_saved = !before.is_saved);

        match self.backend.save_post(&self.post_id).await {
            Ok(saved) => {
                let is_saved = saved.iter().any(|id| *id == self.post_id);
                Ok(self.update(|s| s.is_saved = is_saved))
            }
            Err(e) => {
                error!("Failed to save post {}: {}", self.post_id, e);
                self.update(|s| s.is_saved = before.is_saved);
                Err(e)
            }
        }
    }
}
