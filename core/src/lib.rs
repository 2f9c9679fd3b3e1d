/// Chyloo sync core - client-side real-time state for the Chyloo social network
///
/// REST seeds every store, a push channel keeps it current. Conversations, open-chat
/// messages, typing presence, notifications and optimistic post actions all reconcile
/// their push events idempotently.

pub mod error;
pub mod config;
pub mod models;
pub mod backend;
pub mod http;
pub mod session;
pub mod connection;
pub mod sse;
pub mod debounce;
pub mod conversations;
pub mod messages;
pub mod typing;
pub mod messenger;
pub mod notifications;
pub mod posts;
pub mod health;
pub mod feed;
pub mod profile;
pub mod settings;
pub mod cli_app;

pub use error::{SyncError, Result};
pub use config::Config;
pub use connection::{ConnectionManager, PushEvent};
pub use messenger::Messenger;
pub use notifications::NotificationCenter;
