use async_trait::async_trait;
use serenity::model::id::ChannelId;

use crate::{audio::queue::QueueListing, sources::Song};

/// What the engine wants shown in a text channel. Rendering is up to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NowPlaying(Song),
    NothingPlaying,
    Queue(QueueListing),
    QueueCleared,
    QueueShuffled,
    /// Songs appended to the queue from one request.
    Enqueued { count: usize, first_title: String },
    Disconnected,
    Failure(String),
}

/// Presentation sink for chat responses and the bot's presence.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel_id: ChannelId, notification: Notification);

    /// Shows (or clears, with `None`) the "listening to" status.
    async fn set_listening(&self, title: Option<String>);
}
