//! Narrow interfaces the playback engine drives: the voice transport, the
//! encoder/streamer, and the voice-channel lookup.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// How the streaming of one song ended.
///
/// Stop and skip travel on the same channel as completion and errors, and
/// are told apart by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// Source exhausted.
    Finished,
    /// Manual skip; the play loop moves on.
    Skipped,
    /// Manual stop; the play loop idles.
    Stopped,
    Failed(StreamError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("voice connection closed")]
    ConnectionClosed,
    #[error("encoder error: {0}")]
    Encode(String),
}

/// Sending half of the per-song notification channel.
pub type StreamDone = mpsc::UnboundedSender<StreamEnd>;

/// Joins voice channels.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn VoiceConnection>>;
}

/// A live voice connection.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild_id(&self) -> GuildId;

    fn channel_id(&self) -> ChannelId;

    async fn disconnect(&self) -> Result<()>;
}

/// Turns a media URL into audio on a voice connection.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Starts streaming `source_url`. The outcome of the stream is delivered
    /// on `done`; the call itself returns as soon as streaming started.
    async fn encode_stream(
        &self,
        connection: Arc<dyn VoiceConnection>,
        source_url: &str,
        done: StreamDone,
    ) -> Result<Arc<dyn StreamSession>>;
}

/// Handle on one running encode/stream.
#[async_trait]
pub trait StreamSession: Send + Sync {
    /// Halts the stream. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Releases encoder resources once the stream is over.
    fn cleanup(&self);
}

/// Finds the voice channel a user is currently connected to.
#[cfg_attr(test, mockall::automock)]
pub trait VoiceChannelLookup: Send + Sync {
    fn voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;
}
