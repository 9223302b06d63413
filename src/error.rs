//! Error taxonomy shared by the queue, the playback engine and the resolver.

use thiserror::Error;

/// Errors produced by the playback core.
///
/// `EmptyQueue` only drives play-loop termination and is never shown to
/// users. Everything else maps to a short chat message through
/// [`BotError::user_message`].
#[derive(Debug, Error)]
pub enum BotError {
    /// The requesting user is not connected to any voice channel.
    #[error("user is not in a voice channel")]
    NotInChannel,

    /// Stop or skip was requested with nothing playing.
    #[error("nothing is playing")]
    NotPlaying,

    /// Pop-front on a queue without pending songs.
    #[error("queue is empty")]
    EmptyQueue,

    /// A search or metadata lookup returned zero items.
    #[error("no results for {0:?}")]
    NoResults(String),

    /// A matched item could not be turned into a playable stream.
    #[error("could not resolve a playable stream: {0}")]
    ResolutionFailed(String),

    /// The voice connection dropped while streaming.
    #[error("voice connection closed")]
    TransportClosed,

    /// Joining the voice channel failed.
    #[error("could not join voice channel: {0:#}")]
    JoinFailed(anyhow::Error),

    /// The encoder could not start or died mid-stream.
    #[error("encoding failed: {0}")]
    EncodeFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BotError {
    /// Whether the error should be surfaced to the chat channel.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, BotError::EmptyQueue)
    }

    /// Short human readable reason for chat notifications.
    pub fn user_message(&self) -> String {
        match self {
            BotError::NotInChannel => "You need to be in a voice channel first".to_string(),
            BotError::NotPlaying => "Nothing is playing right now".to_string(),
            BotError::EmptyQueue => "The queue is empty".to_string(),
            BotError::NoResults(query) => format!("Could not find anything for `{}`", query),
            BotError::ResolutionFailed(_) => "Found a match but could not get a playable stream".to_string(),
            BotError::TransportClosed => "Lost the voice connection".to_string(),
            BotError::JoinFailed(_) => "Could not join your voice channel".to_string(),
            BotError::EncodeFailed(_) => "Could not play that song".to_string(),
            BotError::Other(_) => "Something went wrong".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
