//! # Audio Module
//!
//! Per-guild playback core for SurBot.
//!
//! ## Architecture
//!
//! ### [`player`] - Voice Session
//! - One [`player::VoiceSession`] per guild: connection, play loop, idle timer
//! - Stop and skip are signals on the per-song completion channel
//! - One reconnect attempt when the voice connection drops mid-song
//!
//! ### [`queue`] - Queue Management
//! - FIFO of pending songs plus the song currently playing
//! - Capacity cap and uniform shuffle of the pending songs
//!
//! ### [`timer`] - Idle Timer
//! - Disconnects a session that sat idle for the configured timeout
//!
//! ### [`transport`] / [`notify`] - Collaborators
//! - Voice transport, encoder and channel lookup the engine drives
//! - Notification sink for chat messages and the bot's presence
//!
//! ### [`registry`] - Guild Registry
//! - Explicit map from guild to session, shared through the client's data

pub mod notify;
pub mod player;
pub mod queue;
pub mod registry;
pub mod timer;
pub mod transport;

pub use player::{EngineState, Requester, SessionDeps, SessionSettings, VoiceSession};
pub use queue::{MusicQueue, QueueListing};
pub use registry::GuildRegistry;
