//! Songbird-backed voice transport and encoder, plus the cache-backed
//! voice-channel lookup.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId, UserId},
};
use songbird::{
    error::JoinError,
    events::{
        context_data::{DisconnectKind, DisconnectReason},
        CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
    },
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Songbird,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::transport::{
    Encoder, StreamDone, StreamEnd, StreamError, StreamSession, VoiceChannelLookup, VoiceConnection, VoiceTransport,
};

/// Completion channel of the song currently streaming in each guild.
pub type ActiveStreams = Arc<DashMap<GuildId, StreamDone>>;

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    streams: ActiveStreams,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, streams: ActiveStreams) -> Self {
        Self { manager, streams }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn VoiceConnection>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .with_context(|| format!("Could not join voice channel {}", channel_id))?;

        {
            let mut call = call.lock().await;
            call.remove_all_global_events();
            call.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DriverDisconnectNotifier {
                    guild_id,
                    streams: Arc::clone(&self.streams),
                },
            );
        }

        info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdConnection {
            manager: Arc::clone(&self.manager),
            guild_id,
            channel_id,
        }))
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn disconnect(&self) -> Result<()> {
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(e).context("Could not leave voice channel"),
        }
    }
}

/// Reports a dropped voice connection to the song streaming in that guild.
struct DriverDisconnectNotifier {
    guild_id: GuildId,
    streams: ActiveStreams,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::DriverDisconnect(data) = ctx else {
            return None;
        };

        if !is_connection_lost(&data.kind, data.reason.as_ref()) {
            debug!(
                "Voice driver disconnect in guild {} ignored: {:?} / {:?}",
                self.guild_id, data.kind, data.reason
            );
            return None;
        }

        if let Some(done) = self.streams.get(&self.guild_id) {
            warn!("🔌 Voice driver lost its connection in guild {}: {:?}", self.guild_id, data.reason);
            let _ = done.send(StreamEnd::Failed(StreamError::ConnectionClosed));
        }
        None
    }
}

/// True when the driver dropped an established connection. Leaving, channel
/// moves and superseded connection attempts do not count.
fn is_connection_lost(kind: &DisconnectKind, reason: Option<&DisconnectReason>) -> bool {
    let established = matches!(kind, DisconnectKind::Runtime | DisconnectKind::Reconnect);
    let failed = match reason {
        None | Some(DisconnectReason::Requested) | Some(DisconnectReason::AttemptDiscarded) => false,
        Some(_) => true,
    };
    established && failed
}

/// Plays HTTP media URLs on the guild's songbird call.
pub struct SongbirdEncoder {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    streams: ActiveStreams,
}

impl SongbirdEncoder {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, streams: ActiveStreams) -> Self {
        Self { manager, http, streams }
    }
}

#[async_trait]
impl Encoder for SongbirdEncoder {
    async fn encode_stream(
        &self,
        connection: Arc<dyn VoiceConnection>,
        source_url: &str,
        done: StreamDone,
    ) -> Result<Arc<dyn StreamSession>> {
        let guild_id = connection.guild_id();
        let call = self
            .manager
            .get(guild_id)
            .with_context(|| format!("No voice call for guild {}", guild_id))?;

        let input = HttpRequest::new(self.http.clone(), source_url.to_string());
        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input.into())
        };

        handle
            .add_event(Event::Track(TrackEvent::End), TrackEndNotifier { done: done.clone() })
            .context("Could not watch track end")?;
        handle
            .add_event(Event::Track(TrackEvent::Error), TrackErrorNotifier { done: done.clone() })
            .context("Could not watch track errors")?;

        self.streams.insert(guild_id, done.clone());
        debug!("🎶 Streaming started in guild {}", guild_id);

        Ok(Arc::new(SongbirdStream {
            handle,
            guild_id,
            done,
            streams: Arc::clone(&self.streams),
        }))
    }
}

struct SongbirdStream {
    handle: TrackHandle,
    guild_id: GuildId,
    done: StreamDone,
    streams: ActiveStreams,
}

#[async_trait]
impl StreamSession for SongbirdStream {
    async fn stop(&self) -> Result<()> {
        // Errors only when the track already ended.
        if let Err(e) = self.handle.stop() {
            debug!("Track already stopped: {:?}", e);
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.streams.remove_if(&self.guild_id, |_, done| done.same_channel(&self.done));
    }
}

struct TrackEndNotifier {
    done: StreamDone,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.done.send(StreamEnd::Finished);
        None
    }
}

struct TrackErrorNotifier {
    done: StreamDone,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(tracks) => tracks.first().and_then(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };
        let reason = reason.unwrap_or_else(|| "track error".to_string());

        warn!("❌ Track error: {}", reason);
        let _ = self.done.send(StreamEnd::Failed(StreamError::Encode(reason)));
        None
    }
}

/// Reads users' voice channels from the gateway cache.
pub struct CacheLookup {
    cache: Arc<Cache>,
}

impl CacheLookup {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

impl VoiceChannelLookup for CacheLookup {
    fn voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = self.cache.guild(guild_id)?;
        guild.voice_states.get(&user_id).and_then(|state| state.channel_id)
    }
}
