use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        notify::{Notification, Notifier},
        queue::{MusicQueue, QueueListing},
        timer::IdleTimer,
        transport::{
            Encoder, StreamDone, StreamEnd, StreamError, StreamSession, VoiceChannelLookup,
            VoiceConnection, VoiceTransport,
        },
    },
    error::{BotError, Result},
    sources::Song,
};

/// Songs shown by `show_queue`.
pub const QUEUE_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing streaming. The session may still hold a connection.
    Idle,
    Connecting,
    Playing,
    /// Stop requested or queue finished, waiting for stream teardown.
    Stopping,
}

/// Who asked for playback and where to answer.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: UserId,
    pub text_channel: ChannelId,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    /// Upper bound on how long `stop` waits for the play loop to settle.
    pub stop_timeout: Duration,
    pub max_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            stop_timeout: Duration::from_secs(10),
            max_queue_size: 1000,
        }
    }
}

/// Collaborators shared by every guild session.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn VoiceTransport>,
    pub encoder: Arc<dyn Encoder>,
    pub lookup: Arc<dyn VoiceChannelLookup>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Skip,
    Stop,
}

/// The song currently handed to the encoder.
struct ActiveStream {
    done: StreamDone,
    session: Option<Arc<dyn StreamSession>>,
    signal: Option<Signal>,
}

#[derive(Default)]
struct SessionInner {
    connection: Option<Arc<dyn VoiceConnection>>,
    voice_channel: Option<ChannelId>,
    text_channel: Option<ChannelId>,
    active: Option<ActiveStream>,
}

struct NextSong {
    song: Song,
    done_rx: mpsc::UnboundedReceiver<StreamEnd>,
}

/// Playback engine for one guild.
///
/// Owns the voice connection, the running stream and the idle timer. At
/// most one play loop runs per session; `start` is a no-op while one is
/// active. Every state change happens with `inner` locked so the watch
/// channel and the fields never disagree.
pub struct VoiceSession {
    guild_id: GuildId,
    queue: Arc<MusicQueue>,
    deps: SessionDeps,
    inner: Mutex<SessionInner>,
    state: watch::Sender<EngineState>,
    timer: IdleTimer,
}

impl VoiceSession {
    pub fn new(guild_id: GuildId, deps: SessionDeps) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            guild_id,
            queue: Arc::new(MusicQueue::new(deps.settings.max_queue_size)),
            deps,
            inner: Mutex::new(SessionInner::default()),
            state,
            timer: IdleTimer::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn queue(&self) -> &Arc<MusicQueue> {
        &self.queue
    }

    pub fn is_idle_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.inner.lock().voice_channel
    }

    /// Routes notifications to the channel the latest command came from.
    pub fn bind_text_channel(&self, channel_id: ChannelId) {
        self.inner.lock().text_channel = Some(channel_id);
    }

    /// Appends songs to this guild's queue.
    pub fn enqueue(&self, songs: Vec<Song>) -> usize {
        self.queue.add(songs)
    }

    /// Connects to the requester's voice channel and starts the play loop.
    ///
    /// No-op while a song is playing; the caller has queued its songs already
    /// and the running loop will reach them. While the session is connecting
    /// or winding down, waits for it to settle first.
    pub async fn start(self: &Arc<Self>, requester: Requester) -> Result<()> {
        debug!("voice.start guild={}", self.guild_id);
        self.bind_text_channel(requester.text_channel);

        if matches!(self.state(), EngineState::Connecting | EngineState::Stopping) {
            debug!("Waiting for guild {} to settle before starting", self.guild_id);
            self.wait_for_settled().await;
        }

        if self.state() != EngineState::Idle {
            debug!("▶️ Already playing in guild {}, song queued", self.guild_id);
            return Ok(());
        }

        let channel_id = self
            .deps
            .lookup
            .voice_channel(self.guild_id, requester.user_id)
            .ok_or(BotError::NotInChannel)?;

        let reusable = {
            let inner = self.inner.lock();
            if self.state() != EngineState::Idle {
                return Ok(());
            }
            self.state.send_replace(EngineState::Connecting);
            inner
                .connection
                .clone()
                .filter(|connection| connection.channel_id() == channel_id)
        };

        let connection = match reusable {
            Some(connection) => connection,
            None => match self.deps.transport.join(self.guild_id, channel_id).await {
                Ok(connection) => {
                    info!("🔊 Connected to voice channel {} in guild {}", channel_id, self.guild_id);
                    connection
                }
                Err(e) => {
                    warn!("❌ Could not join voice channel {}: {:#}", channel_id, e);
                    let _inner = self.inner.lock();
                    self.state.send_replace(EngineState::Idle);
                    return Err(BotError::JoinFailed(e));
                }
            },
        };

        let (next, stale, aborted) = {
            let mut inner = self.inner.lock();
            if self.state() != EngineState::Connecting {
                // Disconnected while joining.
                (None, None, true)
            } else {
                let stale = inner
                    .connection
                    .replace(Arc::clone(&connection))
                    .filter(|old| !Arc::ptr_eq(old, &connection));
                inner.voice_channel = Some(channel_id);
                (self.load_next(&mut inner), stale, false)
            }
        };

        if aborted {
            debug!("Session torn down while connecting in guild {}", self.guild_id);
            if let Err(e) = connection.disconnect().await {
                warn!("Could not drop connection: {:#}", e);
            }
            return Ok(());
        }

        if let Some(old) = stale {
            if let Err(e) = old.disconnect().await {
                warn!("Could not leave previous voice channel: {:#}", e);
            }
        }

        match next {
            Some(next) => {
                tokio::spawn(Arc::clone(self).play_loop(next));
            }
            None => {
                debug!("📭 Nothing queued in guild {}", self.guild_id);
                self.enter_idle();
            }
        }

        Ok(())
    }

    /// Halts the current song and idles. Returns once the stream is torn down.
    pub async fn stop(&self) -> Result<()> {
        debug!("voice.stop guild={}", self.guild_id);
        let (session, done) = self.signal(Signal::Stop)?;

        let _ = done.send(StreamEnd::Stopped);
        if let Some(session) = session {
            if let Err(e) = session.stop().await {
                warn!("Could not stop encoder: {:#}", e);
            }
        }

        self.wait_for_idle().await;
        info!("⏹️ Playback stopped in guild {}", self.guild_id);
        Ok(())
    }

    /// Halts the current song; the play loop continues with the next one.
    pub async fn skip(&self) -> Result<()> {
        debug!("voice.skip guild={}", self.guild_id);
        let (session, done) = self.signal(Signal::Skip)?;

        let _ = done.send(StreamEnd::Skipped);
        if let Some(session) = session {
            if let Err(e) = session.stop().await {
                warn!("Could not stop encoder: {:#}", e);
            }
        }

        info!("⏭️ Skipped song in guild {}", self.guild_id);
        Ok(())
    }

    /// Tears down playback and the voice connection. Valid in any state and
    /// idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        debug!("voice.disconnect guild={}", self.guild_id);

        if self.state() == EngineState::Playing {
            match self.stop().await {
                Ok(()) | Err(BotError::NotPlaying) => {}
                Err(e) => return Err(e),
            }
        }

        self.timer.cancel();
        let (active, connection) = {
            let mut inner = self.inner.lock();
            let active = inner.active.take();
            let connection = inner.connection.take();
            inner.voice_channel = None;
            self.queue.finish_current();
            self.state.send_replace(EngineState::Idle);
            (active, connection)
        };

        if let Some(session) = active.and_then(|active| active.session) {
            if let Err(e) = session.stop().await {
                warn!("Could not stop encoder: {:#}", e);
            }
            session.cleanup();
        }

        if let Some(connection) = connection {
            self.deps.notifier.set_listening(None).await;
            connection.disconnect().await?;
            info!("👋 Disconnected from voice in guild {}", self.guild_id);
        }

        Ok(())
    }

    /// Announces and returns the current song plus the first page of the queue.
    pub async fn show_queue(&self) -> QueueListing {
        let listing = self.queue.listing(QUEUE_PAGE_SIZE);
        self.announce(Notification::Queue(listing.clone())).await;
        listing
    }

    pub async fn clear_queue(&self) -> usize {
        let cleared = self.queue.clear();
        self.announce(Notification::QueueCleared).await;
        cleared
    }

    pub async fn shuffle_queue(&self) {
        self.queue.shuffle();
        self.announce(Notification::QueueShuffled).await;
    }

    pub async fn now_playing(&self) -> Option<Song> {
        let current = self.queue.current();
        let notification = match &current {
            Some(song) => Notification::NowPlaying(song.clone()),
            None => Notification::NothingPlaying,
        };
        self.announce(notification).await;
        current
    }

    /// Sends a notification to the bound text channel, if any.
    pub async fn announce(&self, notification: Notification) {
        let channel = self.inner.lock().text_channel;
        match channel {
            Some(channel_id) => self.deps.notifier.notify(channel_id, notification).await,
            None => debug!("No text channel bound in guild {}, dropping notification", self.guild_id),
        }
    }

    /// Tells the user about a failure when it is meant for them.
    pub async fn report(&self, err: &BotError) {
        if err.is_user_visible() {
            self.announce(Notification::Failure(err.user_message())).await;
        }
    }

    // Play loop

    async fn play_loop(self: Arc<Self>, mut next: NextSong) {
        debug!("voice.play_loop guild={}", self.guild_id);

        let halted = loop {
            let NextSong { song, done_rx } = next;
            let outcome = self.stream_song(&song, done_rx).await;
            let (end, session, following) = self.settle(outcome);

            if let Some(session) = session {
                session.cleanup();
            }
            debug!("Song {} ended with {:?}", song.title(), end);

            match end {
                StreamEnd::Finished | StreamEnd::Skipped => match following {
                    Some(following) => next = following,
                    None => {
                        info!("📭 Queue finished in guild {}", self.guild_id);
                        break None;
                    }
                },
                StreamEnd::Stopped => break None,
                StreamEnd::Failed(StreamError::ConnectionClosed) => match self.reconnect().await {
                    Ok(Some(following)) => next = following,
                    Ok(None) => break None,
                    Err(err) => break Some(err),
                },
                StreamEnd::Failed(StreamError::Encode(reason)) => {
                    let err = BotError::EncodeFailed(reason);
                    error!("❌ Playback halted in guild {}: {}", self.guild_id, err);
                    break Some(err);
                }
            }
        };

        self.deps.notifier.set_listening(None).await;
        self.enter_idle();

        // Reported once idle so a new play request is not turned away.
        if let Some(err) = halted {
            self.report(&err).await;
        }
    }

    /// Streams one song and waits for the first message on its channel.
    async fn stream_song(&self, song: &Song, mut done_rx: mpsc::UnboundedReceiver<StreamEnd>) -> StreamEnd {
        self.timer.cancel();
        info!("🎵 Playing {} in guild {}", song.title(), self.guild_id);
        self.announce(Notification::NowPlaying(song.clone())).await;
        self.deps.notifier.set_listening(Some(song.title().to_string())).await;

        let (connection, done) = {
            let inner = self.inner.lock();
            (
                inner.connection.clone(),
                inner.active.as_ref().map(|active| active.done.clone()),
            )
        };
        let (Some(connection), Some(done)) = (connection, done) else {
            return StreamEnd::Failed(StreamError::Encode("no voice connection".to_string()));
        };

        match self.deps.encoder.encode_stream(connection, song.stream_url(), done).await {
            Ok(session) => {
                let signalled = {
                    let mut inner = self.inner.lock();
                    match inner.active.as_mut() {
                        Some(active) => {
                            active.session = Some(Arc::clone(&session));
                            active.signal.is_some()
                        }
                        None => true,
                    }
                };
                // Stop or skip arrived while the encoder was starting.
                if signalled {
                    if let Err(e) = session.stop().await {
                        warn!("Could not stop encoder: {:#}", e);
                    }
                }
            }
            Err(e) => {
                warn!("❌ Could not encode {}: {:#}", song.title(), e);
                return StreamEnd::Failed(StreamError::Encode(format!("{:#}", e)));
            }
        }

        done_rx
            .recv()
            .await
            .unwrap_or_else(|| StreamEnd::Failed(StreamError::Encode("stream channel closed".to_string())))
    }

    /// Classifies the outcome and, when the loop continues, loads the next
    /// song in the same critical section.
    fn settle(&self, outcome: StreamEnd) -> (StreamEnd, Option<Arc<dyn StreamSession>>, Option<NextSong>) {
        let mut inner = self.inner.lock();
        let active = inner.active.take();
        let session = active.as_ref().and_then(|active| active.session.clone());

        // An explicit signal wins over whatever reached the channel first.
        let end = match active.and_then(|active| active.signal) {
            Some(Signal::Stop) => StreamEnd::Stopped,
            Some(Signal::Skip) => StreamEnd::Skipped,
            None => outcome,
        };

        self.queue.finish_current();
        let following = match end {
            StreamEnd::Finished | StreamEnd::Skipped => self.load_next(&mut inner),
            _ => None,
        };
        if following.is_none() {
            self.state.send_replace(EngineState::Stopping);
        }

        (end, session, following)
    }

    /// One reconnect attempt to the last known channel after the transport
    /// dropped. `Ok(None)` means there is nothing to return to.
    async fn reconnect(&self) -> Result<Option<NextSong>> {
        let channel = {
            let mut inner = self.inner.lock();
            inner.connection = None;
            self.state.send_replace(EngineState::Connecting);
            inner.voice_channel
        };
        let Some(channel_id) = channel else {
            warn!("🔌 Connection closed in guild {} with no channel to return to", self.guild_id);
            return Ok(None);
        };

        warn!("🔌 Voice connection closed in guild {}, reconnecting to {}", self.guild_id, channel_id);
        let connection = match self.deps.transport.join(self.guild_id, channel_id).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("❌ Reconnect failed in guild {}: {:#}", self.guild_id, e);
                return Err(BotError::TransportClosed);
            }
        };

        let next = {
            let mut inner = self.inner.lock();
            if self.state() == EngineState::Connecting {
                inner.connection = Some(Arc::clone(&connection));
                Some(self.load_next(&mut inner))
            } else {
                None
            }
        };

        match next {
            Some(next) => {
                info!("🔄 Reconnected to voice in guild {}", self.guild_id);
                Ok(next)
            }
            None => {
                debug!("Session torn down during reconnect in guild {}", self.guild_id);
                if let Err(e) = connection.disconnect().await {
                    warn!("Could not drop connection: {:#}", e);
                }
                Ok(None)
            }
        }
    }

    /// Pops the next song and opens its notification channel. Caller holds `inner`.
    fn load_next(&self, inner: &mut SessionInner) -> Option<NextSong> {
        let song = self.queue.advance().ok()?;
        let (done, done_rx) = mpsc::unbounded_channel();
        inner.active = Some(ActiveStream {
            done,
            session: None,
            signal: None,
        });
        self.state.send_replace(EngineState::Playing);
        Some(NextSong { song, done_rx })
    }

    /// Marks the active song with a signal and hands back what is needed to
    /// deliver it.
    fn signal(&self, signal: Signal) -> Result<(Option<Arc<dyn StreamSession>>, StreamDone)> {
        let mut inner = self.inner.lock();
        if self.state() != EngineState::Playing {
            return Err(BotError::NotPlaying);
        }
        let active = inner.active.as_mut().ok_or(BotError::NotPlaying)?;
        active.signal = Some(signal);
        let handles = (active.session.clone(), active.done.clone());
        if signal == Signal::Stop {
            self.state.send_replace(EngineState::Stopping);
        }
        Ok(handles)
    }

    fn enter_idle(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.active = None;
        self.queue.finish_current();
        if inner.connection.is_some() {
            self.arm_idle_timer();
        }
        self.state.send_replace(EngineState::Idle);
    }

    fn arm_idle_timer(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        let guild_id = self.guild_id;
        self.timer.arm(self.deps.settings.idle_timeout, move || async move {
            let Some(session) = session.upgrade() else {
                return;
            };
            info!("💤 Idle timeout in guild {}, leaving voice channel", guild_id);
            if let Err(e) = session.disconnect().await {
                warn!("Could not disconnect from voice channel: {}", e);
            }
            session.announce(Notification::Disconnected).await;
        });
    }

    async fn wait_for_idle(&self) {
        if !self.wait_for_state(|s| s == EngineState::Idle).await {
            warn!("⏰ Timed out waiting for stream teardown in guild {}", self.guild_id);
        }
    }

    /// Waits until the session is neither connecting nor winding down.
    async fn wait_for_settled(&self) {
        let settled = self
            .wait_for_state(|s| matches!(s, EngineState::Idle | EngineState::Playing))
            .await;
        if !settled {
            warn!("⏰ Timed out waiting for guild {} to settle", self.guild_id);
        }
    }

    /// False when `stop_timeout` passes first.
    async fn wait_for_state(&self, done: impl Fn(EngineState) -> bool) -> bool {
        let mut state = self.state.subscribe();
        let reached = tokio::time::timeout(self.deps.settings.stop_timeout, async move {
            state.wait_for(|s| done(*s)).await.map(|_| ())
        })
        .await;

        matches!(reached, Ok(Ok(())))
    }
}
