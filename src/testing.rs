//! In-memory collaborators for unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Semaphore;

use crate::{
    audio::{
        notify::{Notification, Notifier},
        transport::{Encoder, StreamDone, StreamEnd, StreamError, StreamSession, VoiceConnection, VoiceTransport},
    },
    sources::{MetadataPlaylist, MetadataService, SearchHit, SearchService, Song, VideoInfo},
};

pub fn song(id: &str) -> Song {
    Song::new(id, format!("Song {}", id), format!("https://cdn.example/{}", id)).with_duration(60.0)
}

pub fn platform_link(id: &str) -> String {
    format!("https://platform.example/watch?id={}", id)
}

/// Polls `cond` until it holds, failing the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// Voice

pub struct FakeConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    disconnects: AtomicUsize,
}

impl FakeConnection {
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    failing: AtomicBool,
}

impl FakeTransport {
    pub fn fail_joins(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn join_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn joined_channels(&self) -> Vec<ChannelId> {
        self.connections.lock().iter().map(|c| c.channel_id).collect()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        Arc::clone(&self.connections.lock()[index])
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Arc<dyn VoiceConnection>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("gateway refused voice state update");
        }
        let connection = Arc::new(FakeConnection {
            guild_id,
            channel_id,
            disconnects: AtomicUsize::new(0),
        });
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// A stream the test drives by hand.
pub struct FakeStream {
    url: String,
    done: StreamDone,
    stopped: AtomicBool,
    cleaned: AtomicBool,
}

impl FakeStream {
    pub fn finish(&self) {
        let _ = self.done.send(StreamEnd::Finished);
    }

    pub fn close_connection(&self) {
        let _ = self.done.send(StreamEnd::Failed(StreamError::ConnectionClosed));
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamSession for FakeStream {
    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        // A halted track still reports its end, like the real driver does.
        let _ = self.done.send(StreamEnd::Finished);
        Ok(())
    }

    fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeEncoder {
    streams: Mutex<Vec<Arc<FakeStream>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeEncoder {
    pub fn fail_url(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    /// Source URLs in the order streaming started.
    pub fn started(&self) -> Vec<String> {
        self.streams.lock().iter().map(|s| s.url.clone()).collect()
    }

    pub fn stream(&self, index: usize) -> Arc<FakeStream> {
        Arc::clone(&self.streams.lock()[index])
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode_stream(
        &self,
        _connection: Arc<dyn VoiceConnection>,
        source_url: &str,
        done: StreamDone,
    ) -> Result<Arc<dyn StreamSession>> {
        if self.failing.lock().contains(source_url) {
            bail!("ffmpeg exited with status 1");
        }
        let stream = Arc::new(FakeStream {
            url: source_url.to_string(),
            done,
            stopped: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
        });
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(ChannelId, Notification)>>,
    listening: Mutex<Option<String>>,
    failure_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeNotifier {
    /// Makes failure notifications block after being recorded, until the
    /// returned gate gets a permit.
    pub fn hold_failures(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.failure_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn sent(&self) -> Vec<(ChannelId, Notification)> {
        self.sent.lock().clone()
    }

    pub fn now_playing_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, n)| match n {
                Notification::NowPlaying(song) => Some(song.id().to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, n)| match n {
                Notification::Failure(reason) => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn listening(&self) -> Option<String> {
        self.listening.lock().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, channel_id: ChannelId, notification: Notification) {
        let is_failure = matches!(notification, Notification::Failure(_));
        self.sent.lock().push((channel_id, notification));

        let gate = self.failure_gate.lock().clone();
        if let (true, Some(gate)) = (is_failure, gate) {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    async fn set_listening(&self, title: Option<String>) {
        *self.listening.lock() = title;
    }
}

// Sources

/// Search service serving canned hits and video infos.
#[derive(Default)]
pub struct FakeSearch {
    hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    videos: Mutex<HashMap<String, VideoInfo>>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    /// Makes `query` find a playable song with the given id.
    pub fn with_track(self, query: &str, id: &str) -> Self {
        self.hits.lock().insert(
            query.to_string(),
            vec![SearchHit {
                id: id.to_string(),
                title: format!("Song {}", id),
                url: platform_link(id),
            }],
        );
        self.with_video(&platform_link(id), VideoInfo {
            songs: vec![song(id)],
            playlist: None,
        })
    }

    pub fn with_video(self, url: &str, info: VideoInfo) -> Self {
        self.videos.lock().insert(url.to_string(), info);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchService for FakeSearch {
    fn is_platform_link(&self, query: &str) -> bool {
        query.starts_with("https://platform.example/")
    }

    async fn search_video(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.queries.lock().push(query.to_string());
        Ok(self.hits.lock().get(query).cloned().unwrap_or_default())
    }

    async fn get_video_info(&self, url: &str) -> Result<VideoInfo> {
        match self.videos.lock().get(url) {
            Some(info) => Ok(info.clone()),
            None => bail!("video unavailable"),
        }
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    playlists: Mutex<HashMap<String, MetadataPlaylist>>,
}

impl FakeMetadata {
    pub fn with_playlist(self, url: &str, playlist: MetadataPlaylist) -> Self {
        self.playlists.lock().insert(url.to_string(), playlist);
        self
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    fn is_metadata_link(&self, query: &str) -> bool {
        query.starts_with("https://meta.example/")
    }

    async fn search(&self, url: &str) -> Result<MetadataPlaylist> {
        match self.playlists.lock().get(url) {
            Some(playlist) => Ok(playlist.clone()),
            None => bail!("metadata lookup failed"),
        }
    }
}
