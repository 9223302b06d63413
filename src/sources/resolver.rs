use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{MetadataService, MetadataTrack, Playlist, SearchService, Song};
use crate::{
    audio::queue::MusicQueue,
    error::{BotError, Result},
};

/// How a user query is going to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Direct link to the search-and-extract platform.
    PlatformLink,
    /// Link to the streaming-metadata service.
    MetadataLink,
    /// Anything else, treated as free text.
    Search,
}

/// Outcome of the background half of a resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundReport {
    pub resolved: usize,
    pub failed: usize,
}

/// Turns user queries into playable songs.
#[derive(Clone)]
pub struct SongResolver {
    search: Arc<dyn SearchService>,
    metadata: Option<Arc<dyn MetadataService>>,
    max_playlist_size: usize,
}

impl SongResolver {
    pub fn new(
        search: Arc<dyn SearchService>,
        metadata: Option<Arc<dyn MetadataService>>,
        max_playlist_size: usize,
    ) -> Self {
        Self {
            search,
            metadata,
            max_playlist_size: max_playlist_size.max(1),
        }
    }

    pub fn classify(&self, query: &str) -> QueryKind {
        if self.search.is_platform_link(query) {
            QueryKind::PlatformLink
        } else if self.metadata.as_ref().is_some_and(|m| m.is_metadata_link(query)) {
            QueryKind::MetadataLink
        } else {
            QueryKind::Search
        }
    }

    /// Resolves a query into songs ready to queue.
    ///
    /// For metadata-service lists only the first entry is resolved here; the
    /// rest travel in the returned [`Resolution`] and are resolved once it is
    /// enqueued.
    pub async fn fetch_song(&self, query: &str) -> Result<Resolution> {
        let query = query.trim();
        debug!("resolver.fetch_song query={}", query);
        if query.is_empty() {
            return Err(BotError::NoResults(String::new()));
        }

        match self.classify(query) {
            QueryKind::PlatformLink => self.fetch_platform_link(query).await,
            QueryKind::MetadataLink => self.fetch_metadata_link(query).await,
            QueryKind::Search => {
                let song = search_first(self.search.as_ref(), query).await?;
                info!("🔍 Found {} for {}", song.title(), query);
                Ok(self.resolution(Playlist::single(song), Vec::new()))
            }
        }
    }

    async fn fetch_platform_link(&self, url: &str) -> Result<Resolution> {
        let info = self
            .search
            .get_video_info(url)
            .await
            .map_err(|e| BotError::ResolutionFailed(format!("{:#}", e)))?;

        if info.songs.is_empty() {
            return Err(BotError::NoResults(url.to_string()));
        }
        if info.songs.len() > self.max_playlist_size {
            info!(
                "✂️ Playlist has {} items, keeping the first {}",
                info.songs.len(),
                self.max_playlist_size
            );
        }

        let songs: Vec<Song> = info
            .songs
            .into_iter()
            .take(self.max_playlist_size)
            .filter(|song| song.is_playable())
            .collect();
        if songs.is_empty() {
            return Err(BotError::ResolutionFailed(format!("no playable stream for {}", url)));
        }

        let meta = info.playlist.unwrap_or_default();
        Ok(self.resolution(
            Playlist {
                title: meta.title,
                uploader: meta.uploader,
                songs,
            },
            Vec::new(),
        ))
    }

    async fn fetch_metadata_link(&self, url: &str) -> Result<Resolution> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| BotError::ResolutionFailed("metadata service not configured".to_string()))?;

        let list = metadata
            .search(url)
            .await
            .map_err(|e| BotError::ResolutionFailed(format!("{:#}", e)))?;

        let mut tracks = list.tracks.into_iter().take(self.max_playlist_size);
        let first = tracks.next().ok_or_else(|| BotError::NoResults(url.to_string()))?;

        let song = search_first(self.search.as_ref(), &first.search_query())
            .await?
            .with_artist(first.artist);
        info!("🎼 Resolved first entry of {}: {}", url, song.title());

        Ok(self.resolution(
            Playlist {
                title: list.title,
                uploader: list.uploader,
                songs: vec![song],
            },
            tracks.collect(),
        ))
    }

    fn resolution(&self, playlist: Playlist, pending: Vec<MetadataTrack>) -> Resolution {
        Resolution {
            playlist,
            pending,
            search: Arc::clone(&self.search),
        }
    }
}

/// Songs resolved up front plus entries still to be searched.
pub struct Resolution {
    pub playlist: Playlist,
    pending: Vec<MetadataTrack>,
    search: Arc<dyn SearchService>,
}

impl Resolution {
    /// Entries that will be resolved in the background.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Appends the resolved songs, then resolves the remaining entries on a
    /// background task that appends each one as it completes.
    ///
    /// Returns how many songs were queued right away and the background
    /// task's handle, if there is one.
    pub fn enqueue(self, queue: Arc<MusicQueue>) -> (usize, Option<JoinHandle<BackgroundReport>>) {
        let added = queue.add(self.playlist.songs);
        if self.pending.is_empty() {
            return (added, None);
        }

        let search = self.search;
        let tracks = self.pending;
        info!("⏳ Resolving {} more songs in the background", tracks.len());

        let handle = tokio::spawn(async move {
            let mut report = BackgroundReport::default();
            for track in tracks {
                let query = track.search_query();
                match search_first(search.as_ref(), &query).await {
                    Ok(song) => {
                        report.resolved += queue.add(vec![song.with_artist(track.artist)]);
                    }
                    Err(e) => {
                        warn!("⚠️ Skipping {}: {}", query, e);
                        report.failed += 1;
                    }
                }
            }
            info!(
                "✅ Background resolution done: {} queued, {} failed",
                report.resolved, report.failed
            );
            report
        });

        (added, Some(handle))
    }
}

/// Searches `query` and fetches the first hit.
async fn search_first(search: &dyn SearchService, query: &str) -> Result<Song> {
    let hits = search
        .search_video(query)
        .await
        .map_err(|e| BotError::Other(e.context(format!("search for {:?} failed", query))))?;
    let hit = hits
        .into_iter()
        .next()
        .ok_or_else(|| BotError::NoResults(query.to_string()))?;

    let info = search
        .get_video_info(&hit.url)
        .await
        .map_err(|e| BotError::ResolutionFailed(format!("{}: {:#}", hit.title, e)))?;

    info.songs
        .into_iter()
        .find(|song| song.is_playable())
        .ok_or_else(|| BotError::ResolutionFailed(format!("no playable stream for {}", hit.title)))
}
