pub mod resolver;
pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;

pub use resolver::{BackgroundReport, QueryKind, Resolution, SongResolver};
pub use spotify::SpotifyClient;
pub use youtube::YouTubeClient;

/// A playable track.
///
/// Immutable once built. The stream URL comes from the search-and-extract
/// service and may expire on the platform side; it is never refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    id: String,
    title: String,
    artist: Option<String>,
    duration: f64,
    thumbnail: String,
    stream_url: String,
}

impl Song {
    pub fn new(id: impl Into<String>, title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            duration: 0.0,
            thumbnail: String::new(),
            stream_url: stream_url.into(),
        }
    }

    // Getters
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }
    pub fn thumbnail(&self) -> &str {
        &self.thumbnail
    }
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// A song without a stream URL cannot be handed to the encoder.
    pub fn is_playable(&self) -> bool {
        !self.stream_url.trim().is_empty()
    }

    // Builders
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds.max(0.0);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = thumbnail.into();
        self
    }
}

/// Transient result of a resolution, merged into a queue and discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    pub title: String,
    pub uploader: String,
    pub songs: Vec<Song>,
}

impl Playlist {
    pub fn single(song: Song) -> Self {
        Self {
            songs: vec![song],
            ..Default::default()
        }
    }
}

/// One hit from a free-text search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Playlist header returned together with playlist items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistMeta {
    pub title: String,
    pub uploader: String,
}

/// Result of fetching a platform link: one song, or every item of a playlist.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub songs: Vec<Song>,
    pub playlist: Option<PlaylistMeta>,
}

/// Search-and-extract service (video/audio platform).
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Whether the query is a direct link this service can fetch.
    fn is_platform_link(&self, query: &str) -> bool;

    /// Free-text search, best match first.
    async fn search_video(&self, query: &str) -> Result<Vec<SearchHit>>;

    /// Full item (or playlist) metadata including stream URLs.
    async fn get_video_info(&self, url: &str) -> Result<VideoInfo>;
}

/// Artist and title of one entry from the streaming-metadata service.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTrack {
    pub artist: String,
    pub name: String,
}

impl MetadataTrack {
    pub fn new(artist: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            name: name.into(),
        }
    }

    /// Query used to find this track on the search service.
    pub fn search_query(&self) -> String {
        format!("{} - {}", self.artist, self.name)
    }
}

/// Track, album or playlist as described by the metadata service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPlaylist {
    pub title: String,
    pub uploader: String,
    pub tracks: Vec<MetadataTrack>,
}

/// Streaming-metadata service (no audio, artist/title only).
#[async_trait]
pub trait MetadataService: Send + Sync {
    fn is_metadata_link(&self, query: &str) -> bool;

    async fn search(&self, url: &str) -> Result<MetadataPlaylist>;
}
