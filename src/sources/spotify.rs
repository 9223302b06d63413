use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{MetadataPlaylist, MetadataService, MetadataTrack};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";

static SPOTIFY_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?open\.spotify\.com/(?:intl-[a-zA-Z-]+/)?(track|album|playlist)/([a-zA-Z0-9]+)")
        .expect("spotify url regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyKind {
    Track,
    Album,
    Playlist,
}

/// Splits a Spotify link into its kind and id.
pub fn parse_link(url: &str) -> Option<(SpotifyKind, String)> {
    let caps = SPOTIFY_URL.captures(url.trim())?;
    let kind = match &caps[1] {
        "track" => SpotifyKind::Track,
        "album" => SpotifyKind::Album,
        _ => SpotifyKind::Playlist,
    };
    Some((kind, caps[2].to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Tokens are refreshed slightly before Spotify expires them.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(30) > now
    }
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Track {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
}

impl Track {
    fn into_metadata(self) -> MetadataTrack {
        let artist = self.artists.into_iter().next().map(|a| a.name).unwrap_or_default();
        MetadataTrack::new(artist, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Album {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    tracks: Page<Track>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for local files and removed tracks.
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    name: String,
    owner: Owner,
    tracks: Page<PlaylistItem>,
}

impl From<Track> for MetadataPlaylist {
    fn from(track: Track) -> Self {
        MetadataPlaylist {
            tracks: vec![track.into_metadata()],
            ..Default::default()
        }
    }
}

impl From<Album> for MetadataPlaylist {
    fn from(album: Album) -> Self {
        MetadataPlaylist {
            title: album.name,
            uploader: album.artists.into_iter().next().map(|a| a.name).unwrap_or_default(),
            tracks: album.tracks.items.into_iter().map(Track::into_metadata).collect(),
        }
    }
}

impl From<Playlist> for MetadataPlaylist {
    fn from(playlist: Playlist) -> Self {
        MetadataPlaylist {
            title: playlist.name,
            uploader: playlist.owner.display_name.unwrap_or_default(),
            tracks: playlist
                .tracks
                .items
                .into_iter()
                .filter_map(|item| item.track)
                .map(Track::into_metadata)
                .collect(),
        }
    }
}

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id,
            client_secret,
            http,
            token: Mutex::new(None),
        })
    }

    /// Current access token, fetching a new one when the cached one expired.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        info!("🔑 Requesting new Spotify token");
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Spotify token request failed")?;

        if !response.status().is_success() {
            bail!("Spotify token request rejected: {}", response.status());
        }

        let body: TokenResponse = response.json().await.context("Invalid Spotify token response")?;
        let token = CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let token = self.access_token().await?;
        let url = format!("{}/{}", API_URL, path);
        debug!("🎧 Spotify GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Spotify request to {} failed", path))?;

        if !response.status().is_success() {
            bail!("Spotify API error for {}: {}", path, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid Spotify response for {}", path))
    }
}

#[async_trait]
impl MetadataService for SpotifyClient {
    fn is_metadata_link(&self, query: &str) -> bool {
        parse_link(query).is_some()
    }

    async fn search(&self, url: &str) -> Result<MetadataPlaylist> {
        let Some((kind, id)) = parse_link(url) else {
            bail!("not a Spotify link: {}", url);
        };
        debug!("spotify.search kind={:?} id={}", kind, id);

        let playlist: MetadataPlaylist = match kind {
            SpotifyKind::Track => self.get::<Track>(&format!("tracks/{}", id)).await?.into(),
            SpotifyKind::Album => self.get::<Album>(&format!("albums/{}", id)).await?.into(),
            SpotifyKind::Playlist => self.get::<Playlist>(&format!("playlists/{}", id)).await?.into(),
        };
        Ok(playlist)
    }
}
