use anyhow::{bail, Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{PlaylistMeta, SearchHit, SearchService, Song, VideoInfo};

const SEARCH_RESULTS: usize = 5;
const API_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/watch\?v=|youtu\.be/)[a-zA-Z0-9_-]{11}|^(?:https?://)?(?:www\.|music\.)?youtube\.com/playlist\?list=[a-zA-Z0-9_-]+",
    )
    .expect("youtube url regex")
});

/// One line of `yt-dlp --dump-json` output.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    /// Direct media URL of the selected format. Missing for flat entries.
    url: Option<String>,
    playlist_title: Option<String>,
    playlist_uploader: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSearchResponse {
    #[serde(default)]
    items: Vec<ApiSearchItem>,
}

#[derive(Debug, Deserialize)]
struct ApiSearchItem {
    id: ApiVideoId,
    snippet: ApiSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideoId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSnippet {
    title: String,
}

/// Search-and-extract client backed by yt-dlp.
///
/// Free-text search goes through the YouTube Data API when a key is
/// configured and falls back to `ytsearch` otherwise.
pub struct YouTubeClient {
    ytdlp_path: String,
    api_key: Option<String>,
    http: reqwest::Client,
    max_playlist_size: usize,
    rate_limiter: Semaphore,
}

impl YouTubeClient {
    pub fn new(ytdlp_path: impl Into<String>, api_key: Option<String>, max_playlist_size: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            ytdlp_path: ytdlp_path.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http,
            max_playlist_size: max_playlist_size.max(1),
            // Keep yt-dlp from getting rate limited
            rate_limiter: Semaphore::new(3),
        })
    }

    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.is_match(url.trim())
    }

    fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", id)
    }

    async fn run_ytdlp(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new(&self.ytdlp_path)
            .args(args)
            .output()
            .await
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn search_api(&self, key: &str, query: &str) -> Result<Vec<SearchHit>> {
        debug!("🔍 YouTube API search: {}", query);

        let max_results = SEARCH_RESULTS.to_string();
        let response = self
            .http
            .get(API_SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("key", key),
            ])
            .send()
            .await
            .context("YouTube API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("YouTube API error: {} - {}", status, body);
        }

        let body: ApiSearchResponse = response.json().await.context("Invalid YouTube API response")?;
        Ok(body
            .items
            .into_iter()
            .filter_map(|item| {
                let id = item.id.video_id?;
                Some(SearchHit {
                    url: Self::watch_url(&id),
                    id,
                    title: item.snippet.title,
                })
            })
            .collect())
    }

    async fn search_ytdlp(&self, query: &str) -> Result<Vec<SearchHit>> {
        debug!("🔍 yt-dlp search: {}", query);

        let search = format!("ytsearch{}:{}", SEARCH_RESULTS, query);
        let stdout = self
            .run_ytdlp(&["--flat-playlist", "--dump-json", "--no-warnings", &search])
            .await?;

        Ok(parse_lines(&stdout)
            .map(|info| SearchHit {
                url: Self::watch_url(&info.id),
                id: info.id,
                title: info.title,
            })
            .collect())
    }

    /// Version string of the configured yt-dlp binary.
    pub async fn ytdlp_version(&self) -> Result<String> {
        let stdout = self.run_ytdlp(&["--version"]).await?;
        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl SearchService for YouTubeClient {
    fn is_platform_link(&self, query: &str) -> bool {
        Self::is_youtube_url(query)
    }

    async fn search_video(&self, query: &str) -> Result<Vec<SearchHit>> {
        info!("🔍 Searching YouTube: {}", query);

        match self.api_key.as_deref() {
            Some(key) => match self.search_api(key, query).await {
                Ok(hits) => Ok(hits),
                Err(e) => {
                    warn!("⚠️ YouTube API search failed, falling back to yt-dlp: {:#}", e);
                    self.search_ytdlp(query).await
                }
            },
            None => self.search_ytdlp(query).await,
        }
    }

    async fn get_video_info(&self, url: &str) -> Result<VideoInfo> {
        debug!("📊 Fetching video info: {}", url);

        let limit = self.max_playlist_size.to_string();
        let stdout = self
            .run_ytdlp(&[
                "-f",
                "bestaudio/best",
                "--dump-json",
                "--playlist-end",
                &limit,
                "--no-warnings",
                url,
            ])
            .await?;

        let info = parse_dump(&stdout);
        if info.songs.is_empty() {
            bail!("yt-dlp returned no entries for {}", url);
        }
        Ok(info)
    }
}

fn parse_lines(stdout: &str) -> impl Iterator<Item = YtDlpInfo> + '_ {
    stdout.lines().filter(|line| !line.trim().is_empty()).filter_map(|line| {
        serde_json::from_str::<YtDlpInfo>(line)
            .map_err(|e| debug!("Skipping unparsable yt-dlp line: {}", e))
            .ok()
    })
}

/// Builds songs (and the playlist header, if any) from `--dump-json` output.
fn parse_dump(stdout: &str) -> VideoInfo {
    let mut playlist = None;
    let songs: Vec<Song> = parse_lines(stdout)
        .map(|info| {
            if playlist.is_none() {
                if let Some(title) = info.playlist_title.clone() {
                    playlist = Some(PlaylistMeta {
                        title,
                        uploader: info.playlist_uploader.clone().unwrap_or_default(),
                    });
                }
            }

            let mut song = Song::new(info.id, info.title, info.url.unwrap_or_default())
                .with_duration(info.duration.unwrap_or_default())
                .with_thumbnail(info.thumbnail.unwrap_or_default());
            if let Some(uploader) = info.uploader {
                song = song.with_artist(uploader);
            }
            song
        })
        .collect();

    VideoInfo { songs, playlist }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url("youtube.com/watch?v=dQw4w9WgXcQ&t=10"));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url("https://music.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url(
            "https://www.youtube.com/playlist?list=PLFgquLnL59alCl_2TQvOiD5Vgm1hCaGSI"
        ));

        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
        assert!(!YouTubeClient::is_youtube_url("never gonna give you up"));
        assert!(!YouTubeClient::is_youtube_url("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"));
    }

    #[test]
    fn parses_single_video() {
        let stdout = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.0,"uploader":"Rick Astley","thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg","url":"https://rr1.googlevideo.com/videoplayback?id=1"}"#;

        let info = parse_dump(stdout);

        assert!(info.playlist.is_none());
        assert_eq!(info.songs.len(), 1);
        let song = &info.songs[0];
        assert_eq!(song.id(), "dQw4w9WgXcQ");
        assert_eq!(song.artist(), Some("Rick Astley"));
        assert_eq!(song.duration(), 212.0);
        assert!(song.is_playable());
    }

    #[test]
    fn parses_playlist_and_skips_garbage() {
        let stdout = concat!(
            r#"{"id":"aaaaaaaaaaa","title":"One","url":"https://cdn/1","playlist_title":"Mix","playlist_uploader":"dj"}"#,
            "\n",
            "WARNING: something odd\n",
            "\n",
            r#"{"id":"bbbbbbbbbbb","title":"Two","playlist_title":"Mix","playlist_uploader":"dj"}"#,
            "\n",
        );

        let info = parse_dump(stdout);

        assert_eq!(
            info.playlist,
            Some(PlaylistMeta {
                title: "Mix".to_string(),
                uploader: "dj".to_string(),
            })
        );
        let ids: Vec<&str> = info.songs.iter().map(Song::id).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
        assert!(info.songs[0].is_playable());
        assert!(!info.songs[1].is_playable());
    }

    #[test]
    fn api_response_skips_non_video_items() {
        let body = r#"{"items":[
            {"id":{"kind":"youtube#channel","channelId":"UC1"},"snippet":{"title":"A channel"}},
            {"id":{"kind":"youtube#video","videoId":"dQw4w9WgXcQ"},"snippet":{"title":"Rick"}}
        ]}"#;

        let parsed: ApiSearchResponse = serde_json::from_str(body).unwrap();
        let ids: Vec<Option<String>> = parsed.items.into_iter().map(|i| i.id.video_id).collect();

        assert_eq!(ids, vec![None, Some("dQw4w9WgXcQ".to_string())]);
    }
}
