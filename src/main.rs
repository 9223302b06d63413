use anyhow::{Context, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use surbot::{
    audio::{GuildRegistry, SessionDeps},
    bot::{
        voice::{ActiveStreams, CacheLookup, SongbirdEncoder, SongbirdTransport},
        DiscordNotifier, SurBot,
    },
    config::Config,
    sources::{MetadataService, SongResolver, SpotifyClient, YouTubeClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("surbot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting SurBot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?.with_prefix(Config::prefix_from_args(std::env::args().skip(1)));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    // Sources
    let youtube = Arc::new(YouTubeClient::new(
        config.ytdlp_path.clone(),
        config.youtube_api_key.clone(),
        config.max_playlist_size,
    )?);
    let spotify: Option<Arc<dyn MetadataService>> = match config.spotify_credentials() {
        Some((client_id, client_secret)) => {
            Some(Arc::new(SpotifyClient::new(client_id, client_secret)?) as Arc<dyn MetadataService>)
        }
        None => {
            info!("🎧 Spotify credentials not set, Spotify links disabled");
            None
        }
    };
    let resolver = SongResolver::new(youtube, spotify, config.max_playlist_size);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(SurBot::new(config.prefix.clone(), resolver))
        .register_songbird_with(Arc::clone(&songbird))
        .await?;

    // Playback core, wired to the client's cache and HTTP client
    let streams = ActiveStreams::default();
    let media_http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let notifier = Arc::new(DiscordNotifier::new(Arc::clone(&client.http)));
    let registry = Arc::new(GuildRegistry::new(SessionDeps {
        transport: Arc::new(SongbirdTransport::new(Arc::clone(&songbird), Arc::clone(&streams))),
        encoder: Arc::new(SongbirdEncoder::new(songbird, media_http, streams)),
        lookup: Arc::new(CacheLookup::new(Arc::clone(&client.cache))),
        notifier: notifier.clone(),
        settings: config.session_settings(),
    }));

    {
        let mut data = client.data.write().await;
        data.insert::<GuildRegistry>(Arc::clone(&registry));
        data.insert::<DiscordNotifier>(notifier);
    }

    // Graceful shutdown
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, leaving voice channels...");
        registry.disconnect_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let youtube = YouTubeClient::new(config.ytdlp_path.clone(), None, config.max_playlist_size)?;
    let version = youtube.ytdlp_version().await.context("Missing dependency: yt-dlp")?;
    info!("yt-dlp {}", version);

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .context("Missing dependency: ffmpeg")?;

    if ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependency: ffmpeg");
    }
}
