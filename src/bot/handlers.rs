use anyhow::Result;
use serenity::{builder::CreateMessage, model::channel::Message, prelude::Context};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{notify::Notification, GuildRegistry, Requester, VoiceSession},
    error::BotError,
    sources::SongResolver,
    ui::embeds,
};

/// Chat commands understood after the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Help,
    Play(String),
    Stop,
    Skip,
    Queue,
    ClearQueue,
    Shuffle,
    Playing,
    Disconnect,
}

/// Parses `content` when it starts with `prefix`. Command names are case
/// insensitive; unknown commands yield `None`.
pub fn parse_command(prefix: &str, content: &str) -> Option<Command> {
    let rest = content.trim().strip_prefix(prefix)?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "ping" => Command::Ping,
        "help" => Command::Help,
        "play" => Command::Play(args.to_string()),
        "stop" => Command::Stop,
        "skip" => Command::Skip,
        "queue" => Command::Queue,
        "clearqueue" => Command::ClearQueue,
        "shuffle" => Command::Shuffle,
        "playing" => Command::Playing,
        "disconnect" => Command::Disconnect,
        _ => return None,
    };
    Some(command)
}

/// Runs one command for the guild the message came from.
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    command: Command,
    prefix: &str,
    resolver: &SongResolver,
    registry: &GuildRegistry,
) -> Result<()> {
    let Some(guild_id) = msg.guild_id else {
        debug!("Ignoring command outside a guild");
        return Ok(());
    };

    info!("📝 Command {:?} used by {} in guild {}", command, msg.author.name, guild_id);

    let session = registry.session(guild_id);
    session.bind_text_channel(msg.channel_id);
    let requester = Requester {
        user_id: msg.author.id,
        text_channel: msg.channel_id,
    };

    let result = match command {
        Command::Ping => {
            msg.channel_id.say(&ctx.http, "pong!").await?;
            Ok(())
        }
        Command::Help => {
            msg.channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(embeds::create_help_embed(prefix)))
                .await?;
            Ok(())
        }
        Command::Play(query) => handle_play(&session, requester, &query, resolver).await,
        Command::Stop => session.stop().await,
        Command::Skip => session.skip().await,
        Command::Queue => {
            session.show_queue().await;
            Ok(())
        }
        Command::ClearQueue => {
            session.clear_queue().await;
            Ok(())
        }
        Command::Shuffle => {
            session.shuffle_queue().await;
            Ok(())
        }
        Command::Playing => {
            session.now_playing().await;
            Ok(())
        }
        Command::Disconnect => session.disconnect().await,
    };

    if let Err(e) = result {
        warn!("⚠️ Command failed in guild {}: {}", guild_id, e);
        session.report(&e).await;
    }

    Ok(())
}

/// Resolves the query, queues the result and makes sure playback runs.
async fn handle_play(
    session: &Arc<VoiceSession>,
    requester: Requester,
    query: &str,
    resolver: &SongResolver,
) -> std::result::Result<(), BotError> {
    let resolution = resolver.fetch_song(query).await?;

    let first_title = resolution
        .playlist
        .songs
        .first()
        .map(|song| song.title().to_string())
        .unwrap_or_default();
    let pending = resolution.pending();
    let (added, background) = resolution.enqueue(Arc::clone(session.queue()));

    session
        .announce(Notification::Enqueued {
            count: added + pending,
            first_title,
        })
        .await;

    if let Some(background) = background {
        let guild_id = session.guild_id();
        tokio::spawn(async move {
            match background.await {
                Ok(report) => debug!(
                    "Background resolution for guild {} finished: {:?}",
                    guild_id, report
                ),
                Err(e) => error!("❌ Background resolution task for guild {} died: {}", guild_id, e),
            }
        });
    }

    session.start(requester).await
}
