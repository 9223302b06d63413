//! # Bot Module
//!
//! Discord front end for SurBot.
//!
//! - [`SurBot`] implements Serenity's [`EventHandler`] and dispatches prefix
//!   commands from chat messages
//! - [`handlers`] parses and runs the commands against the guild's session
//! - [`voice`] adapts songbird to the playback engine's transport and encoder
//! - [`notify`] renders engine notifications as embeds
//!
//! The [`GuildRegistry`] and [`DiscordNotifier`] are built after the client
//! (they need its cache and HTTP client) and reach the handler through the
//! client's shared data.

use serenity::{
    all::{Context, EventHandler, Message, Ready},
    async_trait,
};
use tracing::{debug, error, info, warn};

pub mod handlers;
pub mod notify;
pub mod voice;

pub use notify::DiscordNotifier;

use crate::{audio::GuildRegistry, sources::SongResolver};

pub struct SurBot {
    prefix: String,
    resolver: SongResolver,
}

impl SurBot {
    pub fn new(prefix: String, resolver: SongResolver) -> Self {
        Self { prefix, resolver }
    }
}

#[async_trait]
impl EventHandler for SurBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        let notifier = ctx.data.read().await.get::<DiscordNotifier>().cloned();
        match notifier {
            Some(notifier) => notifier.attach_shard(ctx.shard.clone()),
            None => warn!("⚠️ Notifier missing from client data, activity updates disabled"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(command) = handlers::parse_command(&self.prefix, &msg.content) else {
            return;
        };

        let registry = ctx.data.read().await.get::<GuildRegistry>().cloned();
        let Some(registry) = registry else {
            error!("Guild registry missing from client data");
            return;
        };

        debug!("bot.message command={:?}", command);
        if let Err(e) =
            handlers::handle_command(&ctx, &msg, command, &self.prefix, &self.resolver, &registry).await
        {
            error!("Error handling command: {:?}", e);
        }
    }
}
