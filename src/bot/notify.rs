use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::{
    builder::CreateMessage,
    gateway::{ActivityData, ShardMessenger},
    http::Http,
    model::id::ChannelId,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    audio::notify::{Notification, Notifier},
    ui::embeds,
};

/// Sends engine notifications to Discord as embeds and keeps the bot's
/// "listening to" activity in sync.
pub struct DiscordNotifier {
    http: Arc<Http>,
    shard: RwLock<Option<ShardMessenger>>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            shard: RwLock::new(None),
        }
    }

    /// Presence updates go through the gateway; called once the shard is ready.
    pub fn attach_shard(&self, shard: ShardMessenger) {
        *self.shard.write() = Some(shard);
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, channel_id: ChannelId, notification: Notification) {
        let message = CreateMessage::new().embed(embeds::render(&notification));
        if let Err(e) = channel_id.send_message(&self.http, message).await {
            warn!("Could not send message to channel {}: {:?}", channel_id, e);
        }
    }

    async fn set_listening(&self, title: Option<String>) {
        let shard = self.shard.read().clone();
        let Some(shard) = shard else {
            debug!("No shard attached yet, skipping activity update");
            return;
        };
        shard.set_activity(title.map(ActivityData::listening));
    }
}

impl TypeMapKey for DiscordNotifier {
    type Value = Arc<DiscordNotifier>;
}
