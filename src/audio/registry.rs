use dashmap::DashMap;
use serenity::{model::id::GuildId, prelude::TypeMapKey};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::player::{SessionDeps, VoiceSession};

/// Guild sessions, created on first use and kept for the life of the bot.
pub struct GuildRegistry {
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
    deps: SessionDeps,
}

impl GuildRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    /// Session for `guild_id`, created on first access.
    pub fn session(&self, guild_id: GuildId) -> Arc<VoiceSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Creating voice session for guild {}", guild_id);
                Arc::new(VoiceSession::new(guild_id, self.deps.clone()))
            })
            .value()
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Leaves every voice channel. Used on shutdown.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<VoiceSession>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        info!("🔌 Disconnecting {} voice sessions", sessions.len());

        for session in sessions {
            if let Err(e) = session.disconnect().await {
                warn!("Could not disconnect guild {}: {}", session.guild_id(), e);
            }
        }
    }
}

impl TypeMapKey for GuildRegistry {
    type Value = Arc<GuildRegistry>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{player::SessionSettings, transport::MockVoiceChannelLookup},
        testing::{FakeEncoder, FakeNotifier, FakeTransport},
    };

    fn registry() -> GuildRegistry {
        GuildRegistry::new(SessionDeps {
            transport: Arc::new(FakeTransport::default()),
            encoder: Arc::new(FakeEncoder::default()),
            lookup: Arc::new(MockVoiceChannelLookup::new()),
            notifier: Arc::new(FakeNotifier::default()),
            settings: SessionSettings::default(),
        })
    }

    #[tokio::test]
    async fn sessions_are_per_guild() {
        let registry = registry();
        assert!(registry.get(GuildId::new(1)).is_none());

        let first = registry.session(GuildId::new(1));
        let again = registry.session(GuildId::new(1));
        let other = registry.session(GuildId::new(2));

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);

        first.enqueue(vec![crate::testing::song("a")]);
        assert_eq!(other.queue().len(), 0);
    }

    #[tokio::test]
    async fn disconnect_all_without_connections_is_ok() {
        let registry = registry();
        registry.session(GuildId::new(1));
        registry.disconnect_all().await;
        assert_eq!(registry.len(), 1);
    }
}
