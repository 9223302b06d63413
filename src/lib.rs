//! SurBot: a Discord music bot.
//!
//! Users queue songs by search text, platform links or streaming-service
//! links; each guild gets its own queue and voice session.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;

#[cfg(test)]
mod testing;
