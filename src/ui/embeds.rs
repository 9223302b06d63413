use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{notify::Notification, queue::QueueListing},
    sources::Song,
};

/// Standard color palette for the bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 SurBot";

/// Renders an engine notification.
pub fn render(notification: &Notification) -> CreateEmbed {
    match notification {
        Notification::NowPlaying(song) => create_now_playing_embed(song),
        Notification::NothingPlaying => create_info_embed("🔇 Nothing Playing", "Queue something with `play`"),
        Notification::Queue(listing) => create_queue_embed(listing),
        Notification::QueueCleared => create_success_embed("🗑️ Queue Cleared", "All pending songs were removed"),
        Notification::QueueShuffled => create_success_embed("🔀 Queue Shuffled", "Pending songs are in a new order"),
        Notification::Enqueued { count, first_title } => create_enqueued_embed(*count, first_title),
        Notification::Disconnected => create_info_embed("👋 Disconnected", "Left the voice channel after being idle"),
        Notification::Failure(reason) => create_error_embed(reason),
    }
}

pub fn create_now_playing_embed(song: &Song) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", song.title()))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artist", song.artist().unwrap_or("Unknown"), true)
        .field("⏱️ Duration", duration_label(song.duration()), true);

    if !song.thumbnail().is_empty() {
        embed = embed.thumbnail(song.thumbnail());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_enqueued_embed(count: usize, first_title: &str) -> CreateEmbed {
    let description = match count {
        0 => "Nothing was added, the queue is full".to_string(),
        1 => format!("**{}** was added to the queue", first_title),
        n => format!("**{}** and {} more songs were added to the queue", first_title, n - 1),
    };

    CreateEmbed::default()
        .title(if count > 1 { "📋 Playlist Added" } else { "✅ Song Added" })
        .description(description)
        .color(if count > 1 { colors::MUSIC_PURPLE } else { colors::SUCCESS_GREEN })
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(listing: &QueueListing) -> CreateEmbed {
    let embed = CreateEmbed::default().title("📋 Queue").color(colors::INFO_BLUE);

    if listing.is_empty() {
        return embed
            .description("😴 **The queue is empty**")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    embed
        .description(queue_description(listing))
        .footer(CreateEmbedFooter::new(format!(
            "{} songs • {} total",
            listing.total_pending,
            format_duration(listing.total_duration)
        )))
        .timestamp(Timestamp::now())
}

/// Current song followed by the numbered upcoming songs.
fn queue_description(listing: &QueueListing) -> String {
    let mut description = String::new();

    if let Some(current) = &listing.current {
        description.push_str(&format!(
            "▶️ **{}** `[{}]`\n\n",
            current.title(),
            duration_label(current.duration())
        ));
    }

    for (i, song) in listing.upcoming.iter().enumerate() {
        description.push_str(&format!(
            "**{}**. {} `[{}]`\n",
            i + 1,
            song.title(),
            duration_label(song.duration())
        ));
    }

    if listing.hidden() > 0 {
        description.push_str(&format!("...and {} more", listing.hidden()));
    }

    description
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let commands = [
        ("help", "Show this message"),
        ("ping", "Responds with pong"),
        ("play <query|link>", "Queue a song, playlist or search result and start playing"),
        ("stop", "Stop playing (the queue is kept)"),
        ("skip", "Skip to the next song"),
        ("queue", "Show the queue"),
        ("clearQueue", "Remove every queued song"),
        ("shuffle", "Shuffle the queue"),
        ("playing", "Show the current song"),
        ("disconnect", "Leave the voice channel"),
    ];
    let description = commands
        .iter()
        .map(|(name, help)| format!("• `{}{}` - {}", prefix, name, help))
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::default()
        .title("🎵 SurBot Commands")
        .description(description)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
}

fn duration_label(seconds: f64) -> String {
    if seconds > 0.0 {
        format_duration(seconds)
    } else {
        "🔴 Live".to_string()
    }
}

/// Formats seconds as `mm:ss`, or `h:mm:ss` from one hour on.
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn song(id: &str, seconds: f64) -> Song {
        Song::new(id, format!("Song {}", id), "https://cdn.example/x").with_duration(seconds)
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(59.9), "00:59");
        assert_eq!(format_duration(212.0), "03:32");
        assert_eq!(format_duration(3600.0), "1:00:00");
        assert_eq!(format_duration(3725.0), "1:02:05");
        assert_eq!(format_duration(-5.0), "00:00");
    }

    #[test]
    fn queue_description_lists_current_and_hidden() {
        let listing = QueueListing {
            current: Some(song("now", 60.0)),
            upcoming: vec![song("a", 90.0), song("b", 0.0)],
            total_pending: 5,
            total_duration: 600.0,
        };

        let description = queue_description(&listing);

        assert_eq!(
            description,
            "▶️ **Song now** `[01:00]`\n\n**1**. Song a `[01:30]`\n**2**. Song b `[🔴 Live]`\n...and 3 more"
        );
    }

    #[test]
    fn help_uses_prefix() {
        let embed = serde_json::to_value(create_help_embed("?")).unwrap();
        let description = embed["description"].as_str().unwrap();

        assert!(description.contains("`?play <query|link>`"));
        assert!(description.contains("`?clearQueue`"));
    }

    #[test]
    fn renders_failures_as_errors() {
        let embed = serde_json::to_value(render(&Notification::Failure("Lost the voice connection".into()))).unwrap();

        assert_eq!(embed["title"], "❌ Error");
        assert_eq!(embed["description"], "Lost the voice connection");
    }
}
