//! M3U playlist rendering.

use crate::models::{PlayableChannel, ProviderKind};

const CATCHUP_DAYS: u32 = 7;

/// Play URL for a channel; players append the catchup query to it
pub fn play_url(base_url: &str, channel_id: &str) -> String {
    format!("{}/play/{}.mpd", base_url.trim_end_matches('/'), channel_id)
}

fn attribute(value: &str) -> String {
    value.replace('"', "'").replace(['\r', '\n'], " ")
}

pub fn render(channels: &[PlayableChannel], provider: ProviderKind, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut playlist = String::from("#EXTM3U\n");

    for channel in channels {
        playlist.push_str(&format!(
            "#EXTINF:-1 provider=\"{}\" catchup=\"append\" catchup-days=\"{}\" catchup-source=\"?start_ts={{utc}}&end_ts={{utcend}}\" url-tvg=\"{}/epg\" tvg-chno=\"{}\" tvg-logo=\"{}\",{}\n",
            provider,
            CATCHUP_DAYS,
            base,
            channel.number(),
            attribute(channel.logo().unwrap_or_default()),
            channel.name().replace(['\r', '\n'], " ")
        ));
        playlist.push_str(&play_url(base, channel.id()));
        playlist.push('\n');
    }

    playlist
}
