//! XMLTV rendering.
//!
//! Channels are identified by their display name, which is what players
//! match against the playlist entry name.

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use std::collections::HashMap;

use crate::models::{Channel, EpgEntry, SeriesInfo};

const GENERATOR: &str = "o2iptv-server";

/// `YYYYMMDDHHMMSS` in UTC
fn xmltv_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// `xmltv_ns` episode number, zero-based; only when season and episode are both positive
pub fn episode_num(series: &SeriesInfo) -> Option<String> {
    let season = series.season_number.filter(|n| *n > 0)?;
    let episode = series.episode_number.filter(|n| *n > 0)?;

    Some(match series.episodes_in_season.filter(|n| *n > 0) {
        Some(total) => format!("{}.{}/{}.0/0", season - 1, episode - 1, total),
        None => format!("{}.{}.0/0", season - 1, episode - 1),
    })
}

pub fn render(channels: &[Channel], entries: &[EpgEntry]) -> String {
    let mut xmltv = String::new();
    xmltv.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xmltv.push_str(&format!("<tv generator-info-name=\"{}\">\n", GENERATOR));

    for channel in channels {
        let id = escape(&channel.name);
        xmltv.push_str(&format!("  <channel id=\"{}\">\n", id));
        xmltv.push_str(&format!("    <display-name>{}</display-name>\n", id));
        if let Some(logo) = &channel.logo {
            xmltv.push_str(&format!("    <icon src=\"{}\" />\n", escape(logo)));
        }
        xmltv.push_str("  </channel>\n");
    }

    let names: HashMap<&str, String> = channels
        .iter()
        .map(|c| (c.id.as_str(), escape(&c.name).into_owned()))
        .collect();

    for entry in entries {
        let Some(channel) = names.get(entry.channel_id.as_str()) else {
            continue;
        };
        render_programme(&mut xmltv, channel, entry);
    }

    xmltv.push_str("</tv>\n");
    xmltv
}

fn render_programme(xmltv: &mut String, channel: &str, entry: &EpgEntry) {
    xmltv.push_str(&format!(
        "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
        xmltv_time(entry.start_time),
        xmltv_time(entry.end_time),
        channel
    ));
    xmltv.push_str(&format!("    <title>{}</title>\n", escape(&entry.title)));

    if let Some(desc) = &entry.description {
        xmltv.push_str(&format!("    <desc>{}</desc>\n", escape(desc)));
    }

    if let Some(series) = &entry.series {
        if let Some(episode_name) = &series.episode_name {
            xmltv.push_str(&format!("    <sub-title>{}</sub-title>\n", escape(episode_name)));
        }
        if let Some(num) = episode_num(series) {
            xmltv.push_str(&format!("    <episode-num system=\"xmltv_ns\">{}</episode-num>\n", num));
        }
    }

    if let Some(poster) = &entry.poster {
        xmltv.push_str(&format!("    <icon src=\"{}\" />\n", escape(poster)));
    }

    if !entry.cast.is_empty() || !entry.directors.is_empty() {
        xmltv.push_str("    <credits>\n");
        for director in &entry.directors {
            xmltv.push_str(&format!("      <director>{}</director>\n", escape(director)));
        }
        for actor in &entry.cast {
            xmltv.push_str(&format!(
                "      <actor role=\"{}\">{}</actor>\n",
                escape(&actor.role),
                escape(&actor.name)
            ));
        }
        xmltv.push_str("    </credits>\n");
    }

    for genre in &entry.genres {
        xmltv.push_str(&format!("    <category>{}</category>\n", escape(genre)));
    }
    if let Some(year) = entry.year {
        xmltv.push_str(&format!("    <date>{}</date>\n", year));
    }
    if let Some(country) = &entry.country {
        xmltv.push_str(&format!("    <country>{}</country>\n", escape(country)));
    }

    xmltv.push_str("  </programme>\n");
}
