//! DASH manifest fetching and BaseURL rewriting.

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use tracing::debug;
use url::Url;

use super::error::{IptvError, Result};
use super::transport::HttpTransport;
use crate::models::{Manifest, StreamDescriptor};

lazy_static! {
    static ref BASE_URL_TAG: Regex = Regex::new(r"(?s)<BaseURL>.*?</BaseURL>").unwrap();
    static ref MPD_OPEN_TAG: Regex = Regex::new(r"<MPD[^>]*>").unwrap();
    static ref OUTPUT_SEGMENT: Regex = Regex::new(r"output[0-9]+/").unwrap();
}

const MANIFEST_FILE: &str = "/manifest.mpd";

/// Directory of the manifest, with a trailing slash
fn manifest_base(resolved_url: &str) -> String {
    let base = match resolved_url.find(MANIFEST_FILE) {
        Some(index) => &resolved_url[..index],
        None => {
            let without_query = resolved_url.split('?').next().unwrap_or(resolved_url);
            without_query.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(without_query)
        }
    };
    format!("{}/", base)
}

/// Point relative segment URLs at the CDN the manifest was served from.
/// Replaces the first `<BaseURL>` or inserts one after the `<MPD>` opening tag.
pub fn rewrite_base_url(document: &str, resolved_url: &str) -> String {
    let tag = format!("<BaseURL>{}</BaseURL>", manifest_base(resolved_url));

    if BASE_URL_TAG.is_match(document) {
        return BASE_URL_TAG.replacen(document, 1, NoExpand(&tag)).into_owned();
    }

    match MPD_OPEN_TAG.find(document) {
        Some(open) => {
            let mut rewritten = String::with_capacity(document.len() + tag.len() + 1);
            rewritten.push_str(&document[..open.end()]);
            rewritten.push('\n');
            rewritten.push_str(&tag);
            rewritten.push_str(&document[open.end()..]);
            rewritten
        }
        None => document.to_string(),
    }
}

/// Carry `begin`/`end` over from the playback URL and pin the output rendition to `output0/`
pub fn normalize_output_path(original: &str, resolved: &str) -> String {
    let with_window = match (Url::parse(original), Url::parse(resolved)) {
        (Ok(original), Ok(mut resolved)) => {
            let window: Vec<(String, String)> = original
                .query_pairs()
                .filter(|(k, _)| k == "begin" || k == "end")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            if !window.is_empty() {
                let kept: Vec<(String, String)> = resolved
                    .query_pairs()
                    .filter(|(k, _)| k != "begin" && k != "end")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                resolved.query_pairs_mut().clear().extend_pairs(kept).extend_pairs(window);
            }
            resolved.to_string()
        }
        _ => resolved.to_string(),
    };

    OUTPUT_SEGMENT.replacen(&with_window, 1, "output0/").into_owned()
}

/// Follow the redirect to the concrete manifest, fetch it and rewrite its BaseURL
pub async fn fetch_dash(
    transport: &dyn HttpTransport,
    descriptor: &StreamDescriptor,
    normalize_output: bool,
) -> Result<Manifest> {
    let mut resolved = transport.get_resolved_url(&descriptor.manifest_url, &[]).await?;
    if normalize_output {
        resolved = normalize_output_path(&descriptor.manifest_url, &resolved);
    }
    debug!("Manifest resolved to {}", resolved);

    let response = transport.get(&resolved, &[]).await?.error_for_status()?;
    if response.body.trim().is_empty() {
        return Err(IptvError::StreamNotFound);
    }

    Ok(Manifest::Dash {
        document: rewrite_base_url(&response.body, &resolved),
        resolved_url: resolved,
    })
}
