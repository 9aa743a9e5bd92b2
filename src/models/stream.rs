/// Where the player should fetch the manifest from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub manifest_url: String,
    pub license_url: Option<String>,
}

/// What the play endpoint hands back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Fetched DASH document with its BaseURL already rewritten
    Dash { resolved_url: String, document: String },
    /// Formats we pass through untouched (HLS)
    Redirect(String),
}

/// Kaltura playback context kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackContext {
    Playback,
    StartOver,
    Catchup,
}

impl PlaybackContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackContext::Playback => "PLAYBACK",
            PlaybackContext::StartOver => "START_OVER",
            PlaybackContext::Catchup => "CATCHUP",
        }
    }
}
