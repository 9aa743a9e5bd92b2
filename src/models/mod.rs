pub mod channel;
pub mod epg;
pub mod session;
pub mod stream;

pub use channel::{Channel, MosaicChannel, PlayableChannel};
pub use epg::{CastMember, EpgEntry, SeriesInfo};
pub use session::{ProviderKind, Session, StoredSession};
pub use stream::{Manifest, PlaybackContext, StreamDescriptor};
