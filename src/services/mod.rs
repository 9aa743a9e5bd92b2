pub mod auth;
pub mod catalog;
pub mod controller;
pub mod epg;
pub mod error;
pub mod kaltura;
pub mod manifest;
pub mod metrics;
pub mod mosaic;
pub mod oneplay;
pub mod pkce;
pub mod playlist;
pub mod provider;
pub mod stream;
pub mod transport;
pub mod vault;
pub mod xmltv;

pub use controller::{ControllerStatus, IptvController};
pub use error::{IptvError, Result};
