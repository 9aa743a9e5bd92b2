//! Kaltura OTT backend (O2TV CZ / O2TV SK)
//!
//! # Overview
//!
//! Both O2TV regions run on Kaltura's `api_v3` JSON API. A session goes
//! through three tokens:
//!
//! - **Anonymous KS**: obtained without credentials, used to call login APIs
//! - **Bearer token**: the vendor's own JWT (CZ, CAS login) or OAuth access
//!   token (SK, PKCE redirect chain)
//! - **Service KS**: `ottuser/login` result scoped to one entitled service,
//!   used for everything else
//!
//! Region differences are captured by [`profile::VendorProfile`].

pub mod client;
pub mod profile;
pub mod types;

pub use client::{search_filter, KalturaApi, ServiceEntry};
pub use profile::VendorProfile;
