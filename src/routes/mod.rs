pub mod health;
pub mod iptv;
