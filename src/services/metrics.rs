use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Vendor API calls by provider and outcome (`ok` / `error`)
    pub static ref VENDOR_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "o2iptv_vendor_requests_total",
        "Vendor API requests",
        &["provider", "outcome"]
    )
    .unwrap();

    /// XMLTV cache lookups (`hit` / `miss`)
    pub static ref EPG_CACHE: IntCounterVec = register_int_counter_vec!(
        "o2iptv_epg_cache_total",
        "EPG cache lookups",
        &["result"]
    )
    .unwrap();

    /// Login attempts by source (`stored` / `fresh` / `failed`)
    pub static ref LOGINS: IntCounterVec = register_int_counter_vec!(
        "o2iptv_logins_total",
        "Provider logins",
        &["source"]
    )
    .unwrap();
}

pub fn record_vendor_call<T, E>(provider: &str, result: &std::result::Result<T, E>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    VENDOR_REQUESTS.with_label_values(&[provider, outcome]).inc();
}
