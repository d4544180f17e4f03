// src/expiry.rs

use moka::Expiry;
use std::time::{Duration, Instant};

/// A cached value that carries its own time-to-live.
#[derive(Clone)]
pub(crate) struct Expiring<V> {
    pub(crate) value: V,
    pub(crate) ttl: Duration,
}

impl<V> Expiring<V> {
    pub(crate) fn new(value: V, ttl: Duration) -> Self {
        Self { value, ttl }
    }
}

/// Expires each entry after the TTL it was inserted with.
pub(crate) struct PerEntryTtl;

impl<K, V> Expiry<K, Expiring<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &K, value: &Expiring<V>, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Parses the `max-age` directive of a `Cache-Control` header, if present.
pub(crate) fn parse_cache_control(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}
