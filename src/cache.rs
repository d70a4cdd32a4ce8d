//! Response cache surface
//!
//! A [`Fingerprint`] identifies a request for caching purposes. Transports
//! answer [`Transport::lookup_cache`](crate::Transport::lookup_cache) with a
//! [`CachedResponse`] for it; [`ResponseCache`] is a simple in-memory store
//! transports can use to back that lookup.

use crate::Request;
use crate::response::ResponseMetadata;
use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, AUTHORIZATION, HeaderName};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Request headers that change what a server would answer
const VARYING_HEADERS: [HeaderName; 4] = [ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, AUTHORIZATION];

/// Cache key derived from method, URL and the headers that affect the response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of a request
    pub fn of(request: &Request) -> Self {
        let mut key = format!("{} {}", request.method(), request.url());
        for name in &VARYING_HEADERS {
            let values: Vec<&str> = request
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            if !values.is_empty() {
                key.push('\n');
                key.push_str(name.as_str());
                key.push(':');
                key.push_str(&values.join(","));
            }
        }
        Self(key)
    }

    /// The fingerprint as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A previously stored response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Response metadata as it was received
    pub response: ResponseMetadata,
    /// Complete body
    pub data: Bytes,
    /// When the entry was stored
    pub stored_at: SystemTime,
}

impl CachedResponse {
    /// Create an entry stamped with the current time
    pub fn new(response: ResponseMetadata, data: Bytes) -> Self {
        Self {
            response,
            data,
            stored_at: SystemTime::now(),
        }
    }

    /// The body parsed as a JSON object, if it is one
    pub fn as_dictionary(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        match serde_json::from_slice(&self.data) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Entries a [`ResponseCache`] holds unless told otherwise
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// In-memory response store keyed by [`Fingerprint`].
///
/// Holds at most `capacity` entries. Storing a new fingerprint in a full
/// cache evicts the entry that was stored longest ago.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    store: Arc<Mutex<Store>>,
}

#[derive(Debug)]
struct Store {
    capacity: usize,
    next_sequence: u64,
    /// Entry plus the sequence number of its last store
    entries: HashMap<Fingerprint, (u64, CachedResponse)>,
}

impl ResponseCache {
    /// Create an empty cache with [`DEFAULT_CACHE_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create an empty cache holding at most `capacity` entries; zero disables storing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                capacity,
                next_sequence: 0,
                entries: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Look up an entry
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        self.lock()
            .entries
            .get(fingerprint)
            .map(|(_, entry)| entry.clone())
    }

    /// Store or replace an entry, evicting the oldest one when full
    pub fn insert(&self, fingerprint: Fingerprint, entry: CachedResponse) {
        let mut store = self.lock();
        if store.capacity == 0 {
            return;
        }

        if !store.entries.contains_key(&fingerprint) && store.entries.len() >= store.capacity {
            let oldest = store
                .entries
                .iter()
                .min_by_key(|(_, (sequence, _))| *sequence)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                tracing::trace!(fingerprint = %oldest, "Evicting cached response");
                store.entries.remove(&oldest);
            }
        }

        let sequence = store.next_sequence;
        store.next_sequence += 1;
        store.entries.insert(fingerprint, (sequence, entry));
    }

    /// Remove an entry
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<CachedResponse> {
        self.lock()
            .entries
            .remove(fingerprint)
            .map(|(_, entry)| entry)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
