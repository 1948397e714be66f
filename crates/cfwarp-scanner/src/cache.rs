//! Persistent endpoint cache with failure accounting.
//!
//! Every successfully probed endpoint is remembered with its RTT. Failed
//! connections count against an endpoint; three strikes and it is removed
//! outright, so the persisted form never carries a dead entry. The cache
//! is an explicit value owned by its creator and shared behind `Arc`,
//! guarded by a single mutex with short critical sections.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::CacheError;

/// Failure count at which an endpoint is removed.
pub const MAX_FAILURES: u32 = 3;

const CACHE_FILE: &str = "endpoints.json";

mod duration_nanos {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

/// A cached WARP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    #[serde(with = "duration_nanos")]
    pub rtt: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub failures: u32,
}

/// Thread-safe store of known-good endpoints, persisted as
/// `endpoints.json` in the data directory.
pub struct EndpointCache {
    path: PathBuf,
    endpoints: Mutex<Vec<Endpoint>>,
}

impl EndpointCache {
    /// Create an empty cache rooted at the given data directory.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CACHE_FILE),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    /// Upsert an endpoint: an existing entry gets the new RTT, a fresh
    /// timestamp and a cleared failure count; an unknown address is
    /// appended.
    pub fn save_endpoint(&self, address: &str, rtt: Duration) {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints.iter_mut().find(|e| e.address == address) {
            existing.rtt = rtt;
            existing.timestamp = OffsetDateTime::now_utc();
            existing.failures = 0;
            return;
        }
        endpoints.push(Endpoint {
            address: address.to_string(),
            rtt,
            timestamp: OffsetDateTime::now_utc(),
            failures: 0,
        });
    }

    /// Count a failure against an endpoint; at [`MAX_FAILURES`] the entry
    /// is removed.
    pub fn record_failure(&self, address: &str) {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(position) = endpoints.iter().position(|e| e.address == address) {
            endpoints[position].failures += 1;
            if endpoints[position].failures >= MAX_FAILURES {
                debug!(address, "Removing endpoint after repeated failures");
                endpoints.remove(position);
            }
        }
    }

    /// Clear an endpoint's failure count. The RTT is left untouched.
    pub fn record_success(&self, address: &str) {
        let mut endpoints = self.endpoints.lock().unwrap();
        if let Some(existing) = endpoints.iter_mut().find(|e| e.address == address) {
            existing.failures = 0;
        }
    }

    /// The live endpoint with the lowest RTT.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoAvailableEndpoints`] when nothing is live.
    pub fn get_best(&self) -> Result<Endpoint, CacheError> {
        let endpoints = self.endpoints.lock().unwrap();
        endpoints
            .iter()
            .filter(|e| e.failures < MAX_FAILURES)
            .min_by_key(|e| e.rtt)
            .cloned()
            .ok_or(CacheError::NoAvailableEndpoints)
    }

    /// A uniformly random live endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoAvailableEndpoints`] when nothing is live.
    pub fn get_random(&self) -> Result<Endpoint, CacheError> {
        let endpoints = self.endpoints.lock().unwrap();
        let live: Vec<&Endpoint> = endpoints
            .iter()
            .filter(|e| e.failures < MAX_FAILURES)
            .collect();
        live.choose(&mut rand::thread_rng())
            .map(|e| (*e).clone())
            .ok_or(CacheError::NoAvailableEndpoints)
    }

    /// All live endpoints, sorted ascending by failure count.
    #[must_use]
    pub fn get_all(&self) -> Vec<Endpoint> {
        let endpoints = self.endpoints.lock().unwrap();
        let mut live: Vec<Endpoint> = endpoints
            .iter()
            .filter(|e| e.failures < MAX_FAILURES)
            .cloned()
            .collect();
        live.sort_by_key(|e| e.failures);
        live
    }

    /// `count` independent random draws; addresses may repeat.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoAvailableEndpoints`] when nothing is live.
    pub fn get_random_endpoints(&self, count: usize) -> Result<Vec<String>, CacheError> {
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            addresses.push(self.get_random()?.address);
        }
        Ok(addresses)
    }

    /// Load `endpoints.json`. A missing file is not an error; a corrupt
    /// file is reported so the caller can log it and continue with an
    /// empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error on unreadable or corrupt cache files.
    pub fn load(&self) -> Result<(), CacheError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let loaded: Vec<Endpoint> = serde_json::from_slice(&data)?;
        *self.endpoints.lock().unwrap() = loaded;
        Ok(())
    }

    /// Persist the cache atomically (temp file + rename), mode `0600`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self) -> Result<(), CacheError> {
        let data = {
            let endpoints = self.endpoints.lock().unwrap();
            serde_json::to_vec_pretty(&*endpoints)?
        };

        let tmp_path = self.path.with_extension("json.tmp");
        {
            use std::io::Write;
            let mut opts = std::fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(0o600);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(&data)?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
