//! Time-bounded cache for the two opaque signing key fragments.
//!
//! Fragments come from the profile (`nav`) endpoint and rotate rarely, so a
//! stale hardcoded pair is an acceptable degraded mode when the fetch fails.
//! Refresh is single-flight: concurrent cold callers coalesce onto one
//! upstream request via a watch channel guarded by an async mutex.

use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tracing::warn;

use crate::credential::Credential;
use crate::error::ExtractorError;
use crate::http::ApiClient;
use crate::models::{ApiResponse, NavData};

const CACHE_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

// Last observed rotation values, good enough when the nav endpoint is down.
const FALLBACK_FRAGMENT_A: &str = "7cd084941338484aae1ad9425b84077c";
const FALLBACK_FRAGMENT_B: &str = "4932caff0ff746eab6f01bf08b70ac45";

#[derive(Clone, Debug)]
pub struct WbiKeys {
    fragment_a: String,
    fragment_b: String,
    fetched_at: Instant,
}

impl WbiKeys {
    fn new(fragment_a: String, fragment_b: String) -> Self {
        Self {
            fragment_a,
            fragment_b,
            fetched_at: Instant::now(),
        }
    }

    pub fn fragment_a(&self) -> &str {
        &self.fragment_a
    }

    pub fn fragment_b(&self) -> &str {
        &self.fragment_b
    }

    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > CACHE_EXPIRATION
    }

    fn fallback() -> Self {
        Self::new(FALLBACK_FRAGMENT_A.to_string(), FALLBACK_FRAGMENT_B.to_string())
    }
}

/// Shared, time-bounded key material cache. One instance is shared by all
/// tasks of a process; construct isolated instances in tests.
pub struct KeyCache {
    api: ApiClient,
    tx: watch::Sender<Option<WbiKeys>>,
    rx: watch::Receiver<Option<WbiKeys>>,
    refresh_lock: Mutex<()>,
}

impl KeyCache {
    pub fn new(api: ApiClient) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            api,
            tx,
            rx,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current key fragments, refreshed synchronously when stale.
    ///
    /// Never fails: a fetch error degrades to the hardcoded fallback pair
    /// (without caching it, so the next caller retries the fetch).
    pub async fn get(&self, credential: Option<&Credential>) -> WbiKeys {
        if let Some(keys) = self.fresh_copy() {
            return keys;
        }

        let _lock = self.refresh_lock.lock().await;

        // Double-check after acquiring the lock: another caller may have
        // completed the refresh while we waited.
        if let Some(keys) = self.fresh_copy() {
            return keys;
        }

        match self.fetch_new_keys(credential).await {
            Ok(keys) => {
                self.tx.send(Some(keys.clone())).ok();
                keys
            }
            Err(e) => {
                warn!(error = %e, "key fragment fetch failed, using fallback pair");
                WbiKeys::fallback()
            }
        }
    }

    fn fresh_copy(&self) -> Option<WbiKeys> {
        let current = self.rx.borrow();
        match &*current {
            Some(k) if !k.is_stale() => Some(k.clone()),
            _ => None,
        }
    }

    async fn fetch_new_keys(
        &self,
        credential: Option<&Credential>,
    ) -> Result<WbiKeys, ExtractorError> {
        let resp: ApiResponse<NavData> = self
            .api
            .get(NAV_URL, credential)
            .send()
            .await?
            .json()
            .await?;

        let data = resp
            .data
            .ok_or_else(|| ExtractorError::rejected(resp.code, resp.message))?;

        let fragment_a = take_filename(&data.wbi_img.img_url)
            .ok_or_else(|| ExtractorError::Other("malformed img_url".into()))?;
        let fragment_b = take_filename(&data.wbi_img.sub_url)
            .ok_or_else(|| ExtractorError::Other("malformed sub_url".into()))?;

        Ok(WbiKeys::new(fragment_a, fragment_b))
    }
}

fn take_filename(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}
