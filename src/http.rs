//! HTTP client for the remote fitness API with request pacing.
//!
//! This module provides sequential activity fetching with:
//! - A fixed minimum interval between request starts
//! - Automatic retry with exponential backoff on 429
//! - Paginated activity listing
//! - Raw stream payloads handed to the stream normalizer
//!
//! Authorization is out of scope: callers supply an already-valid bearer token.

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::error::FetchError;
use crate::streams::RemoteActivitySummary;
use crate::sync::SyncEvent;

const MAX_TRANSPORT_RETRIES: u32 = 3;
const STREAM_KEYS: &str = "latlng,time,altitude,distance,heartrate";

/// Spaces out when requests START, and tracks consecutive 429s for backoff.
pub(crate) struct FetchPacer {
    min_interval: Duration,
    max_backoff: Duration,
    next_dispatch: Mutex<Instant>,
    consecutive_429s: AtomicU32,
}

impl FetchPacer {
    pub(crate) fn new(min_interval: Duration, max_backoff: Duration) -> Self {
        Self {
            min_interval,
            max_backoff,
            next_dispatch: Mutex::new(Instant::now()),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot; slots are `min_interval` apart.
    pub(crate) async fn wait_turn(&self) {
        let wait = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.min_interval;
            dispatch_at - now
        };

        // Wait outside the lock
        if !wait.is_zero() {
            debug!("[FetchPacer] Waiting {:?} for slot", wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub(crate) fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    /// Register a 429 and return how long to back off: 1s, 2s, 4s, then 4s, capped at `max_backoff`.
    pub(crate) fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff = Duration::from_millis(500 * (1 << count.min(3))).min(self.max_backoff);
        warn!("[FetchPacer] Got 429! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

/// Client for the activity listing and stream endpoints.
pub struct RemoteClient {
    client: Client,
    base_url: String,
    auth_header: String,
    per_page: u32,
    max_rate_limit_retries: u32,
    pacer: FetchPacer,
    events: Option<UnboundedSender<SyncEvent>>,
}

impl RemoteClient {
    /// Create a client using an already-authorized access token.
    pub fn new(access_token: &str, config: &SyncConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Bearer {}", access_token),
            per_page: config.per_page.max(1),
            max_rate_limit_retries: config.max_rate_limit_retries,
            pacer: FetchPacer::new(config.min_fetch_interval, config.max_backoff),
            events: None,
        })
    }

    /// Point the client at a different API root (used by tests against a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Publish rate-limit events to `events`.
    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// One page (1-based) of the athlete's activities, newest first.
    pub async fn list_activities_page(&self, page: u32) -> Result<Vec<RemoteActivitySummary>, FetchError> {
        let query = [("page", page.to_string()), ("per_page", self.per_page.to_string())];
        self.get_json("/athlete/activities", &query).await
    }

    /// Every page of activities, stopping at the first empty or short page.
    pub async fn list_all_activities(&self) -> Result<Vec<RemoteActivitySummary>, FetchError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_activities_page(page).await?;
            let count = batch.len();
            info!("[RemoteClient] Page {}: {} activities", page, count);
            all.extend(batch);
            if count < self.per_page as usize {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// Raw stream payload for one activity, keyed by stream type.
    pub async fn fetch_streams(&self, activity_id: u64) -> Result<Value, FetchError> {
        let path = format!("/activities/{}/streams", activity_id);
        let query = [("keys", STREAM_KEYS.to_string()), ("key_by_type", "true".to_string())];
        self.get_json(&path, &query).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut rate_limited = 0;
        let mut transport_failures = 0;
        let req_start = Instant::now();

        loop {
            self.pacer.wait_turn().await;

            let response = self
                .client
                .get(&url)
                .header("Authorization", &self.auth_header)
                .query(query)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        rate_limited += 1;
                        if rate_limited > self.max_rate_limit_retries {
                            warn!("[RemoteClient] {} still rate limited after {} retries", path, self.max_rate_limit_retries);
                            return Err(FetchError::RateLimited { retries: self.max_rate_limit_retries });
                        }

                        let wait = self.pacer.record_429();
                        if let Some(events) = &self.events {
                            let _ = events.send(SyncEvent::RateLimited { attempt: rate_limited, retry_in: wait });
                        }
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.pacer.record_success();

                    if !status.is_success() {
                        warn!("[RemoteClient] {} returned HTTP {}", path, status);
                        return Err(FetchError::Http { status: status.as_u16() });
                    }

                    let bytes = resp.bytes().await?;
                    let data = serde_json::from_slice(&bytes)?;
                    debug!("[RemoteClient] {} total={:?} {:.1}KB", path, req_start.elapsed(), bytes.len() as f64 / 1024.0);
                    return Ok(data);
                }
                Err(e) => {
                    transport_failures += 1;
                    if transport_failures > MAX_TRANSPORT_RETRIES {
                        return Err(FetchError::Transport(e));
                    }

                    let wait = Duration::from_millis(200 * (1 << transport_failures));
                    warn!("[RemoteClient] {} error: {}, retry {} after {:?}", path, e, transport_failures, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
