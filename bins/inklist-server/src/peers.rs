//! Peer directory aggregation.
//!
//! Listings can be merged with sessions pulled from other directory
//! instances. Fetches go through a two-tier TTL cache: within the list TTL
//! the whole cached list is reused; within the (longer) status TTL only the
//! peer's resolved host and port are reused, so the session list is refetched
//! without hitting `/status/` again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::api::rest::types::SessionEntry;
use crate::db::models::QueryOptions;

/// `GET {peer}/status/` response.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    ext_host: String,
    #[serde(default)]
    ext_port: i64,
}

/// One entry of `GET {peer}/sessions/`, as reported by the upstream session
/// server.
#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct PeerSession {
    id: String,
    alias: String,
    closed: bool,
    founder: String,
    has_password: bool,
    max_user_count: i64,
    nsfm: bool,
    #[allow(dead_code)]
    persistent: bool,
    protocol: String,
    #[allow(dead_code)]
    size: i64,
    start_time: String,
    title: String,
    user_count: i64,
    active_drawing_user_count: i64,
    allow_web: bool,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self {
            id: String::new(),
            alias: String::new(),
            closed: false,
            founder: String::new(),
            has_password: false,
            max_user_count: 0,
            nsfm: false,
            persistent: false,
            protocol: String::new(),
            size: 0,
            start_time: String::new(),
            title: String::new(),
            user_count: 0,
            // Missing count must survive as "unknown".
            active_drawing_user_count: -1,
            allow_web: false,
        }
    }
}

impl PeerSession {
    fn alias_or_id(&self) -> &str {
        if self.alias.is_empty() {
            &self.id
        } else {
            &self.alias
        }
    }

    fn into_entry(self, host: &str, port: i64) -> SessionEntry {
        SessionEntry {
            host: host.to_string(),
            port,
            id: self.alias_or_id().to_string(),
            protocol: self.protocol,
            title: self.title,
            users: self.user_count,
            usernames: Vec::new(),
            password: self.has_password,
            nsfm: self.nsfm,
            owner: self.founder,
            started: self.start_time,
            private: false,
            max_users: self.max_user_count,
            closed: self.closed,
            active_drawing_users: self.active_drawing_user_count,
            allow_web: self.allow_web,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    BadStatus(reqwest::StatusCode),
}

#[derive(Clone)]
struct CacheEntry {
    fetched_at: Instant,
    host: String,
    port: i64,
    sessions: Vec<SessionEntry>,
}

/// Fan-out fetcher with the two-tier cache.
pub struct Aggregator {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    list_ttl: Duration,
    status_ttl: Duration,
}

impl Aggregator {
    pub fn new(
        list_ttl: Duration,
        status_ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
            list_ttl,
            // A stale host/port must never outlive a fresh list.
            status_ttl: status_ttl.max(list_ttl),
        })
    }

    /// Fetch, filter and concatenate the session lists of all peers,
    /// preserving the input URL order. A failing (or panicking) peer
    /// contributes an empty list, never an error.
    pub async fn fetch_filtered(
        self: Arc<Self>,
        opts: &QueryOptions,
        urls: &[String],
    ) -> Vec<SessionEntry> {
        match urls {
            [] => Vec::new(),
            [url] => match self.cached_fetch(url).await {
                Ok(sessions) => filter_sessions(sessions, opts),
                Err(err) => {
                    warn!(url = %url, %err, "peer fetch failed");
                    Vec::new()
                }
            },
            urls => {
                let mut tasks = JoinSet::new();
                for (index, url) in urls.iter().enumerate() {
                    let aggregator = Arc::clone(&self);
                    let url = url.clone();
                    tasks.spawn(async move { (index, url.clone(), aggregator.cached_fetch(&url).await) });
                }

                let mut results: Vec<Vec<SessionEntry>> = vec![Vec::new(); urls.len()];
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((index, _, Ok(sessions))) => {
                            results[index] = filter_sessions(sessions, opts);
                        }
                        Ok((_, url, Err(err))) => {
                            warn!(url = %url, %err, "peer fetch failed");
                        }
                        Err(err) => {
                            // A panicking worker is just a failed peer.
                            warn!(%err, "peer fetch task failed");
                        }
                    }
                }
                results.into_iter().flatten().collect()
            }
        }
    }

    /// Uncached full fetch for the admin view.
    pub async fn fetch_peer_sessions(&self, url: &str) -> Result<Vec<SessionEntry>, PeerError> {
        let (host, port) = self.fetch_status(url).await?;
        self.fetch_sessions(url, &host, port).await
    }

    async fn cached_fetch(&self, url: &str) -> Result<Vec<SessionEntry>, PeerError> {
        if self.list_ttl.is_zero() {
            return self.fetch_peer_sessions(url).await;
        }

        let mut known_status: Option<(String, i64)> = None;
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(url) {
                let age = entry.fetched_at.elapsed();
                if age <= self.list_ttl {
                    return Ok(entry.sessions.clone());
                }
                if age <= self.status_ttl {
                    known_status = Some((entry.host.clone(), entry.port));
                }
            }
        }

        let (host, port) = match known_status {
            Some(status) => status,
            None => self.fetch_status(url).await?,
        };
        let sessions = self.fetch_sessions(url, &host, port).await?;

        self.cache.lock().insert(
            url.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                host,
                port,
                sessions: sessions.clone(),
            },
        );
        Ok(sessions)
    }

    async fn fetch_status(&self, url: &str) -> Result<(String, i64), PeerError> {
        let status: StatusResponse = self.fetch_json(&format!("{url}/status/")).await?;
        Ok((status.ext_host, status.ext_port))
    }

    async fn fetch_sessions(
        &self,
        url: &str,
        host: &str,
        port: i64,
    ) -> Result<Vec<SessionEntry>, PeerError> {
        let sessions: Vec<PeerSession> = self.fetch_json(&format!("{url}/sessions/")).await?;
        Ok(sessions
            .into_iter()
            .map(|s| s.into_entry(host, port))
            .collect())
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, PeerError> {
        let response = self.client.get(url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(PeerError::BadStatus(response.status()));
        }
        Ok(response.json().await?)
    }
}

fn filter_sessions(sessions: Vec<SessionEntry>, opts: &QueryOptions) -> Vec<SessionEntry> {
    sessions
        .into_iter()
        .filter(|s| opts.matches(&s.title, s.nsfm, &s.protocol))
        .collect()
}

/// Merge session lists, deduplicating by `(host, port, id)` with hosts
/// compared case-insensitively. The first occurrence wins, so callers put
/// their own listings first.
pub fn merge_lists(lists: &[Vec<SessionEntry>]) -> Vec<SessionEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for list in lists {
        for session in list {
            let key = (session.host.to_lowercase(), session.port, session.id.clone());
            if seen.insert(key) {
                merged.push(session.clone());
            }
        }
    }

    merged
}
