//! Public REST handlers: server info, session listing, announcements, the
//! refresh/delete protocol, and the legacy join endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use inklist_proto::{ProbeTimeouts, check_host};
use serde_json::Value;
use tracing::info;

use crate::api::rest::middleware::ClientIp;
use crate::api::rest::types::{
    AnnounceResponse, BatchRefreshResponse, OkBody, RootInfo, SessionEntry, SessionListQuery,
};
use crate::config::Config;
use crate::db::Store;
use crate::db::models::RefreshFields;
use crate::error::{ApiError, Result};
use crate::peers::{Aggregator, merge_lists};
use crate::ratelimit::BucketMap;
use crate::validation::{self, ValidationRules};
use crate::{API_NAME, API_VERSION, SOURCE_URL};

/// Default port for the drawing protocol.
const DEFAULT_PORT: i64 = 27750;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    /// Absent in read-only mode.
    pub store: Option<Store>,
    pub limiter: Arc<BucketMap>,
    pub peers: Arc<Aggregator>,
}

impl AppState {
    /// The registry, or a 404 for surfaces that need one in read-only mode.
    pub fn store(&self) -> Result<&Store> {
        self.store.as_ref().ok_or(ApiError::NotFound)
    }
}

/// `GET /`: info about this server.
pub async fn root(State(state): State<AppState>) -> Json<RootInfo> {
    Json(RootInfo {
        api_name: API_NAME,
        version: API_VERSION,
        name: state.cfg.name.clone(),
        description: state.cfg.description.clone(),
        favicon: state.cfg.favicon.clone(),
        source: SOURCE_URL,
        read_only: state.cfg.read_only(),
        public: state.cfg.public,
        private: state.cfg.roomcodes,
    })
}

/// `GET /sessions/`: active public sessions, local listings first, then the
/// configured peer directories, deduplicated.
pub async fn session_list(
    State(state): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Vec<SessionEntry>>> {
    if !state.cfg.public {
        return Err(ApiError::NotFound);
    }

    let opts = query.into_options();

    let local: Vec<SessionEntry> = match &state.store {
        Some(store) => store
            .query_session_list(&opts)
            .await?
            .iter()
            .map(SessionEntry::from)
            .collect(),
        None => Vec::new(),
    };

    let included = state
        .peers
        .clone()
        .fetch_filtered(&opts, &state.cfg.include_servers)
        .await;

    Ok(Json(merge_lists(&[local, included])))
}

/// `POST /sessions/`: announce a new session.
///
/// The admission sequence: listing-type gate, validation, defaults, ban
/// check, duplicate check, per-host cap and live-server probe (both skipped
/// for trusted hosts), then the insert.
pub async fn announce_session(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    Json(mut session): Json<SessionEntry>,
) -> Result<Json<AnnounceResponse>> {
    let cfg = &state.cfg;
    let store = state.store()?;

    // The requested listing type must be enabled here.
    if (session.private && !cfg.roomcodes) || (!session.private && !cfg.public) {
        return Err(ApiError::NotFound);
    }

    let rules = ValidationRules {
        client_ip,
        allow_well_known_ports: cfg.allow_well_known_ports,
        protocol_whitelist: &cfg.protocol_whitelist,
    };
    validation::validate_announcement(&session, &rules).await?;

    if session.host.is_empty() {
        session.host = client_ip.to_string();
    }
    if session.port == 0 {
        session.port = DEFAULT_PORT;
    }
    session.nsfm = session.nsfm || cfg.contains_nsfm_words(&session.title);

    if store.is_banned_host(&session.host).await? || cfg.is_banned_host(&session.host) {
        info!(client = %client_ip, host = %session.host, "rejected banned host");
        return Err(ApiError::Forbidden(
            "Hosting from this address is not allowed".to_string(),
        ));
    }

    if store
        .is_active_session(&session.host, &session.id, session.port)
        .await?
    {
        info!(client = %client_ip, id = %session.id, "tried to relist session");
        return Err(ApiError::Conflict("Session already listed".to_string()));
    }

    if !cfg.is_trusted_host(&session.host) {
        let named = validation::is_named_host(&session.host);
        let max_sessions = if named {
            cfg.max_sessions_per_named_host
        } else {
            cfg.max_sessions_per_host
        };

        let count = store.host_session_count(&session.host).await?;
        if count >= i64::from(max_sessions) {
            info!(client = %client_ip, host = %session.host, "announcement cap exceeded");
            return Err(ApiError::Conflict(
                "Max listing count exceeded for this host".to_string(),
            ));
        }

        // Probe only IP-literal hosts: an operator who set up a domain name
        // can diagnose connectivity without our help.
        if cfg.check_server && !named {
            check_host(&session.host_address(), &session.protocol, ProbeTimeouts::default())
                .await
                .map_err(|err| ApiError::Conflict(err.to_string()))?;
        }
    }

    let new_session = store
        .insert_session(&session, &client_ip.to_string())
        .await?;

    info!(
        client = %client_ip,
        listing = new_session.id,
        host = %session.host,
        port = session.port,
        id = %session.id,
        private = session.private,
        "announced session",
    );

    let mut welcome = cfg.welcome.clone();
    if cfg.warn_ipv6 && validation::is_ipv6_literal(&session.host) {
        welcome.push_str(
            "\nNote: your host address is an IPv6 address. It may not be reachable by all users.",
        );
    }

    Ok(Json(AnnounceResponse {
        id: new_session.id,
        key: new_session.key,
        expires: cfg.session_timeout,
        message: if welcome.is_empty() { None } else { Some(welcome) },
    }))
}

/// `PUT /sessions/{id}/`: refresh one listing. The update key travels in the
/// `X-Update-Key` header.
pub async fn refresh_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<OkBody>> {
    let store = state.store()?;
    let listing_id = parse_listing_id(&id)?;
    let update_key = update_key_from(&headers);

    let fields = body
        .as_object()
        .map(RefreshFields::from_map)
        .ok_or_else(|| ApiError::BadRequest("Unparseable JSON request body".to_string()))?;

    store.refresh_session(&fields, listing_id, update_key).await?;

    info!(client = %client_ip, listing = listing_id, "refreshed session");
    Ok(Json(OkBody::ok()))
}

/// `PUT /sessions/`: batch refresh. The body maps listing ids to refresh
/// documents, each carrying its own `updatekey`; results are reported per id.
pub async fn batch_refresh(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    Json(body): Json<Value>,
) -> Result<Json<BatchRefreshResponse>> {
    let store = state.store()?;
    let batch = body
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Unparseable JSON request body".to_string()))?;
    if batch.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one session should be included".to_string(),
        ));
    }

    let mut responses = BTreeMap::new();
    let mut errors = BTreeMap::new();
    let mut refreshed = Vec::new();

    for (id, document) in batch {
        let listing_id: i64 = id
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("{id} is not an integer")))?;
        let document = document
            .as_object()
            .ok_or_else(|| ApiError::BadRequest(format!("{id}: expected object")))?;
        let update_key = document
            .get("updatekey")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::BadRequest(format!("{id}.updatekey: expected string")))?;

        let fields = RefreshFields::from_map(document);
        match store.refresh_session(&fields, listing_id, update_key).await {
            Ok(()) => {
                responses.insert(id.clone(), "ok");
                refreshed.push(listing_id);
            }
            Err(ApiError::Refresh(reason)) => {
                responses.insert(id.clone(), "error");
                errors.insert(id.clone(), reason);
            }
            Err(err) => return Err(err),
        }
    }

    info!(client = %client_ip, listings = ?refreshed, "batch refreshed");
    Ok(Json(BatchRefreshResponse {
        status: "ok",
        responses,
        errors,
    }))
}

/// `DELETE /sessions/{id}/`: unlist. Succeeds exactly once per listing.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: axum::http::HeaderMap,
) -> Result<Json<OkBody>> {
    let store = state.store()?;
    let listing_id = parse_listing_id(&id)?;

    if store
        .delete_session(listing_id, update_key_from(&headers))
        .await?
    {
        info!(client = %client_ip, listing = listing_id, "delisted session");
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

/// `GET /join/{code}/`: legacy room-code lookup. The room-code subsystem is
/// gone; well-formed codes are simply never found.
pub async fn join_by_code(Path(code): Path<String>) -> Result<Json<OkBody>> {
    let _ = code;
    Err(ApiError::NotFound)
}

fn parse_listing_id(id: &str) -> Result<i64> {
    id.parse().map_err(|_| ApiError::NotFound)
}

fn update_key_from(headers: &axum::http::HeaderMap) -> &str {
    headers
        .get("x-update-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
