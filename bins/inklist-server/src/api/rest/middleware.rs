//! Request middleware: path canonicalization, client address resolution, and
//! the non-GET gate (rate limiting plus the optional User-Agent check).

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::uri::{PathAndQuery, Uri};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::api::rest::handlers::AppState;
use crate::error::ApiError;

/// The resolved client address, attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

/// Collapse duplicate slashes and force a trailing slash, so `/sessions`,
/// `//sessions` and `/sessions/` all route identically.
pub async fn normalize_slashes(mut req: Request, next: Next) -> Response {
    let path = req.uri().path();
    let normalized = normalize_path(path);

    if normalized != path {
        let path_and_query = match req.uri().query() {
            Some(query) => format!("{normalized}?{query}"),
            None => normalized,
        };
        if let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() {
            let mut parts = req.uri().clone().into_parts();
            parts.path_and_query = Some(path_and_query);
            if let Ok(uri) = Uri::from_parts(parts) {
                *req.uri_mut() = uri;
            }
        }
    }

    next.run(req).await
}

fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        if c == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(c);
    }
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    normalized
}

/// Resolve the client address and attach it as a [`ClientIp`] extension.
///
/// With `proxy_headers` enabled the forwarded-for headers are consulted
/// first; otherwise (or when absent) the socket peer address is used.
pub async fn resolve_client_ip(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match client_ip_from(&state, &req) {
        Some(ip) => {
            req.extensions_mut().insert(ClientIp(ip));
            next.run(req).await
        }
        None => {
            // Misconfiguration: no proxy header and no socket address.
            error!("client address unavailable, check proxy configuration");
            ApiError::Internal("client address unavailable".to_string()).into_response()
        }
    }
}

fn client_ip_from(state: &AppState, req: &Request) -> Option<IpAddr> {
    if state.cfg.proxy_headers {
        for name in ["x-forwarded-for", "x-real-ip"] {
            let Some(value) = req.headers().get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            // X-Forwarded-For may carry a chain; the first hop is the client.
            let first = value.split(',').next().unwrap_or("").trim();
            match first.parse() {
                Ok(ip) => return Some(ip),
                Err(_) => warn!(header = name, value = first, "unparseable client address"),
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Gate for the public surface: non-GET requests are rate-limited per client
/// address, and optionally required to present a known User-Agent.
pub async fn public_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        let Some(ClientIp(ip)) = req.extensions().get::<ClientIp>().copied() else {
            return ApiError::Internal("client address unavailable".to_string()).into_response();
        };

        let key = ip.to_string();
        if !state.limiter.add_token(&key) {
            warn!(client = %ip, "rate limited");
            return ApiError::RateLimited(state.limiter.drain_time(&key)).into_response();
        }

        if state.cfg.check_user_agent {
            let agent = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !agent.starts_with(&state.cfg.user_agent_prefix) {
                return ApiError::Forbidden("unsupported client".to_string()).into_response();
            }
        }
    }

    next.run(req).await
}
