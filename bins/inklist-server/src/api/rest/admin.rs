//! Admin REST handlers: moderation, bans, roles and users.
//!
//! Authentication happens in the [`auth`](super::auth) middleware; handlers
//! only check the permission level they need.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use axum::Json;
use axum::extract::{Extension, Path, State};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::{info, warn};

use crate::api::rest::auth::{ACCESS_MANAGE, ACCESS_VIEW, AdminContext, Perm, hash_password};
use crate::api::rest::handlers::AppState;
use crate::api::rest::types::{
    AdminRootResponse, AdminSession, AdminSessionListResponse, AdminUpdateSessionsRequest,
    AdminUpdatedResponse, AdminUserInfo, BanEntry, BanListResponse, BanRequest, CreatedResponse,
    OkBody, PasswordRequest, RoleEntry, RoleListResponse, RoleRequest, UserCreateRequest,
    UserEntry, UserListResponse, UserUpdateRequest, format_timestamp,
};
use crate::db::models::{HostBanRow, RoleRow, SessionRow};
use crate::error::{ApiError, Result};
use crate::{API_NAME, API_VERSION};

/// `GET /admin/`: server info and the authenticated user.
pub async fn admin_root(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
) -> Json<AdminRootResponse> {
    Json(AdminRootResponse {
        status: "ok",
        api_name: API_NAME,
        version: API_VERSION,
        name: state.cfg.name.clone(),
        user: AdminUserInfo {
            id: ctx.user_id,
            name: ctx.user_name.clone(),
            admin: ctx.admin,
            sessions: ctx.clamped_access(Perm::Sessions),
            hostbans: ctx.clamped_access(Perm::HostBans),
            roles: ctx.clamped_access(Perm::Roles),
            users: ctx.clamped_access(Perm::Users),
        },
    })
}

/// `GET /admin/sessions/`: every local row plus the sessions of each peer
/// directory; peers that fail to answer are reported in `errors`.
pub async fn admin_session_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
) -> Result<Json<AdminSessionListResponse>> {
    ctx.require(Perm::Sessions, ACCESS_VIEW)?;
    let store = state.store()?;

    let mut sessions: Vec<AdminSession> = Vec::new();
    for row in store.admin_query_sessions().await? {
        sessions.push(admin_session(&row, store.is_timed_out(&row)));
    }

    let mut errors = BTreeMap::new();
    for url in &state.cfg.include_servers {
        match state.peers.fetch_peer_sessions(url).await {
            Ok(included) => sessions.extend(included.iter().map(|entry| AdminSession {
                id: 0,
                host: entry.host.clone(),
                port: entry.port,
                session_id: entry.id.clone(),
                protocol: entry.protocol.clone(),
                title: entry.title.clone(),
                users: entry.users,
                usernames: entry.usernames.clone(),
                password: entry.password,
                nsfm: entry.nsfm,
                owner: entry.owner.clone(),
                started: entry.started.clone(),
                last_active: String::new(),
                unlisted: false,
                unlist_reason: String::new(),
                kicked: false,
                timed_out: false,
                client_ip: String::new(),
                private: false,
                included: true,
            })),
            Err(err) => {
                warn!(url = %url, %err, "peer fetch failed for admin view");
                errors.insert(url.clone(), "error".to_string());
            }
        }
    }

    Ok(Json(AdminSessionListResponse {
        status: "ok",
        sessions,
        errors,
    }))
}

fn admin_session(row: &SessionRow, timed_out: bool) -> AdminSession {
    AdminSession {
        id: row.id,
        host: row.host.clone(),
        port: row.port,
        session_id: row.session_id.clone(),
        protocol: row.protocol.clone(),
        title: row.title.clone(),
        users: row.users,
        usernames: row.usernames(),
        password: row.password,
        nsfm: row.nsfm,
        owner: row.owner.clone(),
        started: format_timestamp(row.started),
        last_active: format_timestamp(row.last_active),
        unlisted: row.unlisted,
        unlist_reason: row.unlist_reason.clone(),
        kicked: row.unlisted && !row.unlist_reason.is_empty(),
        timed_out,
        client_ip: row.client_ip.clone(),
        private: row.private,
        included: false,
    }
}

/// `PUT /admin/sessions/`: bulk (un)list. The reason is surfaced to the
/// owner on their next refresh.
pub async fn admin_update_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<AdminUpdateSessionsRequest>,
) -> Result<Json<AdminUpdatedResponse>> {
    ctx.require(Perm::Sessions, ACCESS_MANAGE)?;
    let store = state.store()?;

    let updated = store
        .admin_update_sessions(&request.ids, request.unlisted, &request.unlist_reason)
        .await?;

    info!(
        admin = %ctx.user_name,
        updated = ?updated,
        unlisted = request.unlisted,
        "admin updated sessions",
    );
    Ok(Json(AdminUpdatedResponse {
        status: "ok",
        updated,
    }))
}

// Host bans

pub async fn admin_ban_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
) -> Result<Json<BanListResponse>> {
    ctx.require(Perm::HostBans, ACCESS_VIEW)?;
    let bans = state.store()?.admin_query_host_bans().await?;
    Ok(Json(BanListResponse {
        status: "ok",
        bans: bans.iter().map(ban_entry).collect(),
    }))
}

fn ban_entry(row: &HostBanRow) -> BanEntry {
    BanEntry {
        id: row.id,
        host: row.host.clone(),
        expires: row.expires.map(format_timestamp),
        notes: row.notes.clone(),
    }
}

pub async fn admin_ban_create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<BanRequest>,
) -> Result<Json<CreatedResponse>> {
    ctx.require(Perm::HostBans, ACCESS_MANAGE)?;
    let store = state.store()?;

    let (host, expires) = validate_ban(&request)?;
    let id = store
        .admin_create_host_ban(&host, expires, &request.notes)
        .await?;

    info!(admin = %ctx.user_name, host = %host, "created host ban");
    Ok(Json(CreatedResponse { status: "ok", id }))
}

pub async fn admin_ban_update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
    Json(request): Json<BanRequest>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::HostBans, ACCESS_MANAGE)?;
    let store = state.store()?;

    let (host, expires) = validate_ban(&request)?;
    if store
        .admin_update_host_ban(id, &host, expires, &request.notes)
        .await?
    {
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn admin_ban_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::HostBans, ACCESS_MANAGE)?;
    if state.store()?.admin_delete_host_ban(id).await? {
        info!(admin = %ctx.user_name, ban = id, "deleted host ban");
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

fn validate_ban(request: &BanRequest) -> Result<(String, Option<i64>)> {
    if request.host.is_empty() {
        return Err(ApiError::validation("host", "may not be empty"));
    }
    let expires = match &request.expires {
        Some(s) if !s.is_empty() => Some(parse_expiry(s)?),
        _ => None,
    };
    Ok((request.host.to_lowercase(), expires))
}

/// Accept ISO-8601 timestamps or a plain date for ban expiry.
fn parse_expiry(value: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    Err(ApiError::validation("expires", "unparseable timestamp"))
}

// Roles

pub async fn admin_role_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
) -> Result<Json<RoleListResponse>> {
    ctx.require(Perm::Roles, ACCESS_VIEW)?;
    let roles = state.store()?.admin_query_roles().await?;
    Ok(Json(RoleListResponse {
        status: "ok",
        roles: roles.iter().map(role_entry).collect(),
    }))
}

fn role_entry(row: &RoleRow) -> RoleEntry {
    RoleEntry {
        id: row.id,
        name: row.name.clone(),
        admin: row.admin,
        sessions: row.access_sessions,
        hostbans: row.access_hostbans,
        roles: row.access_roles,
        users: row.access_users,
    }
}

pub async fn admin_role_create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<CreatedResponse>> {
    ctx.require(Perm::Roles, ACCESS_MANAGE)?;
    let access = validate_role(&request)?;

    let id = state
        .store()?
        .admin_create_role(&request.name, request.admin, access)
        .await?;

    info!(admin = %ctx.user_name, role = %request.name, "created role");
    Ok(Json(CreatedResponse { status: "ok", id }))
}

pub async fn admin_role_update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::Roles, ACCESS_MANAGE)?;
    let access = validate_role(&request)?;

    if state
        .store()?
        .admin_update_role(id, &request.name, request.admin, access)
        .await?
    {
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn admin_role_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::Roles, ACCESS_MANAGE)?;
    if state.store()?.admin_delete_role(id).await? {
        info!(admin = %ctx.user_name, role = id, "deleted role");
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

fn validate_role(request: &RoleRequest) -> Result<[i64; 4]> {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let name_re = NAME.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").unwrap());
    if !name_re.is_match(&request.name) {
        return Err(ApiError::validation(
            "name",
            "may only contain lowercase letters, digits and underscores",
        ));
    }

    let access = [
        request.sessions,
        request.hostbans,
        request.roles,
        request.users,
    ];
    if access.iter().any(|level| !(0..=2).contains(level)) {
        return Err(ApiError::validation("access", "levels are 0 (none), 1 (view) or 2 (manage)"));
    }
    Ok(access)
}

// Users

pub async fn admin_user_list(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
) -> Result<Json<UserListResponse>> {
    ctx.require(Perm::Users, ACCESS_VIEW)?;
    let users = state.store()?.admin_query_users().await?;
    Ok(Json(UserListResponse {
        status: "ok",
        users: users
            .into_iter()
            .map(|row| UserEntry {
                id: row.id,
                name: row.name,
                role: row.role,
            })
            .collect(),
    }))
}

pub async fn admin_user_create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<UserCreateRequest>,
) -> Result<Json<CreatedResponse>> {
    ctx.require(Perm::Users, ACCESS_MANAGE)?;

    if request.name.is_empty() {
        return Err(ApiError::validation("name", "may not be empty"));
    }
    if request.password.is_empty() {
        return Err(ApiError::validation("password", "may not be empty"));
    }

    let hash = hash_password(&request.password)?;
    let id = state
        .store()?
        .admin_create_user(&request.name, &hash, request.role)
        .await?;

    info!(admin = %ctx.user_name, user = %request.name, "created user");
    Ok(Json(CreatedResponse { status: "ok", id }))
}

pub async fn admin_user_update(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
    Json(request): Json<UserUpdateRequest>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::Users, ACCESS_MANAGE)?;

    if request.name.is_empty() {
        return Err(ApiError::validation("name", "may not be empty"));
    }
    let hash = match &request.password {
        Some(password) if !password.is_empty() => Some(hash_password(password)?),
        _ => None,
    };

    if state
        .store()?
        .admin_update_user(id, &request.name, hash.as_deref(), request.role)
        .await?
    {
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn admin_user_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Path(id): Path<i64>,
) -> Result<Json<OkBody>> {
    ctx.require(Perm::Users, ACCESS_MANAGE)?;
    if state.store()?.admin_delete_user(id).await? {
        info!(admin = %ctx.user_name, user = id, "deleted user");
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

/// `PUT /admin/users/self/password/`: any authenticated table user may change
/// their own password. The static operator has no row to update.
pub async fn admin_self_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<PasswordRequest>,
) -> Result<Json<OkBody>> {
    if request.password.is_empty() {
        return Err(ApiError::validation("password", "may not be empty"));
    }

    let hash = hash_password(&request.password)?;
    if state
        .store()?
        .admin_update_user_password(ctx.user_id, &hash)
        .await?
    {
        info!(user = %ctx.user_name, "changed own password");
        Ok(Json(OkBody::ok()))
    } else {
        Err(ApiError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_formats() {
        assert_eq!(parse_expiry("1970-01-01T00:00:10Z").unwrap(), 10);
        assert_eq!(parse_expiry("1970-01-01 00:00:10").unwrap(), 10);
        assert_eq!(parse_expiry("1970-01-02").unwrap(), 86400);
        assert!(parse_expiry("next tuesday").is_err());
    }

    #[test]
    fn role_validation() {
        let mut request = RoleRequest {
            name: "moderator_2".to_string(),
            admin: false,
            sessions: 2,
            hostbans: 1,
            roles: 0,
            users: 0,
        };
        assert_eq!(validate_role(&request).unwrap(), [2, 1, 0, 0]);

        request.name = "Bad Name".to_string();
        assert!(validate_role(&request).is_err());

        request.name = "fine".to_string();
        request.sessions = 3;
        assert!(validate_role(&request).is_err());
    }
}
