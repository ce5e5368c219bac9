//! REST API request and response types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{QueryOptions, SessionRow};

/// A session as it appears on the wire: in announcements, in the public list,
/// and in peer responses after mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEntry {
    pub host: String,
    pub port: i64,
    pub id: String,
    pub protocol: String,
    pub title: String,
    pub users: i64,
    pub usernames: Vec<String>,
    pub password: bool,
    pub nsfm: bool,
    pub owner: String,
    /// UTC ISO-8601; ignored on announce, stamped by the registry.
    pub started: String,
    pub private: bool,
    #[serde(rename = "maxusers")]
    pub max_users: i64,
    pub closed: bool,
    #[serde(rename = "activedrawingusers")]
    pub active_drawing_users: i64,
    #[serde(rename = "allowweb")]
    pub allow_web: bool,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            id: String::new(),
            protocol: String::new(),
            title: String::new(),
            users: 0,
            usernames: Vec::new(),
            password: false,
            nsfm: false,
            owner: String::new(),
            started: String::new(),
            private: false,
            max_users: 0,
            closed: false,
            active_drawing_users: -1,
            allow_web: false,
        }
    }
}

impl SessionEntry {
    /// `host:port`, with IPv6 literals bracketed.
    pub fn host_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl From<&SessionRow> for SessionEntry {
    fn from(row: &SessionRow) -> Self {
        Self {
            host: row.host.clone(),
            port: row.port,
            id: row.session_id.clone(),
            protocol: row.protocol.clone(),
            title: row.title.clone(),
            users: row.users,
            usernames: row.usernames(),
            password: row.password,
            nsfm: row.nsfm,
            owner: row.owner.clone(),
            started: format_timestamp(row.started),
            private: row.private,
            max_users: row.max_users,
            closed: row.closed,
            active_drawing_users: row.active_drawing_users,
            allow_web: row.allow_web,
        }
    }
}

/// Unix seconds to `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// `GET /` response.
#[derive(Debug, Serialize)]
pub struct RootInfo {
    pub api_name: &'static str,
    pub version: &'static str,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub favicon: String,
    pub source: &'static str,
    pub read_only: bool,
    pub public: bool,
    pub private: bool,
}

/// `GET /sessions/` query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionListQuery {
    pub title: String,
    pub nsfm: String,
    pub protocol: String,
}

impl SessionListQuery {
    pub fn into_options(self) -> QueryOptions {
        QueryOptions {
            title: self.title,
            nsfm: self.nsfm == "true",
            protocol: self.protocol,
        }
    }
}

/// `POST /sessions/` response.
#[derive(Debug, Serialize)]
pub struct AnnounceResponse {
    pub id: i64,
    pub key: String,
    /// Listing TTL in minutes.
    pub expires: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Plain `{"status": "ok"}` response.
#[derive(Debug, Serialize)]
pub struct OkBody {
    pub status: &'static str,
}

impl OkBody {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// `PUT /sessions/` (batch refresh) response.
#[derive(Debug, Serialize)]
pub struct BatchRefreshResponse {
    pub status: &'static str,
    pub responses: BTreeMap<String, &'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

// Admin API types

/// One session in the moderation view.
#[derive(Debug, Serialize)]
pub struct AdminSession {
    pub id: i64,
    pub host: String,
    pub port: i64,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    pub protocol: String,
    pub title: String,
    pub users: i64,
    pub usernames: Vec<String>,
    pub password: bool,
    pub nsfm: bool,
    pub owner: String,
    pub started: String,
    #[serde(rename = "lastactive")]
    pub last_active: String,
    pub unlisted: bool,
    #[serde(rename = "unlistreason")]
    pub unlist_reason: String,
    pub kicked: bool,
    #[serde(rename = "timedout")]
    pub timed_out: bool,
    #[serde(rename = "clientip")]
    pub client_ip: String,
    pub private: bool,
    /// True for sessions pulled from a peer directory.
    pub included: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminSessionListResponse {
    pub status: &'static str,
    pub sessions: Vec<AdminSession>,
    /// Peer URL to fetch-failure marker.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// `PUT /admin/sessions/` request.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateSessionsRequest {
    pub ids: Vec<i64>,
    #[serde(default)]
    pub unlisted: bool,
    #[serde(default, rename = "unlistreason")]
    pub unlist_reason: String,
}

#[derive(Debug, Serialize)]
pub struct AdminUpdatedResponse {
    pub status: &'static str,
    pub updated: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub host: String,
    /// ISO-8601; null or absent means permanent.
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize)]
pub struct BanEntry {
    pub id: i64,
    pub host: String,
    pub expires: Option<String>,
    pub notes: String,
}

#[derive(Debug, Serialize)]
pub struct BanListResponse {
    pub status: &'static str,
    pub bans: Vec<BanEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub sessions: i64,
    #[serde(default)]
    pub hostbans: i64,
    #[serde(default)]
    pub roles: i64,
    #[serde(default)]
    pub users: i64,
}

#[derive(Debug, Serialize)]
pub struct RoleEntry {
    pub id: i64,
    pub name: String,
    pub admin: bool,
    pub sessions: i64,
    pub hostbans: i64,
    pub roles: i64,
    pub users: i64,
}

#[derive(Debug, Serialize)]
pub struct RoleListResponse {
    pub status: &'static str,
    pub roles: Vec<RoleEntry>,
}

#[derive(Debug, Deserialize)]
pub struct UserCreateRequest {
    pub name: String,
    pub password: String,
    pub role: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserUpdateRequest {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    pub role: i64,
}

#[derive(Debug, Serialize)]
pub struct UserEntry {
    pub id: i64,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub status: &'static str,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub status: &'static str,
    pub id: i64,
}

/// `GET /admin/` response: server info plus the authenticated user.
#[derive(Debug, Serialize)]
pub struct AdminRootResponse {
    pub status: &'static str,
    pub api_name: &'static str,
    pub version: &'static str,
    pub name: String,
    pub user: AdminUserInfo,
}

#[derive(Debug, Serialize)]
pub struct AdminUserInfo {
    pub id: i64,
    pub name: String,
    pub admin: bool,
    pub sessions: i64,
    pub hostbans: i64,
    pub roles: i64,
    pub users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_defaults_fill_missing_fields() {
        let entry: SessionEntry = serde_json::from_str(
            r#"{"host": "203.0.113.7", "port": 27750, "id": "alpha", "protocol": "dp:4.21.2", "title": "A"}"#,
        )
        .unwrap();

        assert_eq!(entry.host, "203.0.113.7");
        assert_eq!(entry.users, 0);
        assert!(!entry.private);
        assert_eq!(entry.active_drawing_users, -1);
    }

    #[test]
    fn host_address_brackets_ipv6() {
        let mut entry = SessionEntry {
            host: "203.0.113.7".to_string(),
            port: 27750,
            ..SessionEntry::default()
        };
        assert_eq!(entry.host_address(), "203.0.113.7:27750");

        entry.host = "2001:db8::1".to_string();
        assert_eq!(entry.host_address(), "[2001:db8::1]:27750");
    }

    #[test]
    fn timestamps_are_iso_8601_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14T22:13:20Z");
    }
}
