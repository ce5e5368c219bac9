//! Database models and the refresh field document.

use serde_json::Value;

/// Database row for a session announcement.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Stable listing id.
    pub id: i64,
    pub host: String,
    pub port: i64,
    pub session_id: String,
    pub protocol: String,
    pub title: String,
    pub users: i64,
    /// JSON array of names. Stored encoded so that names containing commas
    /// survive the round trip.
    pub usernames: String,
    pub password: bool,
    pub nsfm: bool,
    pub owner: String,
    /// Unix seconds, UTC.
    pub started: i64,
    pub last_active: i64,
    pub unlisted: bool,
    /// Non-empty means an admin kicked the listing; shown to the owner on
    /// their next refresh.
    pub unlist_reason: String,
    pub update_key: String,
    pub client_ip: String,
    pub private: bool,
    pub max_users: i64,
    pub closed: bool,
    /// −1 when the announcing server did not report a count.
    pub active_drawing_users: i64,
    pub allow_web: bool,
}

impl SessionRow {
    pub fn usernames(&self) -> Vec<String> {
        decode_usernames(&self.usernames)
    }
}

/// Outcome of inserting a new announcement.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: i64,
    pub key: String,
}

/// Session list filters, shared by the local query and the peer aggregation
/// filter.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Case-insensitive substring match on the title.
    pub title: String,
    /// Include NSFM sessions.
    pub nsfm: bool,
    /// Comma-separated protocol whitelist; empty means all.
    pub protocol: String,
}

impl QueryOptions {
    pub fn protocols(&self) -> Vec<&str> {
        if self.protocol.is_empty() {
            Vec::new()
        } else {
            self.protocol.split(',').collect()
        }
    }

    /// The predicate applied to peer-fetched sessions; mirrors the SQL
    /// filters used for local listings.
    pub fn matches(&self, title: &str, nsfm: bool, protocol: &str) -> bool {
        (self.title.is_empty()
            || title.to_lowercase().contains(&self.title.to_lowercase()))
            && (self.nsfm || !nsfm)
            && (self.protocol.is_empty() || self.protocols().contains(&protocol))
    }
}

/// The subset of fields a refresh may update. Built from an untyped JSON
/// document: unknown keys are ignored, and so are values of the wrong type.
#[derive(Debug, Clone, Default)]
pub struct RefreshFields {
    pub title: Option<String>,
    pub users: Option<i64>,
    pub usernames: Option<Vec<String>>,
    pub password: Option<bool>,
    pub nsfm: Option<bool>,
    pub private: Option<bool>,
    pub max_users: Option<i64>,
    pub closed: Option<bool>,
    pub active_drawing_users: Option<i64>,
    pub allow_web: Option<bool>,
}

impl RefreshFields {
    pub fn from_map(fields: &serde_json::Map<String, Value>) -> Self {
        Self {
            title: opt_string(fields, "title"),
            users: opt_int(fields, "users"),
            usernames: opt_string_list(fields, "usernames"),
            password: opt_bool(fields, "password"),
            nsfm: opt_bool(fields, "nsfm"),
            private: opt_bool(fields, "private"),
            max_users: opt_int(fields, "maxusers"),
            closed: opt_bool(fields, "closed"),
            active_drawing_users: opt_int(fields, "activedrawingusers"),
            allow_web: opt_bool(fields, "allowweb"),
        }
    }
}

fn opt_string(fields: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name)?.as_str().map(str::to_string)
}

fn opt_int(fields: &serde_json::Map<String, Value>, name: &str) -> Option<i64> {
    let value = fields.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

fn opt_bool(fields: &serde_json::Map<String, Value>, name: &str) -> Option<bool> {
    fields.get(name)?.as_bool()
}

fn opt_string_list(fields: &serde_json::Map<String, Value>, name: &str) -> Option<Vec<String>> {
    fields
        .get(name)?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

pub fn encode_usernames(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_usernames(encoded: &str) -> Vec<String> {
    serde_json::from_str(encoded).unwrap_or_default()
}

/// Database row for a host ban.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HostBanRow {
    pub id: i64,
    pub host: String,
    /// Unix seconds; NULL means permanent.
    pub expires: Option<i64>,
    pub notes: String,
}

/// Database row for an admin role.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleRow {
    pub id: i64,
    pub name: String,
    pub admin: bool,
    pub access_sessions: i64,
    pub access_hostbans: i64,
    pub access_roles: i64,
    pub access_users: i64,
}

/// Admin user joined with its role name, for listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserListRow {
    pub id: i64,
    pub name: String,
    pub role: String,
}

/// Admin user joined with its role's access levels, for authentication.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserAuthRow {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub admin: bool,
    pub access_sessions: i64,
    pub access_hostbans: i64,
    pub access_roles: i64,
    pub access_users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn refresh_fields_accept_typed_values() {
        let fields = RefreshFields::from_map(&map(json!({
            "title": "B",
            "users": 5,
            "usernames": ["a", "b,c"],
            "password": true,
            "maxusers": 20,
            "activedrawingusers": 3,
            "allowweb": true,
        })));

        assert_eq!(fields.title.as_deref(), Some("B"));
        assert_eq!(fields.users, Some(5));
        assert_eq!(
            fields.usernames,
            Some(vec!["a".to_string(), "b,c".to_string()])
        );
        assert_eq!(fields.password, Some(true));
        assert_eq!(fields.max_users, Some(20));
        assert_eq!(fields.active_drawing_users, Some(3));
        assert_eq!(fields.allow_web, Some(true));
        assert_eq!(fields.nsfm, None);
    }

    #[test]
    fn refresh_fields_skip_wrong_types_and_unknown_keys() {
        let fields = RefreshFields::from_map(&map(json!({
            "title": 7,
            "users": "five",
            "usernames": ["ok", 3],
            "password": "yes",
            "somethingelse": true,
        })));

        assert_eq!(fields.title, None);
        assert_eq!(fields.users, None);
        assert_eq!(fields.usernames, None);
        assert_eq!(fields.password, None);
    }

    #[test]
    fn refresh_accepts_float_counts() {
        // JSON decoders commonly hand over numbers as floats.
        let fields = RefreshFields::from_map(&map(json!({"users": 5.0})));
        assert_eq!(fields.users, Some(5));
    }

    #[test]
    fn usernames_with_commas_round_trip() {
        let names = vec!["User1".to_string(), "Other, one".to_string()];
        assert_eq!(decode_usernames(&encode_usernames(&names)), names);
        assert_eq!(decode_usernames(""), Vec::<String>::new());
    }

    #[test]
    fn query_options_predicate() {
        let opts = QueryOptions {
            title: "ex".to_string(),
            nsfm: false,
            protocol: "dp:4.21.2,dp:4.20.1".to_string(),
        };

        assert!(opts.matches("Example", false, "dp:4.21.2"));
        assert!(!opts.matches("Example", true, "dp:4.21.2"));
        assert!(!opts.matches("Example", false, "dp:4.19.0"));
        assert!(!opts.matches("other", false, "dp:4.21.2"));

        let all = QueryOptions {
            nsfm: true,
            ..QueryOptions::default()
        };
        assert!(all.matches("anything", true, "whatever"));
    }
}
